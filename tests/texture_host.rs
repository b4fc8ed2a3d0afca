// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use colorbars::control_server;
use colorbars::host;
use colorbars::pattern::COLOR_BARS;
use colorbars::plugin::MethodCall;
use colorbars::plugin::MethodResponse;
use colorbars::plugin::TextureTestPlugin;
use colorbars::texture::FrameStrategy;
use colorbars::texture::TextureConfig;
use colorbars::texture::TextureId;
use serde_json::json;

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out");
        thread::sleep(Duration::from_millis(2));
    }
}

fn config(strategy: FrameStrategy) -> TextureConfig {
    TextureConfig {
        width: 256,
        height: 64,
        frame_rate: 200,
        frame_strategy: strategy,
    }
}

fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("colorbars-it-{}-{name}.sock", std::process::id()))
}

#[test]
fn initialize_drives_the_compositor() {
    let (registry, compositor) = host::start((1920, 1080)).unwrap();
    let mut plugin = TextureTestPlugin::new(registry.clone(), config(FrameStrategy::Static));

    let response = plugin.handle_method_call(&MethodCall::new("initialize"));
    assert_eq!(response, MethodResponse::success(json!({ "textureId": 0 })));
    assert!(registry.contains(TextureId(0)));

    wait_for(|| compositor.stats().frames >= 5);
    let stats = compositor.stats();
    assert_eq!(stats.last_texture, Some(TextureId(0)));
    // The requested viewport is ignored.
    assert_eq!(stats.last_size, Some((256, 64)));
    assert_eq!(stats.last_origin, Some(COLOR_BARS[0]));

    assert!(plugin.handle_method_call(&MethodCall::new("dispose")).is_success());
    assert!(registry.is_empty());

    // Let any pull already in flight finish.
    thread::sleep(Duration::from_millis(20));
    let frames_after_dispose = compositor.stats().frames;
    thread::sleep(Duration::from_millis(50));
    assert_eq!(compositor.stats().frames, frames_after_dispose);
}

#[test]
fn alternating_strategy_serves_both_frames() {
    let (registry, compositor) = host::start((256, 64)).unwrap();
    let mut plugin = TextureTestPlugin::new(registry, config(FrameStrategy::Alternating));
    plugin.handle_method_call(&MethodCall::new("initialize"));

    let mut seen_white = false;
    let mut seen_black = false;
    wait_for(|| {
        match compositor.stats().last_origin {
            Some(p) if p == COLOR_BARS[0] => seen_white = true,
            Some(p) if p == COLOR_BARS[7] => seen_black = true,
            _ => {},
        }
        seen_white && seen_black
    });
    assert!(plugin.texture().unwrap().request_count() >= 2);
}

#[test]
fn method_channel_end_to_end() {
    let (registry, _compositor) = host::start((256, 64)).unwrap();
    let plugin = Arc::new(Mutex::new(TextureTestPlugin::new(
        registry,
        config(FrameStrategy::Static),
    )));
    let path = socket_path("e2e");
    {
        let plugin = plugin.clone();
        control_server::start(&path, move |call| {
            plugin.lock().unwrap().handle_method_call(&call)
        })
        .unwrap();
    }

    for expected in ["1", "2", "3"] {
        assert_eq!(
            control_server::call(&path, &MethodCall::new("test")).unwrap(),
            MethodResponse::success(json!({ "response": expected }))
        );
    }
    assert_eq!(
        control_server::call(&path, &MethodCall::new("initialize")).unwrap(),
        MethodResponse::success(json!({ "textureId": 0 }))
    );
    assert!(matches!(
        control_server::call(&path, &MethodCall::new("initialize")).unwrap(),
        MethodResponse::Error { code, .. } if code == "already_initialized"
    ));
    assert_eq!(
        control_server::call(&path, &MethodCall::new("foo")).unwrap(),
        MethodResponse::NotImplemented
    );

    std::fs::remove_file(&path).unwrap();
}
