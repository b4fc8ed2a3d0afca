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

//! Method-call handling for the color-bar texture channel.

use std::str::FromStr;
use std::sync::Arc;

use serde_derive::Deserialize;
use serde_derive::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::prelude::*;
use crate::texture::ColorBarTexture;
use crate::texture::FrameTicker;
use crate::texture::TextureConfig;
use crate::texture::TextureId;
use crate::texture::TextureRegistry;

pub const CHANNEL_NAME: &str = "windows_texture_test";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            arguments: Value::Null,
        }
    }
}

/// Accepts either a JSON object (`{"method": "test"}`) or a bare method name.
impl FromStr for MethodCall {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with('{') {
            return serde_json::from_str(s).location(loc!());
        }
        if s.is_empty() || s.contains(char::is_whitespace) {
            bail!("invalid method name {s:?}");
        }
        Ok(Self::new(s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MethodResponse {
    Success {
        result: Value,
    },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        details: Value,
    },
    NotImplemented,
}

impl MethodResponse {
    pub fn success(result: Value) -> Self {
        Self::Success { result }
    }

    pub fn error(code: &str, message: impl ToString, details: Value) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.to_string(),
            details,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

struct ActiveTexture {
    id: TextureId,
    texture: Arc<ColorBarTexture>,
    ticker: FrameTicker,
}

/// Serves `initialize`, `test` and `dispose` against a host texture registry.
///
/// At most one texture is active at a time. Dropping the plugin stops the
/// ticker and unregisters the texture.
pub struct TextureTestPlugin {
    registry: Arc<dyn TextureRegistry>,
    config: TextureConfig,
    active: Option<ActiveTexture>,
    test_request_count: u64,
}

impl TextureTestPlugin {
    pub fn new(registry: Arc<dyn TextureRegistry>, config: TextureConfig) -> Self {
        Self {
            registry,
            config,
            active: None,
            test_request_count: 1,
        }
    }

    pub fn texture_id(&self) -> Option<TextureId> {
        self.active.as_ref().map(|active| active.id)
    }

    pub fn texture(&self) -> Option<&Arc<ColorBarTexture>> {
        self.active.as_ref().map(|active| &active.texture)
    }

    pub fn ticker(&self) -> Option<&FrameTicker> {
        self.active.as_ref().map(|active| &active.ticker)
    }

    #[instrument(skip(self), fields(method = %call.method), level = "debug")]
    pub fn handle_method_call(&mut self, call: &MethodCall) -> MethodResponse {
        match call.method.as_str() {
            "initialize" => self.initialize(),
            "test" => self.test(),
            "dispose" => self.dispose(),
            other => {
                warn!("method {other:?} is not implemented on {CHANNEL_NAME}");
                MethodResponse::NotImplemented
            },
        }
    }

    fn initialize(&mut self) -> MethodResponse {
        if let Some(id) = self.texture_id() {
            return MethodResponse::error(
                "already_initialized",
                format!("texture {id} is already registered"),
                json!({ "textureId": id }),
            );
        }

        match self.start_texture() {
            Ok(id) => MethodResponse::success(json!({ "textureId": id })),
            Err(err) => {
                error!("{err:?}");
                MethodResponse::error("initialize_failed", format!("{err:#}"), Value::Null)
            },
        }
    }

    fn start_texture(&mut self) -> Result<TextureId> {
        self.config.validate().location(loc!())?;

        let texture = Arc::new(ColorBarTexture::new(
            self.config.width,
            self.config.height,
            self.config.frame_strategy,
        ));
        let id = self
            .registry
            .register_texture(texture.clone())
            .context(loc!(), "registering color bar texture")?;

        let ticker =
            match FrameTicker::start(self.registry.clone(), id, self.config.tick_interval()) {
                Ok(ticker) => ticker,
                Err(err) => {
                    self.registry.unregister_texture(id).log_and_ignore(loc!());
                    return Err(err);
                },
            };

        info!(
            "registered {}x{} color bar texture {id} ({:?}, {} Hz)",
            self.config.width, self.config.height, self.config.frame_strategy, self.config.frame_rate
        );
        self.active = Some(ActiveTexture {
            id,
            texture,
            ticker,
        });
        Ok(id)
    }

    fn test(&mut self) -> MethodResponse {
        let response = json!({ "response": self.test_request_count.to_string() });
        self.test_request_count += 1;
        MethodResponse::success(response)
    }

    fn dispose(&mut self) -> MethodResponse {
        match self.release() {
            Some(_) => MethodResponse::success(Value::Null),
            None => MethodResponse::error(
                "not_initialized",
                "no texture is registered",
                Value::Null,
            ),
        }
    }

    fn release(&mut self) -> Option<TextureId> {
        let mut active = self.active.take()?;
        // The ticker must not outlive the registration.
        active.ticker.stop();
        self.registry
            .unregister_texture(active.id)
            .log_and_ignore(loc!());
        info!("unregistered texture {}", active.id);
        Some(active.id)
    }
}

impl Drop for TextureTestPlugin {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicI64;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::texture::FrameStrategy;
    use crate::texture::PixelBufferTexture;

    #[derive(Default)]
    struct FakeRegistry {
        next_id: AtomicI64,
        textures: Mutex<HashMap<TextureId, Arc<dyn PixelBufferTexture>>>,
        fail_register: bool,
    }

    impl TextureRegistry for FakeRegistry {
        fn register_texture(&self, texture: Arc<dyn PixelBufferTexture>) -> Result<TextureId> {
            if self.fail_register {
                bail!("registry is full");
            }
            let id = TextureId(self.next_id.fetch_add(1, Ordering::Relaxed));
            self.textures.lock().unwrap().insert(id, texture);
            Ok(id)
        }

        fn unregister_texture(&self, id: TextureId) -> Result<()> {
            self.textures
                .lock()
                .unwrap()
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| anyhow!("unknown texture {id}"))
        }

        fn mark_texture_frame_available(&self, _id: TextureId) -> Result<()> {
            Ok(())
        }
    }

    fn small_config() -> TextureConfig {
        TextureConfig {
            width: 64,
            height: 8,
            frame_rate: 1000,
            frame_strategy: FrameStrategy::Static,
        }
    }

    fn plugin() -> (Arc<FakeRegistry>, TextureTestPlugin) {
        let registry = Arc::new(FakeRegistry::default());
        let plugin = TextureTestPlugin::new(registry.clone(), small_config());
        (registry, plugin)
    }

    #[test]
    fn test_counter_starts_at_one() {
        let (_, mut plugin) = plugin();
        for expected in 1..=5 {
            assert_eq!(
                plugin.handle_method_call(&MethodCall::new("test")),
                MethodResponse::success(json!({ "response": expected.to_string() }))
            );
        }
    }

    #[test]
    fn test_unknown_method() {
        let (_, mut plugin) = plugin();
        assert_eq!(
            plugin.handle_method_call(&MethodCall::new("foo")),
            MethodResponse::NotImplemented
        );
    }

    #[test]
    fn test_initialize_registers_texture() {
        let (registry, mut plugin) = plugin();
        let response = plugin.handle_method_call(&MethodCall::new("initialize"));
        assert_eq!(response, MethodResponse::success(json!({ "textureId": 0 })));
        assert_eq!(plugin.texture_id(), Some(TextureId(0)));
        assert!(registry.textures.lock().unwrap().contains_key(&TextureId(0)));
        assert!(plugin.ticker().unwrap().is_running());

        let texture = plugin.texture().unwrap();
        assert_eq!((texture.width(), texture.height()), (64, 8));
    }

    #[test]
    fn test_reinitialize_is_rejected() {
        let (_, mut plugin) = plugin();
        plugin.handle_method_call(&MethodCall::new("initialize"));
        let response = plugin.handle_method_call(&MethodCall::new("initialize"));
        assert_eq!(
            response,
            MethodResponse::error(
                "already_initialized",
                "texture 0 is already registered",
                json!({ "textureId": 0 })
            )
        );
        assert_eq!(plugin.texture_id(), Some(TextureId(0)));
    }

    #[test]
    fn test_dispose_then_initialize_gets_new_id() {
        let (registry, mut plugin) = plugin();
        plugin.handle_method_call(&MethodCall::new("initialize"));
        assert!(plugin.handle_method_call(&MethodCall::new("dispose")).is_success());
        assert!(registry.textures.lock().unwrap().is_empty());
        assert_eq!(plugin.texture_id(), None);

        let response = plugin.handle_method_call(&MethodCall::new("initialize"));
        assert_eq!(response, MethodResponse::success(json!({ "textureId": 1 })));
    }

    #[test]
    fn test_dispose_without_texture() {
        let (_, mut plugin) = plugin();
        let response = plugin.handle_method_call(&MethodCall::new("dispose"));
        assert!(matches!(response, MethodResponse::Error { code, .. } if code == "not_initialized"));
    }

    #[test]
    fn test_drop_unregisters() {
        let (registry, mut plugin) = plugin();
        plugin.handle_method_call(&MethodCall::new("initialize"));
        drop(plugin);
        assert!(registry.textures.lock().unwrap().is_empty());
    }

    #[test]
    fn test_register_failure_is_reported() {
        let registry = Arc::new(FakeRegistry {
            fail_register: true,
            ..Default::default()
        });
        let mut plugin = TextureTestPlugin::new(registry, small_config());
        let response = plugin.handle_method_call(&MethodCall::new("initialize"));
        assert!(
            matches!(&response, MethodResponse::Error { code, message, .. }
                if code == "initialize_failed" && message.contains("registry is full")),
            "{response:?}"
        );
        assert_eq!(plugin.texture_id(), None);
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let registry = Arc::new(FakeRegistry::default());
        let config = TextureConfig {
            width: 0,
            ..small_config()
        };
        let mut plugin = TextureTestPlugin::new(registry.clone(), config);
        let response = plugin.handle_method_call(&MethodCall::new("initialize"));
        assert!(!response.is_success());
        assert!(registry.textures.lock().unwrap().is_empty());
    }

    #[test]
    fn test_parse_method_call() {
        assert_eq!("test\n".parse::<MethodCall>().unwrap(), MethodCall::new("test"));
        assert_eq!(
            r#"{"method": "initialize"}"#.parse::<MethodCall>().unwrap(),
            MethodCall::new("initialize")
        );
        assert_eq!(
            r#"{"method": "x", "arguments": {"a": 1}}"#
                .parse::<MethodCall>()
                .unwrap()
                .arguments,
            json!({ "a": 1 })
        );
        assert!("".parse::<MethodCall>().is_err());
        assert!("two words".parse::<MethodCall>().is_err());
        assert!("{not json".parse::<MethodCall>().is_err());
    }

    #[test]
    fn test_response_wire_format() {
        assert_eq!(
            serde_json::to_value(MethodResponse::success(json!({ "textureId": 3 }))).unwrap(),
            json!({ "status": "success", "result": { "textureId": 3 } })
        );
        assert_eq!(
            serde_json::to_value(MethodResponse::NotImplemented).unwrap(),
            json!({ "status": "not_implemented" })
        );
        assert_eq!(
            serde_json::to_value(MethodResponse::error("bad_request", "nope", Value::Null))
                .unwrap(),
            json!({ "status": "error", "code": "bad_request", "message": "nope" })
        );
    }
}
