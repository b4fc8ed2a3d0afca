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
use std::time::Duration;

use calloop::EventLoop;
use calloop::LoopSignal;
use calloop::channel;
use calloop::signals::Signal;
use calloop::signals::Signals;
use calloop::timer::TimeoutAction;
use calloop::timer::Timer;
use clap::Parser;
use colorbars::args;
use colorbars::args::Config;
use colorbars::args::ConfigOverrides;
use colorbars::config;
use colorbars::config::SerializableLevel;
use colorbars::control_server;
use colorbars::host;
use colorbars::host::Compositor;
use colorbars::host::SoftwareTextureRegistry;
use colorbars::plugin::CHANNEL_NAME;
use colorbars::plugin::MethodCall;
use colorbars::plugin::MethodResponse;
use colorbars::plugin::TextureTestPlugin;
use colorbars::prelude::*;
use colorbars::texture::FrameStrategy;
use colorbars::texture::TextureConfig;
use colorbars::utils;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use serde_json::Value;
use tracing::Level;

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ColorbarsdConfig {
    #[serde(skip_serializing)]
    config_file: PathBuf,
    socket: PathBuf,
    texture: TextureConfig,
    /// Frame size the compositor asks textures for.
    viewport: (usize, usize),
    stats_interval_secs: u64,
    log_file: Option<PathBuf>,
    stderr_log_level: SerializableLevel,
    file_log_level: SerializableLevel,
}

impl Default for ColorbarsdConfig {
    fn default() -> Self {
        Self {
            config_file: config::default_config_file("colorbarsd"),
            socket: config::default_socket_path(),
            texture: TextureConfig::default(),
            viewport: (1280, 720),
            stats_interval_secs: 5,
            log_file: None,
            stderr_log_level: SerializableLevel(Level::INFO),
            file_log_level: SerializableLevel(Level::TRACE),
        }
    }
}

impl Config for ColorbarsdConfig {
    fn config_file(&self) -> PathBuf {
        self.config_file.clone()
    }
}

#[derive(Debug, Parser)]
#[command(about = "Serves a color-bar test texture over a method channel", long_about = None)]
struct ColorbarsdArgs {
    /// Print a configuration file with default values to stdout.
    #[arg(long)]
    print_default_config_and_exit: bool,
    /// Path to the config file to use.
    #[arg(long)]
    config_file: Option<PathBuf>,
    /// Unix socket the method channel listens on.
    #[arg(long)]
    socket: Option<PathBuf>,
    /// Texture width (pixels)
    #[arg(long)]
    width: Option<usize>,
    /// Texture height (pixels)
    #[arg(long)]
    height: Option<usize>,
    /// Frame-available notifications per second
    #[arg(long)]
    frame_rate: Option<u32>,
    #[arg(long, value_enum)]
    frame_strategy: Option<FrameStrategy>,
    /// Seconds between compositor statistics log lines
    #[arg(long)]
    stats_interval_secs: Option<u64>,
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(long)]
    stderr_log_level: Option<SerializableLevel>,
    #[arg(long)]
    file_log_level: Option<SerializableLevel>,
}

impl ConfigOverrides<ColorbarsdConfig> for ColorbarsdArgs {
    fn print_default_config_and_exit(&self) -> bool {
        self.print_default_config_and_exit
    }

    fn config_file(&self) -> Option<PathBuf> {
        self.config_file.clone()
    }

    fn apply_to(self, config: &mut ColorbarsdConfig) {
        if let Some(config_file) = self.config_file {
            config.config_file = config_file;
        }
        if let Some(socket) = self.socket {
            config.socket = socket;
        }
        if let Some(width) = self.width {
            config.texture.width = width;
        }
        if let Some(height) = self.height {
            config.texture.height = height;
        }
        if let Some(frame_rate) = self.frame_rate {
            config.texture.frame_rate = frame_rate;
        }
        if let Some(frame_strategy) = self.frame_strategy {
            config.texture.frame_strategy = frame_strategy;
        }
        if let Some(stats_interval_secs) = self.stats_interval_secs {
            config.stats_interval_secs = stats_interval_secs;
        }
        if self.log_file.is_some() {
            config.log_file = self.log_file;
        }
        if let Some(level) = self.stderr_log_level {
            config.stderr_log_level = level;
        }
        if let Some(level) = self.file_log_level {
            config.file_log_level = level;
        }
    }
}

/// A method call waiting for the event loop, with the connection thread
/// blocked on `reply`.
struct PendingCall {
    call: MethodCall,
    reply: crossbeam_channel::Sender<MethodResponse>,
}

// Field order is drop order: the plugin stops its ticker and unregisters
// before the compositor goes away.
struct HostState {
    plugin: TextureTestPlugin,
    registry: Arc<SoftwareTextureRegistry>,
    compositor: Compositor,
    loop_signal: LoopSignal,
}

fn unavailable() -> MethodResponse {
    MethodResponse::error("unavailable", "host event loop has exited", Value::Null)
}

fn log_stats(state: &HostState) {
    let stats = state.compositor.stats();
    let notifications = state.plugin.ticker().map(|t| t.notifications());
    info!(
        texture = ?state.plugin.texture_id(),
        notifications = ?notifications,
        frames = stats.frames,
        dropped = stats.dropped,
        coalesced = state.registry.coalesced(),
        last_size = ?stats.last_size,
        "compositor stats"
    );

    #[cfg(feature = "tracy")]
    stats.plot(state.registry.coalesced());
}

pub fn main() -> Result<()> {
    let config = args::init_config::<ColorbarsdConfig, ColorbarsdArgs>().location(loc!())?;
    utils::configure_tracing(
        config.stderr_log_level.0,
        config.log_file.as_ref(),
        config.file_log_level.0,
    )
    .location(loc!())?;
    utils::exit_on_thread_panic();
    debug!("{config:?}");

    let (registry, compositor) = host::start(config.viewport).location(loc!())?;
    let plugin = TextureTestPlugin::new(registry.clone(), config.texture.clone());

    let mut event_loop: EventLoop<HostState> = EventLoop::try_new().location(loc!())?;
    let mut state = HostState {
        plugin,
        registry,
        compositor,
        loop_signal: event_loop.get_signal(),
    };

    let (calls_tx, calls_rx) = channel::channel::<PendingCall>();
    event_loop
        .handle()
        .insert_source(calls_rx, |event, _, state| {
            if let channel::Event::Msg(pending) = event {
                let response = state.plugin.handle_method_call(&pending.call);
                if pending.reply.send(response).is_err() {
                    debug!("caller of {:?} went away before the reply", pending.call.method);
                }
            }
        })
        .map_err(|e| anyhow!("insert_source(method calls) failed: {e:?}"))?;

    let stats_interval = Duration::from_secs(config.stats_interval_secs.max(1));
    event_loop
        .handle()
        .insert_source(Timer::from_duration(stats_interval), move |_, _, state| {
            log_stats(state);
            TimeoutAction::ToDuration(stats_interval)
        })
        .map_err(|e| anyhow!("insert_source(stats timer) failed: {e:?}"))?;

    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM]).location(loc!())?;
    event_loop
        .handle()
        .insert_source(signals, |event, _, state| {
            info!("received {:?}, shutting down", event.signal());
            state.loop_signal.stop();
        })
        .map_err(|e| anyhow!("insert_source(signals) failed: {e:?}"))?;

    control_server::start(&config.socket, move |call| {
        let (reply, response) = crossbeam_channel::bounded(1);
        if calls_tx.send(PendingCall { call, reply }).is_err() {
            return unavailable();
        }
        response.recv().unwrap_or_else(|_| unavailable())
    })
    .location(loc!())?;
    info!("serving {CHANNEL_NAME} on {:?}", config.socket);

    event_loop.run(None, &mut state, |_| {}).location(loc!())?;

    log_stats(&state);
    drop(state);
    std::fs::remove_file(&config.socket).log_and_ignore(loc!());
    Ok(())
}
