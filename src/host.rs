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

//! An in-process stand-in for a UI engine's texture subsystem.
//!
//! [`SoftwareTextureRegistry`] hands out texture ids and forwards
//! frame-available notifications to a [`Compositor`] thread, which pulls the
//! frame from the texture the same way an engine's raster thread would.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::TrySendError;
use crossbeam_channel::select;

use crate::pattern::Rgba;
use crate::prelude::*;
use crate::texture::PixelBufferTexture;
use crate::texture::TextureId;
use crate::texture::TextureRegistry;

/// Pending frame notifications beyond this are coalesced.
const FRAME_QUEUE_DEPTH: usize = 8;

type TextureMap = HashMap<TextureId, Arc<dyn PixelBufferTexture>>;

pub struct SoftwareTextureRegistry {
    next_id: AtomicI64,
    textures: Arc<RwLock<TextureMap>>,
    frames_tx: Sender<TextureId>,
    coalesced: AtomicU64,
}

impl SoftwareTextureRegistry {
    pub fn len(&self) -> usize {
        self.textures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: TextureId) -> bool {
        self.textures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Notifications dropped because the compositor was behind.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}

impl TextureRegistry for SoftwareTextureRegistry {
    fn register_texture(&self, texture: Arc<dyn PixelBufferTexture>) -> Result<TextureId> {
        let id = TextureId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.textures
            .write()
            .map_err(|_| anyhow!("texture map poisoned"))?
            .insert(id, texture);
        debug!("registered texture {id}");
        Ok(id)
    }

    fn unregister_texture(&self, id: TextureId) -> Result<()> {
        match self
            .textures
            .write()
            .map_err(|_| anyhow!("texture map poisoned"))?
            .remove(&id)
        {
            Some(_) => {
                debug!("unregistered texture {id}");
                Ok(())
            },
            None => bail!("texture {id} is not registered"),
        }
    }

    fn mark_texture_frame_available(&self, id: TextureId) -> Result<()> {
        match self.frames_tx.try_send(id) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(TrySendError::Disconnected(_)) => bail!("compositor has shut down"),
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct CompositorStats {
    /// Frames pulled from textures.
    pub frames: u64,
    /// Notifications for ids that were no longer registered.
    pub dropped: u64,
    pub bytes: u64,
    pub last_texture: Option<TextureId>,
    pub last_size: Option<(usize, usize)>,
    /// Top-left pixel of the last frame pulled.
    pub last_origin: Option<Rgba>,
}

impl CompositorStats {
    /// Plots the counters in Tracy. Does nothing unless a Tracy client is
    /// running.
    #[cfg(feature = "tracy")]
    pub fn plot(&self, coalesced: u64) {
        if let Some(tracy_client) = tracy_client::Client::running() {
            tracy_client.plot(
                tracy_client::plot_name!("composited_frames"),
                self.frames as f64,
            );
            tracy_client.plot(
                tracy_client::plot_name!("dropped_frames"),
                self.dropped as f64,
            );
            tracy_client.plot(
                tracy_client::plot_name!("coalesced_notifications"),
                coalesced as f64,
            );
        }
    }
}

/// Thread that pulls a frame each time a texture is marked available.
pub struct Compositor {
    stats: Arc<Mutex<CompositorStats>>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Compositor {
    pub fn stats(&self) -> CompositorStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("compositor thread panicked");
            }
        }
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Creates a registry and the compositor that consumes its notifications.
/// The compositor requests frames of `viewport` size.
pub fn start(viewport: (usize, usize)) -> Result<(Arc<SoftwareTextureRegistry>, Compositor)> {
    let (frames_tx, frames_rx) = crossbeam_channel::bounded(FRAME_QUEUE_DEPTH);
    let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
    let textures = Arc::new(RwLock::new(TextureMap::new()));
    let stats = Arc::new(Mutex::new(CompositorStats::default()));

    let handle = {
        let textures = textures.clone();
        let stats = stats.clone();
        thread::Builder::new()
            .name("compositor".to_string())
            .spawn(move || composite_loop(&textures, &frames_rx, &stop_rx, &stats, viewport))
            .location(loc!())?
    };

    let registry = Arc::new(SoftwareTextureRegistry {
        next_id: AtomicI64::new(0),
        textures,
        frames_tx,
        coalesced: AtomicU64::new(0),
    });
    let compositor = Compositor {
        stats,
        stop_tx: Some(stop_tx),
        handle: Some(handle),
    };
    Ok((registry, compositor))
}

fn composite_loop(
    textures: &RwLock<TextureMap>,
    frames_rx: &Receiver<TextureId>,
    stop_rx: &Receiver<()>,
    stats: &Mutex<CompositorStats>,
    (width, height): (usize, usize),
) {
    loop {
        let id = select! {
            recv(stop_rx) -> _ => return,
            recv(frames_rx) -> msg => match msg {
                Ok(id) => id,
                Err(_) => return,
            },
        };

        let texture = textures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        let mut stats = stats.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(texture) = texture else {
            trace!("frame available for unregistered texture {id}");
            stats.dropped += 1;
            continue;
        };

        let frame = texture.copy_pixel_buffer(width, height);
        stats.frames += 1;
        stats.bytes += frame.as_bytes().len() as u64;
        stats.last_texture = Some(id);
        stats.last_size = Some((frame.width(), frame.height()));
        stats.last_origin = frame.pixel(0, 0);
    }
}
