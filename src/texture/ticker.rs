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

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::select;

use crate::prelude::*;
use crate::texture::TextureId;
use crate::texture::TextureRegistry;

/// Background thread telling a registry, at a fixed interval, that a texture
/// has a new frame.
///
/// The first notification is sent as soon as the thread starts. The thread
/// exits when [`FrameTicker::stop`] is called or the ticker is dropped.
#[derive(Debug)]
pub struct FrameTicker {
    texture_id: TextureId,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    notifications: Arc<AtomicU64>,
}

impl FrameTicker {
    pub fn start(
        registry: Arc<dyn TextureRegistry>,
        texture_id: TextureId,
        interval: Duration,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        let notifications = Arc::new(AtomicU64::new(0));

        let handle = {
            let notifications = notifications.clone();
            thread::Builder::new()
                .name(format!("frame-ticker-{texture_id}"))
                .spawn(move || {
                    tick_loop(&*registry, texture_id, interval, &stop_rx, &notifications)
                })
                .location(loc!())?
        };
        debug!("started frame ticker for texture {texture_id} every {interval:?}");

        Ok(Self {
            texture_id,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            notifications,
        })
    }

    pub fn texture_id(&self) -> TextureId {
        self.texture_id
    }

    /// Notifications delivered to the registry so far.
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the thread and waits for it to exit. Idempotent.
    pub fn stop(&mut self) {
        // Disconnecting the channel is the stop signal.
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("frame ticker for texture {} panicked", self.texture_id);
            } else {
                debug!(
                    "stopped frame ticker for texture {} after {} notifications",
                    self.texture_id,
                    self.notifications()
                );
            }
        }
    }
}

impl Drop for FrameTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick_loop(
    registry: &dyn TextureRegistry,
    texture_id: TextureId,
    interval: Duration,
    stop_rx: &Receiver<()>,
    notifications: &AtomicU64,
) {
    let ticks = crossbeam_channel::tick(interval);
    loop {
        if registry
            .mark_texture_frame_available(texture_id)
            .debug(loc!())
            .is_ok()
        {
            notifications.fetch_add(1, Ordering::Relaxed);
        }

        select! {
            recv(stop_rx) -> _ => return,
            recv(ticks) -> _ => {},
        }
    }
}
