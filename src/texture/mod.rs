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

//! The seam between texture producers and the host that composites them.
//!
//! A host owns a [`TextureRegistry`]. Producers register a
//! [`PixelBufferTexture`], receive a [`TextureId`], and call
//! [`TextureRegistry::mark_texture_frame_available`] whenever the host should
//! pull a new frame. The host pulls on its own schedule, from its own thread,
//! by calling [`PixelBufferTexture::copy_pixel_buffer`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::pattern::PixelBuffer;
use crate::prelude::*;

pub mod color_bar;
pub mod ticker;

pub use color_bar::ColorBarTexture;
pub use color_bar::FrameStrategy;
pub use ticker::FrameTicker;

/// Opaque handle issued by a [`TextureRegistry`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextureId(pub i64);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A texture the host pulls CPU pixel data from.
pub trait PixelBufferTexture: Send + Sync {
    /// Returns the frame to composite. `width` and `height` are the size the
    /// host would like; implementations may ignore them.
    fn copy_pixel_buffer(&self, width: usize, height: usize) -> &PixelBuffer;
}

pub trait TextureRegistry: Send + Sync {
    fn register_texture(&self, texture: Arc<dyn PixelBufferTexture>) -> Result<TextureId>;

    fn unregister_texture(&self, id: TextureId) -> Result<()>;

    fn mark_texture_frame_available(&self, id: TextureId) -> Result<()>;
}

/// Frame rates above 1000 Hz are clamped to this interval.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Parameters for the color-bar texture created on `initialize`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    pub width: usize,
    pub height: usize,
    /// Frame-available notifications per second.
    pub frame_rate: u32,
    pub frame_strategy: FrameStrategy,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 50,
            frame_strategy: FrameStrategy::Static,
        }
    }
}

impl TextureConfig {
    /// Time between frame notifications, never shorter than
    /// `MIN_TICK_INTERVAL`.
    pub fn tick_interval(&self) -> Duration {
        (Duration::from_secs(1) / self.frame_rate.max(1)).max(MIN_TICK_INTERVAL)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!(
                "texture dimensions must be non-zero, got {}x{}",
                self.width,
                self.height
            );
        }
        Ok(())
    }
}
