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

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::pattern;
use crate::pattern::PixelBuffer;
use crate::prelude::*;
use crate::texture::PixelBufferTexture;

/// Which of the two pre-rendered frames a pull returns.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
pub enum FrameStrategy {
    /// Always the primary (unmirrored) frame.
    Static,
    /// The mirrored frame on even-numbered pulls, the primary on odd ones.
    Alternating,
}

/// Two color-bar frames, rendered once at construction and never written
/// again, so pulls from any thread only ever read.
#[derive(Debug)]
pub struct ColorBarTexture {
    primary: PixelBuffer,
    alternate: PixelBuffer,
    strategy: FrameStrategy,
    request_count: AtomicUsize,
}

impl ColorBarTexture {
    #[instrument(level = "debug")]
    pub fn new(width: usize, height: usize, strategy: FrameStrategy) -> Self {
        Self {
            primary: pattern::color_bars(width, height, false),
            alternate: pattern::color_bars(width, height, true),
            strategy,
            request_count: AtomicUsize::new(0),
        }
    }

    pub fn width(&self) -> usize {
        self.primary.width()
    }

    pub fn height(&self) -> usize {
        self.primary.height()
    }

    pub fn strategy(&self) -> FrameStrategy {
        self.strategy
    }

    pub fn primary(&self) -> &PixelBuffer {
        &self.primary
    }

    pub fn alternate(&self) -> &PixelBuffer {
        &self.alternate
    }

    /// Number of frames pulled so far.
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    fn current_frame(&self) -> &PixelBuffer {
        let n = self.request_count.fetch_add(1, Ordering::Relaxed);
        match self.strategy {
            FrameStrategy::Static => &self.primary,
            FrameStrategy::Alternating if n % 2 == 0 => &self.alternate,
            FrameStrategy::Alternating => &self.primary,
        }
    }
}

impl PixelBufferTexture for ColorBarTexture {
    fn copy_pixel_buffer(&self, width: usize, height: usize) -> &PixelBuffer {
        if (width, height) != (self.width(), self.height()) {
            trace!(
                "requested {width}x{height}, serving {}x{}",
                self.width(),
                self.height()
            );
        }
        self.current_frame()
    }
}
