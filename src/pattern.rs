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

//! Color-bar test pattern in RGBA pixel buffers.

use std::fmt;

use bytemuck::Pod;
use bytemuck::Zeroable;
use static_assertions::assert_eq_size;

/// One RGBA pixel, laid out exactly as the host reads it.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Rgba(pub u8, pub u8, pub u8, pub u8);

assert_eq_size!(Rgba, u32);

impl Rgba {
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self(r, g, b, 0xFF)
    }
}

pub const NUM_BARS: usize = 8;

/// Bars from left to right: white, yellow, cyan, green, magenta, red, blue,
/// black.
pub const COLOR_BARS: [Rgba; NUM_BARS] = [
    Rgba::opaque(0xFF, 0xFF, 0xFF),
    Rgba::opaque(0xC0, 0xC0, 0x00),
    Rgba::opaque(0x00, 0xC0, 0xC0),
    Rgba::opaque(0x00, 0xC0, 0x00),
    Rgba::opaque(0xC0, 0x00, 0xC0),
    Rgba::opaque(0xC0, 0x00, 0x00),
    Rgba::opaque(0x00, 0x00, 0xC0),
    Rgba::opaque(0x00, 0x00, 0x00),
];

/// A fixed-size, tightly packed (stride == width * 4) RGBA image.
#[derive(Clone, Eq, PartialEq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    pixels: Box<[Rgba]>,
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl PixelBuffer {
    /// # Panics
    /// If `width * height * 4` overflows `usize`.
    pub fn new(width: usize, height: usize) -> Self {
        let len = width
            .checked_mul(height)
            .filter(|n| n.checked_mul(size_of::<Rgba>()).is_some())
            .unwrap_or_else(|| panic!("pixel buffer {width}x{height} is too large"));
        Self {
            width,
            height,
            pixels: vec![Rgba::default(); len].into_boxed_slice(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.width * size_of::<Rgba>()
    }

    pub fn pixels(&self) -> &[Rgba] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y * self.width + x).copied()
    }

    /// The raw bytes handed to the host, `width * height * 4` long.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [Rgba]> {
        // chunks_exact_mut rejects 0.
        self.pixels.chunks_exact_mut(self.width.max(1))
    }
}

/// Which bar column `x` falls into for an image `width` pixels wide.
///
/// Equal to `x / (width / 8)` when `width` is a multiple of 8 and always less
/// than `NUM_BARS`, so narrow or oddly sized buffers never index out of the
/// palette.
pub fn bar_index(x: usize, width: usize) -> usize {
    debug_assert!(x < width);
    x * NUM_BARS / width
}

/// Writes eight vertical color bars into `buffer`. Every row is identical.
/// With `mirrored` the palette is read right to left.
pub fn fill_color_bars(buffer: &mut PixelBuffer, mirrored: bool) {
    let width = buffer.width();
    if width == 0 {
        return;
    }

    let row: Vec<Rgba> = (0..width)
        .map(|x| {
            let index = bar_index(x, width);
            if mirrored {
                COLOR_BARS[NUM_BARS - 1 - index]
            } else {
                COLOR_BARS[index]
            }
        })
        .collect();

    for dst in buffer.rows_mut() {
        dst.copy_from_slice(&row);
    }
}

/// Allocates a buffer and fills it in one step.
pub fn color_bars(width: usize, height: usize, mirrored: bool) -> PixelBuffer {
    let mut buffer = PixelBuffer::new(width, height);
    fill_color_bars(&mut buffer, mirrored);
    buffer
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const WHITE: Rgba = COLOR_BARS[0];
    const BLACK: Rgba = COLOR_BARS[7];

    #[test]
    fn test_full_hd_corners() {
        let normal = color_bars(1920, 1080, false);
        let mirrored = color_bars(1920, 1080, true);

        assert_eq!(normal.pixel(0, 0), Some(WHITE));
        assert_eq!(normal.pixel(1919, 0), Some(BLACK));
        assert_eq!(normal.pixel(1919, 1079), Some(BLACK));
        assert_eq!(mirrored.pixel(0, 0), Some(BLACK));
        assert_eq!(mirrored.pixel(1919, 1079), Some(WHITE));
    }

    #[test]
    fn test_full_hd_band_edges() {
        let buffer = color_bars(1920, 1080, false);
        for (band, color) in COLOR_BARS.iter().enumerate() {
            let first = band * 240;
            let last = first + 239;
            assert_eq!(buffer.pixel(first, 500), Some(*color));
            assert_eq!(buffer.pixel(last, 500), Some(*color));
        }
    }

    #[test]
    fn test_byte_layout() {
        let buffer = color_bars(16, 2, false);
        assert_eq!(buffer.as_bytes().len(), 16 * 2 * 4);
        assert_eq!(buffer.stride(), 64);
        // Second bar is yellow: R, G, B, A.
        assert_eq!(&buffer.as_bytes()[8..12], &[0xC0, 0xC0, 0x00, 0xFF]);
    }

    #[test]
    fn test_narrower_than_palette() {
        let buffer = color_bars(3, 1, false);
        assert_eq!(buffer.pixel(0, 0), Some(COLOR_BARS[0]));
        assert_eq!(buffer.pixel(1, 0), Some(COLOR_BARS[2]));
        assert_eq!(buffer.pixel(2, 0), Some(COLOR_BARS[5]));
    }

    #[test]
    fn test_empty_buffers() {
        assert!(color_bars(0, 10, false).as_bytes().is_empty());
        assert!(color_bars(10, 0, true).as_bytes().is_empty());
    }

    #[test]
    fn test_pixel_out_of_bounds() {
        let buffer = color_bars(8, 8, false);
        assert_eq!(buffer.pixel(8, 0), None);
        assert_eq!(buffer.pixel(0, 8), None);
    }

    proptest! {
        #[test]
        fn proptest_columns_follow_palette(
            width in 1usize..300,
            height in 1usize..20,
            mirrored in any::<bool>(),
        ) {
            let buffer = color_bars(width, height, mirrored);
            prop_assert_eq!(buffer.as_bytes().len(), width * height * 4);
            for y in 0..height {
                for x in 0..width {
                    let index = x * 8 / width;
                    let expected = if mirrored { COLOR_BARS[7 - index] } else { COLOR_BARS[index] };
                    prop_assert_eq!(buffer.pixel(x, y), Some(expected));
                }
            }
        }
    }
}
