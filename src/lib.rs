// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! MPEG-4 Part 2 and H.263 (short video header) stateless decoding core.
//!
//! The crate walks start-code delimited elementary streams, parses their headers, rebuilds
//! presentation timestamps and reference ordering, and hands the assembled pictures to a
//! [backend](crate::backend) through the [`decoder::stateless`] machinery.

pub mod backend;
pub mod bitstream_utils;
pub mod codec;
pub mod decoder;
pub mod utils;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Number of 16x16 macroblocks needed to cover this resolution.
    pub fn macroblock_count(&self) -> u32 {
        ((self.width + 15) / 16) * ((self.height + 15) / 16)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

impl From<Resolution> for (u32, u32) {
    fn from(value: Resolution) -> Self {
        (value.width, value.height)
    }
}

/// A frame rate expressed as a fraction of frames per second.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

/// Pixel aspect ratio, i.e. the shape of a single decoded sample.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PixelAspectRatio {
    pub width: u32,
    pub height: u32,
}

impl Default for PixelAspectRatio {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macroblock_count() {
        assert_eq!(Resolution::from((176, 144)).macroblock_count(), 99);
        assert_eq!(Resolution::from((130, 98)).macroblock_count(), 63);
        assert_eq!(Resolution::from((16, 16)).macroblock_count(), 1);
    }
}
