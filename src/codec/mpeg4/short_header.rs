// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Short video header (ISO/IEC 14496-2, 6.2.5.1), the H.263 baseline picture header carried
//! in MPEG-4 streams.

use anyhow::bail;
use bitreader::BitReader;

use crate::codec::mpeg4::parser::VopCodingType;
use crate::Resolution;

/// Value of the 22-bit `short_video_start_marker`.
pub const SHORT_VIDEO_START_MARKER: u32 = 0x20;
/// Value of the 22-bit `short_video_end_marker`.
pub const SHORT_VIDEO_END_MARKER: u32 = 0x3f;
/// Length of both markers, in bits.
pub const SHORT_VIDEO_MARKER_BITS: u8 = 22;

/// Picture size and GOB layout of an H.263 source format (Table 6-25).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SourceFormat {
    pub width: u16,
    pub height: u16,
    pub num_gobs_in_vop: u16,
    pub num_macroblocks_in_gob: u16,
}

impl SourceFormat {
    pub fn from_code(source_format: u8) -> Option<Self> {
        let (width, height, num_gobs_in_vop, num_macroblocks_in_gob) = match source_format {
            1 => (128, 96, 6, 8),
            2 => (176, 144, 9, 11),
            3 => (352, 288, 18, 22),
            4 => (704, 576, 18, 88),
            5 => (1408, 1152, 18, 352),
            _ => return None,
        };

        Some(Self {
            width,
            height,
            num_gobs_in_vop,
            num_macroblocks_in_gob,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShortVideoHeader {
    pub temporal_reference: u8,
    pub split_screen_indicator: bool,
    pub document_camera_indicator: bool,
    pub full_picture_freeze_release: bool,
    pub source_format: u8,
    /// 0 for intra pictures, 1 for predicted ones.
    pub picture_coding_type: u8,
    pub vop_quant: u8,
    /// PSUPP bytes announced by `pei`.
    pub psupp: Vec<u8>,
    pub vop_width: u16,
    pub vop_height: u16,
    pub num_gobs_in_vop: u16,
    pub num_macroblocks_in_gob: u16,
    /// Header size in bits, counted from the first byte of the start marker.
    pub size: usize,
}

impl ShortVideoHeader {
    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let mut r = BitReader::new(data);

        if r.read_u32(SHORT_VIDEO_MARKER_BITS)? != SHORT_VIDEO_START_MARKER {
            bail!("not a short video start marker");
        }

        let mut hdr = ShortVideoHeader {
            temporal_reference: r.read_u8(8)?,
            ..Default::default()
        };

        if !r.read_bool()? {
            bail!("missing marker bit after temporal_reference");
        }

        // zero_bit
        r.skip(1)?;

        hdr.split_screen_indicator = r.read_bool()?;
        hdr.document_camera_indicator = r.read_bool()?;
        hdr.full_picture_freeze_release = r.read_bool()?;

        hdr.source_format = r.read_u8(3)?;
        let format = match SourceFormat::from_code(hdr.source_format) {
            Some(format) => format,
            None => bail!("invalid source_format {}", hdr.source_format),
        };

        hdr.vop_width = format.width;
        hdr.vop_height = format.height;
        hdr.num_gobs_in_vop = format.num_gobs_in_vop;
        hdr.num_macroblocks_in_gob = format.num_macroblocks_in_gob;

        hdr.picture_coding_type = r.read_u8(1)?;
        // four_reserved_zero_bits
        r.skip(4)?;
        hdr.vop_quant = r.read_u8(5)?;
        // zero_bit
        r.skip(1)?;

        while r.read_bool()? {
            hdr.psupp.push(r.read_u8(8)?);
        }

        hdr.size = r.position() as usize;
        Ok(hdr)
    }

    pub fn picture_type(&self) -> VopCodingType {
        if self.picture_coding_type == 0 {
            VopCodingType::I
        } else {
            VopCodingType::P
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::from((u32::from(self.vop_width), u32::from(self.vop_height)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::mpeg4::parser::tests::bits;

    const MARKER: &str = "00000000 00000000 100000";

    #[test]
    fn parse_qcif_intra() {
        let data = bits(&format!(
            "{} 00000101 1 0 0 0 0 010 0 0000 01000 0 0 1111",
            MARKER
        ));
        let hdr = ShortVideoHeader::parse(&data).unwrap();

        assert_eq!(hdr.temporal_reference, 5);
        assert_eq!(hdr.source_format, 2);
        assert_eq!(hdr.picture_type(), VopCodingType::I);
        assert_eq!(hdr.vop_quant, 8);
        assert_eq!(hdr.resolution(), Resolution::from((176, 144)));
        assert_eq!(hdr.num_gobs_in_vop, 9);
        assert_eq!(hdr.num_macroblocks_in_gob, 11);
        assert!(hdr.psupp.is_empty());
        assert_eq!(hdr.size, 50);
    }

    #[test]
    fn parse_psupp() {
        let data = bits(&format!(
            "{} 11111110 1 0 0 1 1 011 1 0000 11111 0 1 10101010 1 00000001 0",
            MARKER
        ));
        let hdr = ShortVideoHeader::parse(&data).unwrap();

        assert_eq!(hdr.temporal_reference, 254);
        assert!(!hdr.split_screen_indicator);
        assert!(hdr.document_camera_indicator);
        assert!(hdr.full_picture_freeze_release);
        assert_eq!(hdr.picture_type(), VopCodingType::P);
        assert_eq!(hdr.vop_quant, 31);
        assert_eq!(hdr.resolution(), Resolution::from((352, 288)));
        assert_eq!(hdr.psupp, vec![0xaa, 0x01]);
        assert_eq!(hdr.size, 68);
    }

    #[test]
    fn parse_errors() {
        // Source format 0 is forbidden.
        let data = bits(&format!("{} 00000000 1 0 0 0 0 000 0 0000 01000 0 0", MARKER));
        assert!(ShortVideoHeader::parse(&data).is_err());

        // Missing marker bit.
        let data = bits(&format!("{} 00000000 0 0 0 0 0 010 0 0000 01000 0 0", MARKER));
        assert!(ShortVideoHeader::parse(&data).is_err());

        // End marker instead of a start marker.
        let data = bits("00000000 00000000 111111 00");
        assert!(ShortVideoHeader::parse(&data).is_err());

        // Truncated.
        let data = bits(&format!("{} 00000000 1 0 0", MARKER));
        assert!(ShortVideoHeader::parse(&data).is_err());
    }

    #[test]
    fn source_formats() {
        assert_eq!(SourceFormat::from_code(1).unwrap().width, 128);
        assert_eq!(SourceFormat::from_code(5).unwrap().num_macroblocks_in_gob, 352);
        assert!(SourceFormat::from_code(6).is_none());
        assert!(SourceFormat::from_code(7).is_none());
    }
}
