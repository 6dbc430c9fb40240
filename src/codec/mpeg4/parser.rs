// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Header parsers for MPEG-4 Part 2 visual streams (ISO/IEC 14496-2, 6.2).
//!
//! All parsers take the packet bytes starting at the start code value byte, as returned by
//! [`Packet`](crate::codec::mpeg4::packet::Packet), and are free of side effects.

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Context;
use bitreader::BitReader;
use enumn::N;

use crate::codec::mpeg4::packet::resync_marker_len;
use crate::codec::mpeg4::packet::GROUP_OF_VOP_START_CODE;
use crate::codec::mpeg4::packet::VISUAL_OBJECT_SEQUENCE_START_CODE;
use crate::codec::mpeg4::packet::VISUAL_OBJECT_START_CODE;
use crate::codec::mpeg4::packet::VOP_START_CODE;
use crate::FrameRate;
use crate::PixelAspectRatio;
use crate::Resolution;

/// `aspect_ratio_info` value signalling an explicit pixel aspect ratio.
pub const EXTENDED_PAR: u8 = 0xf;

/// Maximum number of sprite warping points.
pub const MAX_SPRITE_WARPING_POINTS: usize = 4;

/// Zigzag scan order: entry `i` is the raster position of the `i`-th transmitted coefficient.
pub const ZIGZAG_SCAN: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27, 20,
    13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58, 59,
    52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// Default intra quantisation matrix, raster order (6.3.3).
pub const DEFAULT_INTRA_QUANT_MAT: [u8; 64] = [
    8, 17, 18, 19, 21, 23, 25, 27, 17, 18, 19, 21, 23, 25, 27, 28, 20, 21, 22, 23, 24, 26, 28, 30,
    21, 22, 23, 24, 26, 28, 30, 32, 22, 23, 24, 26, 28, 30, 32, 35, 23, 24, 26, 28, 30, 32, 35, 38,
    25, 26, 28, 30, 32, 35, 38, 41, 27, 28, 30, 32, 35, 38, 41, 45,
];

/// Default non-intra quantisation matrix, raster order (6.3.3).
pub const DEFAULT_NON_INTRA_QUANT_MAT: [u8; 64] = [
    16, 17, 18, 19, 20, 21, 22, 23, 17, 18, 19, 20, 21, 22, 23, 24, 18, 19, 20, 21, 22, 23, 24, 25,
    19, 20, 21, 22, 23, 24, 26, 27, 20, 21, 22, 23, 25, 26, 27, 28, 21, 22, 23, 24, 26, 27, 28, 30,
    22, 23, 24, 26, 27, 28, 30, 31, 23, 24, 25, 27, 28, 30, 31, 33,
];

/// Reorders a raster-order matrix into transmission (zigzag) order.
pub fn to_zigzag(raster: &[u8; 64]) -> [u8; 64] {
    let mut out = [0; 64];
    for (i, &pos) in ZIGZAG_SCAN.iter().enumerate() {
        out[i] = raster[pos];
    }
    out
}

/// Number of bits needed to code any value in `0..=max`, with a minimum of one.
pub fn bits_for_max(max: u32) -> u8 {
    (u32::BITS - max.leading_zeros()).max(1) as u8
}

/// Length of the `macroblock_number` field of video packet headers for a VOP of
/// `macroblock_count` macroblocks.
pub fn macroblock_number_bits(macroblock_count: u32) -> u8 {
    bits_for_max(macroblock_count.saturating_sub(1))
}

fn read_marker(r: &mut BitReader) -> anyhow::Result<()> {
    let position = r.position();
    if !r.read_bool()? {
        bail!("missing marker bit at bit {}", position);
    }

    Ok(())
}

/// Reads the NEWPRED fields of a VOP or video packet header: `vop_id`, then
/// `vop_id_for_prediction` if it is present.
fn read_newpred_ids(
    r: &mut BitReader,
    vol: &VideoObjectLayer,
) -> anyhow::Result<(u16, Option<u16>)> {
    let bits = vol.vop_id_bits();
    let vop_id = r.read_u16(bits)?;
    let vop_id_for_prediction = if r.read_bool()? {
        Some(r.read_u16(bits)?)
    } else {
        None
    };
    read_marker(r)?;

    Ok((vop_id, vop_id_for_prediction))
}

fn check_start_code(r: &mut BitReader, expected: u8) -> anyhow::Result<()> {
    let code = r.read_u8(8)?;
    if code != expected {
        bail!(
            "unexpected start code value {:#04x}, expected {:#04x}",
            code,
            expected
        );
    }

    Ok(())
}

/// Reads `modulo_time_base`, a run of one bits closed by a zero.
fn read_modulo_time_base(r: &mut BitReader) -> anyhow::Result<u32> {
    let mut modulo_time_base = 0;
    while r.read_bool()? {
        modulo_time_base += 1;
    }

    Ok(modulo_time_base)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
pub enum VopCodingType {
    I = 0,
    P = 1,
    B = 2,
    S = 3,
}

/// Visual profiles, as signalled by `profile_and_level_indication` (Table G-1).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum VisualProfile {
    #[default]
    Simple,
    SimpleScalable,
    Core,
    Main,
    AdvancedRealTimeSimple,
    AdvancedCodingEfficiency,
    AdvancedSimple,
    FineGranularityScalable,
    Other(u8),
}

impl VisualProfile {
    /// Splits a `profile_and_level_indication` into a profile and a level.
    pub fn from_indication(indication: u8) -> (Self, u8) {
        match indication {
            0x08 => (VisualProfile::Simple, 0),
            0x01..=0x06 => (VisualProfile::Simple, indication),
            0x10..=0x12 => (VisualProfile::SimpleScalable, indication & 0x0f),
            0x21..=0x22 => (VisualProfile::Core, indication & 0x0f),
            0x32..=0x34 => (VisualProfile::Main, indication & 0x0f),
            0x91..=0x94 => (VisualProfile::AdvancedRealTimeSimple, indication & 0x0f),
            0xb1..=0xb4 => (VisualProfile::AdvancedCodingEfficiency, indication & 0x0f),
            // Level 3b.
            0xf7 => (VisualProfile::AdvancedSimple, 3),
            0xf0..=0xf5 => (VisualProfile::AdvancedSimple, indication & 0x0f),
            0xf8..=0xfd => (VisualProfile::FineGranularityScalable, indication - 0xf8),
            _ => (VisualProfile::Other(indication), 0),
        }
    }
}

/// Visual object sequence header (6.2.2).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisualObjectSequence {
    pub profile_and_level_indication: u8,
    pub profile: VisualProfile,
    pub level: u8,
}

impl VisualObjectSequence {
    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let mut r = BitReader::new(data);
        check_start_code(&mut r, VISUAL_OBJECT_SEQUENCE_START_CODE)?;

        let profile_and_level_indication = r.read_u8(8)?;
        let (profile, level) = VisualProfile::from_indication(profile_and_level_indication);

        Ok(Self {
            profile_and_level_indication,
            profile,
            level,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
pub enum VisualObjectType {
    Video = 1,
    StillTexture = 2,
    Mesh = 3,
    Fba = 4,
    Mesh3d = 5,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColourDescription {
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoSignalType {
    pub video_format: u8,
    pub video_range: bool,
    pub colour_description: Option<ColourDescription>,
}

/// Visual object header (6.2.2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisualObject {
    pub is_visual_object_identifier: bool,
    pub verid: u8,
    pub priority: u8,
    pub visual_object_type: u8,
    pub video_signal_type: Option<VideoSignalType>,
}

impl Default for VisualObject {
    fn default() -> Self {
        Self {
            is_visual_object_identifier: false,
            verid: 1,
            priority: 0,
            visual_object_type: VisualObjectType::Video as u8,
            video_signal_type: None,
        }
    }
}

impl VisualObject {
    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let mut r = BitReader::new(data);
        check_start_code(&mut r, VISUAL_OBJECT_START_CODE)?;

        let mut vo = VisualObject {
            is_visual_object_identifier: r.read_bool()?,
            ..Default::default()
        };

        if vo.is_visual_object_identifier {
            vo.verid = r.read_u8(4)?;
            vo.priority = r.read_u8(3)?;
        }

        vo.visual_object_type = r.read_u8(4)?;

        if matches!(
            VisualObjectType::n(vo.visual_object_type),
            Some(VisualObjectType::Video) | Some(VisualObjectType::StillTexture)
        ) && r.read_bool()?
        {
            let mut signal_type = VideoSignalType {
                video_format: r.read_u8(3)?,
                video_range: r.read_bool()?,
                colour_description: None,
            };

            if r.read_bool()? {
                signal_type.colour_description = Some(ColourDescription {
                    colour_primaries: r.read_u8(8)?,
                    transfer_characteristics: r.read_u8(8)?,
                    matrix_coefficients: r.read_u8(8)?,
                });
            }

            vo.video_signal_type = Some(signal_type);
        }

        Ok(vo)
    }

    pub fn object_type(&self) -> Option<VisualObjectType> {
        VisualObjectType::n(self.visual_object_type)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum VolShape {
    #[default]
    Rectangular = 0,
    Binary = 1,
    BinaryOnly = 2,
    Grayscale = 3,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum SpriteEnable {
    #[default]
    Unused = 0,
    Static = 1,
    Gmc = 2,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VbvParameters {
    /// 30-bit bit rate, in units of 400 bits/s.
    pub bit_rate: u32,
    /// 18-bit buffer size, in units of 16384 bits.
    pub buffer_size: u32,
    /// 26-bit initial occupancy, in units of 64 bits.
    pub occupancy: u32,
}

/// Video object layer header (6.2.3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoObjectLayer {
    pub random_accessible_vol: bool,
    pub video_object_type_indication: u8,
    pub is_object_layer_identifier: bool,
    pub verid: u8,
    pub priority: u8,
    pub aspect_ratio_info: u8,
    pub par_width: u8,
    pub par_height: u8,
    pub control_parameters: bool,
    pub chroma_format: u8,
    pub low_delay: bool,
    pub vbv_parameters: Option<VbvParameters>,
    pub shape: VolShape,
    pub vop_time_increment_resolution: u16,
    pub fixed_vop_rate: bool,
    pub fixed_vop_time_increment: u16,
    pub width: u16,
    pub height: u16,
    pub interlaced: bool,
    pub obmc_disable: bool,
    pub sprite_enable: SpriteEnable,
    pub sprite_width: u16,
    pub sprite_height: u16,
    pub sprite_left_coordinate: u16,
    pub sprite_top_coordinate: u16,
    pub no_of_sprite_warping_points: u8,
    pub sprite_warping_accuracy: u8,
    pub sprite_brightness_change: bool,
    pub low_latency_sprite_enable: bool,
    pub not_8_bit: bool,
    pub quant_precision: u8,
    pub bits_per_pixel: u8,
    pub quant_type: bool,
    pub load_intra_quant_mat: bool,
    /// Intra matrix in zigzag order.
    pub intra_quant_mat: [u8; 64],
    pub load_non_intra_quant_mat: bool,
    /// Non-intra matrix in zigzag order.
    pub non_intra_quant_mat: [u8; 64],
    pub quarter_sample: bool,
    pub complexity_estimation_disable: bool,
    pub resync_marker_disable: bool,
    pub data_partitioned: bool,
    pub reversible_vlc: bool,
    pub newpred_enable: bool,
    pub requested_upstream_message_type: u8,
    pub newpred_segment_type: bool,
    pub reduced_resolution_vop_enable: bool,
    pub scalability: bool,
}

impl Default for VideoObjectLayer {
    fn default() -> Self {
        Self {
            random_accessible_vol: false,
            video_object_type_indication: 1,
            is_object_layer_identifier: false,
            verid: 1,
            priority: 0,
            aspect_ratio_info: 1,
            par_width: 0,
            par_height: 0,
            control_parameters: false,
            chroma_format: 1,
            low_delay: false,
            vbv_parameters: None,
            shape: VolShape::Rectangular,
            vop_time_increment_resolution: 1,
            fixed_vop_rate: false,
            fixed_vop_time_increment: 0,
            width: 0,
            height: 0,
            interlaced: false,
            obmc_disable: true,
            sprite_enable: SpriteEnable::Unused,
            sprite_width: 0,
            sprite_height: 0,
            sprite_left_coordinate: 0,
            sprite_top_coordinate: 0,
            no_of_sprite_warping_points: 0,
            sprite_warping_accuracy: 0,
            sprite_brightness_change: false,
            low_latency_sprite_enable: false,
            not_8_bit: false,
            quant_precision: 5,
            bits_per_pixel: 8,
            quant_type: false,
            load_intra_quant_mat: false,
            intra_quant_mat: to_zigzag(&DEFAULT_INTRA_QUANT_MAT),
            load_non_intra_quant_mat: false,
            non_intra_quant_mat: to_zigzag(&DEFAULT_NON_INTRA_QUANT_MAT),
            quarter_sample: false,
            complexity_estimation_disable: true,
            resync_marker_disable: true,
            data_partitioned: false,
            reversible_vlc: false,
            newpred_enable: false,
            requested_upstream_message_type: 0,
            newpred_segment_type: false,
            reduced_resolution_vop_enable: false,
            scalability: false,
        }
    }
}

impl VideoObjectLayer {
    /// Parses a VOL header. `vo` provides the default `verid` when the layer does not carry its
    /// own identifier.
    pub fn parse(data: &[u8], vo: Option<&VisualObject>) -> anyhow::Result<Self> {
        let mut r = BitReader::new(data);

        let code = r.read_u8(8)?;
        if !(0x20..=0x2f).contains(&code) {
            bail!("not a video object layer start code: {:#04x}", code);
        }

        let mut vol = VideoObjectLayer {
            random_accessible_vol: r.read_bool()?,
            video_object_type_indication: r.read_u8(8)?,
            is_object_layer_identifier: r.read_bool()?,
            ..Default::default()
        };

        if vol.is_object_layer_identifier {
            vol.verid = r.read_u8(4)?;
            vol.priority = r.read_u8(3)?;
        } else {
            vol.verid = vo.map_or(1, |vo| vo.verid);
        }

        vol.aspect_ratio_info = r.read_u8(4)?;
        if vol.aspect_ratio_info == EXTENDED_PAR {
            vol.par_width = r.read_u8(8)?;
            vol.par_height = r.read_u8(8)?;
        }

        vol.control_parameters = r.read_bool()?;
        if vol.control_parameters {
            vol.chroma_format = r.read_u8(2)?;
            vol.low_delay = r.read_bool()?;
            if r.read_bool()? {
                vol.vbv_parameters = Some(Self::parse_vbv_parameters(&mut r)?);
            }
        }

        let shape = r.read_u8(2)?;
        vol.shape = VolShape::n(shape).ok_or(anyhow!("invalid shape {}", shape))?;
        if vol.shape != VolShape::Rectangular {
            bail!("unsupported video object layer shape {:?}", vol.shape);
        }

        read_marker(&mut r)?;
        vol.vop_time_increment_resolution = r.read_u16(16)?;
        if vol.vop_time_increment_resolution == 0 {
            bail!("vop_time_increment_resolution cannot be 0");
        }
        read_marker(&mut r)?;

        vol.fixed_vop_rate = r.read_bool()?;
        if vol.fixed_vop_rate {
            vol.fixed_vop_time_increment = r.read_u16(vol.vop_time_increment_bits())?;
        }

        read_marker(&mut r)?;
        vol.width = r.read_u16(13)?;
        read_marker(&mut r)?;
        vol.height = r.read_u16(13)?;
        read_marker(&mut r)?;

        vol.interlaced = r.read_bool()?;
        vol.obmc_disable = r.read_bool()?;

        let sprite_enable = if vol.verid == 1 {
            r.read_u8(1)?
        } else {
            r.read_u8(2)?
        };
        vol.sprite_enable = SpriteEnable::n(sprite_enable)
            .ok_or(anyhow!("invalid sprite_enable {}", sprite_enable))?;

        if vol.sprite_enable != SpriteEnable::Unused {
            Self::parse_sprite_parameters(&mut r, &mut vol)?;
        }

        vol.not_8_bit = r.read_bool()?;
        if vol.not_8_bit {
            vol.quant_precision = r.read_u8(4)?;
            vol.bits_per_pixel = r.read_u8(4)?;
        }

        vol.quant_type = r.read_bool()?;
        if vol.quant_type {
            vol.load_intra_quant_mat = r.read_bool()?;
            if vol.load_intra_quant_mat {
                Self::parse_quant_matrix(&mut r, &mut vol.intra_quant_mat)
                    .context("while parsing the intra quantisation matrix")?;
            }

            vol.load_non_intra_quant_mat = r.read_bool()?;
            if vol.load_non_intra_quant_mat {
                Self::parse_quant_matrix(&mut r, &mut vol.non_intra_quant_mat)
                    .context("while parsing the non-intra quantisation matrix")?;
            }
        }

        if vol.verid != 1 {
            vol.quarter_sample = r.read_bool()?;
        }

        vol.complexity_estimation_disable = r.read_bool()?;
        if !vol.complexity_estimation_disable {
            bail!("complexity estimation headers are not supported");
        }

        vol.resync_marker_disable = r.read_bool()?;
        vol.data_partitioned = r.read_bool()?;
        if vol.data_partitioned {
            vol.reversible_vlc = r.read_bool()?;
        }

        if vol.verid != 1 {
            vol.newpred_enable = r.read_bool()?;
            if vol.newpred_enable {
                vol.requested_upstream_message_type = r.read_u8(2)?;
                vol.newpred_segment_type = r.read_bool()?;
            }
            vol.reduced_resolution_vop_enable = r.read_bool()?;
        }

        vol.scalability = r.read_bool()?;
        if vol.scalability {
            bail!("scalable video object layers are not supported");
        }

        Ok(vol)
    }

    fn parse_vbv_parameters(r: &mut BitReader) -> anyhow::Result<VbvParameters> {
        let first_half_bit_rate = r.read_u32(15)?;
        read_marker(r)?;
        let latter_half_bit_rate = r.read_u32(15)?;
        read_marker(r)?;
        let first_half_vbv_buffer_size = r.read_u32(15)?;
        read_marker(r)?;
        let latter_half_vbv_buffer_size = r.read_u32(3)?;
        let first_half_vbv_occupancy = r.read_u32(11)?;
        read_marker(r)?;
        let latter_half_vbv_occupancy = r.read_u32(15)?;
        read_marker(r)?;

        Ok(VbvParameters {
            bit_rate: (first_half_bit_rate << 15) | latter_half_bit_rate,
            buffer_size: (first_half_vbv_buffer_size << 3) | latter_half_vbv_buffer_size,
            occupancy: (first_half_vbv_occupancy << 15) | latter_half_vbv_occupancy,
        })
    }

    fn parse_sprite_parameters(r: &mut BitReader, vol: &mut Self) -> anyhow::Result<()> {
        if vol.sprite_enable != SpriteEnable::Gmc {
            vol.sprite_width = r.read_u16(13)?;
            read_marker(r)?;
            vol.sprite_height = r.read_u16(13)?;
            read_marker(r)?;
            vol.sprite_left_coordinate = r.read_u16(13)?;
            read_marker(r)?;
            vol.sprite_top_coordinate = r.read_u16(13)?;
            read_marker(r)?;
        }

        vol.no_of_sprite_warping_points = r.read_u8(6)?;
        if usize::from(vol.no_of_sprite_warping_points) > MAX_SPRITE_WARPING_POINTS {
            bail!(
                "too many sprite warping points: {}",
                vol.no_of_sprite_warping_points
            );
        }

        vol.sprite_warping_accuracy = r.read_u8(2)?;
        vol.sprite_brightness_change = r.read_bool()?;
        if vol.sprite_enable != SpriteEnable::Gmc {
            vol.low_latency_sprite_enable = r.read_bool()?;
        }

        Ok(())
    }

    /// Reads up to 64 zigzag-ordered values. A 0 ends the matrix early, in which case the last
    /// value is repeated until the end.
    fn parse_quant_matrix(r: &mut BitReader, matrix: &mut [u8; 64]) -> anyhow::Result<()> {
        let mut last = 0;

        for i in 0..64 {
            let value = r.read_u8(8)?;
            if value == 0 {
                if i == 0 {
                    bail!("a quantisation matrix cannot start with 0");
                }

                matrix[i..].fill(last);
                return Ok(());
            }

            matrix[i] = value;
            last = value;
        }

        Ok(())
    }

    /// Length in bits of `vop_time_increment` fields.
    pub fn vop_time_increment_bits(&self) -> u8 {
        bits_for_max(u32::from(self.vop_time_increment_resolution).saturating_sub(1))
    }

    /// Length in bits of the NEWPRED `vop_id` fields.
    pub fn vop_id_bits(&self) -> u8 {
        (self.vop_time_increment_bits() + 3).min(15)
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::from((u32::from(self.width), u32::from(self.height)))
    }

    pub fn macroblock_count(&self) -> u32 {
        self.resolution().macroblock_count()
    }

    /// The frame rate, if the layer declares a fixed one.
    pub fn frame_rate(&self) -> Option<FrameRate> {
        if self.fixed_vop_rate && self.fixed_vop_time_increment > 0 {
            Some(FrameRate {
                numerator: u32::from(self.vop_time_increment_resolution),
                denominator: u32::from(self.fixed_vop_time_increment),
            })
        } else {
            None
        }
    }

    /// Pixel aspect ratio from Table 6-12.
    pub fn pixel_aspect_ratio(&self) -> PixelAspectRatio {
        let (width, height) = match self.aspect_ratio_info {
            1 => (1, 1),
            2 => (12, 11),
            3 => (10, 11),
            4 => (16, 11),
            5 => (40, 33),
            EXTENDED_PAR if self.par_width != 0 && self.par_height != 0 => {
                (u32::from(self.par_width), u32::from(self.par_height))
            }
            _ => (1, 1),
        };

        PixelAspectRatio { width, height }
    }
}

/// Group of VOP header (6.2.4).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupOfVop {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub closed: bool,
    pub broken_link: bool,
}

impl GroupOfVop {
    /// Size in bytes of a complete GOV packet, start code value included.
    pub const SIZE: usize = 4;

    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let mut r = BitReader::new(data);
        check_start_code(&mut r, GROUP_OF_VOP_START_CODE)?;

        let hours = r.read_u8(5)?;
        let minutes = r.read_u8(6)?;
        read_marker(&mut r)?;
        let seconds = r.read_u8(6)?;

        Ok(Self {
            hours,
            minutes,
            seconds,
            closed: r.read_bool()?,
            broken_link: r.read_bool()?,
        })
    }

    /// The time code of the group, in seconds.
    pub fn time_code_seconds(&self) -> u64 {
        u64::from(self.hours) * 3600 + u64::from(self.minutes) * 60 + u64::from(self.seconds)
    }
}

/// Sprite trajectory (6.2.5.4): differential motion vectors of each warping point.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpriteTrajectory {
    pub du: [i16; MAX_SPRITE_WARPING_POINTS],
    pub dv: [i16; MAX_SPRITE_WARPING_POINTS],
}

impl SpriteTrajectory {
    pub fn parse(r: &mut BitReader, points: u8) -> anyhow::Result<Self> {
        if usize::from(points) > MAX_SPRITE_WARPING_POINTS {
            bail!("too many sprite warping points: {}", points);
        }

        let mut trajectory = SpriteTrajectory::default();
        for i in 0..usize::from(points) {
            trajectory.du[i] = Self::parse_warping_mv_code(r)?;
            trajectory.dv[i] = Self::parse_warping_mv_code(r)?;
        }

        Ok(trajectory)
    }

    /// `dmv_length` VLC from Table 6-27.
    fn parse_dmv_length(r: &mut BitReader) -> anyhow::Result<u8> {
        let prefix = r.read_u8(2)?;
        if prefix == 0 {
            return Ok(0);
        }

        match (prefix << 1) | r.read_u8(1)? {
            0b010 => Ok(1),
            0b011 => Ok(2),
            0b100 => Ok(3),
            0b101 => Ok(4),
            0b110 => Ok(5),
            _ => {
                let mut length = 6;
                while r.read_bool()? {
                    length += 1;
                    if length > 14 {
                        bail!("invalid dmv_length code");
                    }
                }
                Ok(length)
            }
        }
    }

    fn parse_warping_mv_code(r: &mut BitReader) -> anyhow::Result<i16> {
        let length = Self::parse_dmv_length(r)?;

        let value = if length == 0 {
            0
        } else {
            let code = i32::from(r.read_u16(length)?);
            // Codes with a clear top bit are negative.
            if code >> (length - 1) == 0 {
                code - ((1 << length) - 1)
            } else {
                code
            }
        };

        read_marker(r)?;
        Ok(value as i16)
    }
}

/// Video object plane header (6.2.5).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoObjectPlane {
    /// Raw `vop_coding_type`, see [`VopCodingType`].
    pub coding_type: u8,
    pub modulo_time_base: u32,
    pub time_increment: u16,
    pub coded: bool,
    /// NEWPRED identifier of this VOP.
    pub vop_id: u16,
    /// NEWPRED identifier of the VOP to predict from, if signalled.
    pub vop_id_for_prediction: Option<u16>,
    pub rounding_type: bool,
    pub reduced_resolution: bool,
    pub intra_dc_vlc_thr: u8,
    pub top_field_first: bool,
    pub alternate_vertical_scan_flag: bool,
    pub sprite_trajectory: SpriteTrajectory,
    pub quant: u16,
    pub fcode_forward: u8,
    pub fcode_backward: u8,
    pub width: u16,
    pub height: u16,
    /// Size of the header in bits, start code value byte included.
    pub size: usize,
}

impl VideoObjectPlane {
    pub fn parse(data: &[u8], vol: &VideoObjectLayer) -> anyhow::Result<Self> {
        let mut r = BitReader::new(data);
        check_start_code(&mut r, VOP_START_CODE)?;

        // Only rectangular layers are accepted, so the VOP covers the whole layer.
        let mut vop = VideoObjectPlane {
            coding_type: r.read_u8(2)?,
            modulo_time_base: read_modulo_time_base(&mut r)?,
            width: vol.width,
            height: vol.height,
            ..Default::default()
        };

        read_marker(&mut r)?;
        vop.time_increment = r.read_u16(vol.vop_time_increment_bits())?;
        read_marker(&mut r)?;

        vop.coded = r.read_bool()?;
        if !vop.coded {
            vop.size = r.position() as usize;
            return Ok(vop);
        }

        if vol.newpred_enable {
            (vop.vop_id, vop.vop_id_for_prediction) = read_newpred_ids(&mut r, vol)?;
        }

        let coding_type = vop.picture_type();

        if coding_type == Some(VopCodingType::P)
            || (coding_type == Some(VopCodingType::S) && vol.sprite_enable == SpriteEnable::Gmc)
        {
            vop.rounding_type = r.read_bool()?;
        }

        if vol.reduced_resolution_vop_enable
            && matches!(coding_type, Some(VopCodingType::I) | Some(VopCodingType::P))
        {
            vop.reduced_resolution = r.read_bool()?;
        }

        vop.intra_dc_vlc_thr = r.read_u8(3)?;
        if vol.interlaced {
            vop.top_field_first = r.read_bool()?;
            vop.alternate_vertical_scan_flag = r.read_bool()?;
        }

        if vol.sprite_enable != SpriteEnable::Unused && coding_type == Some(VopCodingType::S) {
            if vol.no_of_sprite_warping_points > 0 {
                vop.sprite_trajectory =
                    SpriteTrajectory::parse(&mut r, vol.no_of_sprite_warping_points)?;
            }

            if vol.sprite_brightness_change {
                bail!("sprite brightness change is not supported");
            }

            if vol.sprite_enable == SpriteEnable::Static {
                bail!("static sprite pieces are not supported");
            }
        }

        vop.quant = r.read_u16(vol.quant_precision)?;

        if coding_type != Some(VopCodingType::I) {
            vop.fcode_forward = r.read_u8(3)?;
        }

        if coding_type == Some(VopCodingType::B) {
            vop.fcode_backward = r.read_u8(3)?;
        }

        vop.size = r.position() as usize;
        Ok(vop)
    }

    pub fn picture_type(&self) -> Option<VopCodingType> {
        VopCodingType::n(self.coding_type)
    }
}

/// Video packet header (6.2.5.2), found after each resync marker of a VOP.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoPacketHeader {
    pub macroblock_number: u16,
    pub quant_scale: u16,
    pub header_extension_code: bool,
    pub modulo_time_base: u32,
    pub time_increment: u16,
    pub coding_type: u8,
    pub intra_dc_vlc_thr: u8,
    pub sprite_trajectory: SpriteTrajectory,
    pub reduced_resolution: bool,
    pub fcode_forward: u8,
    pub fcode_backward: u8,
    pub vop_id: u16,
    pub vop_id_for_prediction: Option<u16>,
    /// Size of the header in bits, resync marker included.
    pub size: usize,
}

impl VideoPacketHeader {
    /// Parses a video packet header. `data` must start with the byte aligned resync marker.
    pub fn parse(
        data: &[u8],
        vol: &VideoObjectLayer,
        vop: &VideoObjectPlane,
    ) -> anyhow::Result<Self> {
        let mut r = BitReader::new(data);

        let marker_len =
            resync_marker_len(vop.coding_type, vop.fcode_forward, vop.fcode_backward) as u8;
        if r.read_u32(marker_len - 1)? != 0 || !r.read_bool()? {
            bail!("invalid resync marker");
        }

        let mut hdr = VideoPacketHeader {
            macroblock_number: r.read_u16(macroblock_number_bits(vol.macroblock_count()))?,
            quant_scale: r.read_u16(vol.quant_precision)?,
            header_extension_code: r.read_bool()?,
            ..Default::default()
        };

        if u32::from(hdr.macroblock_number) >= vol.macroblock_count() {
            bail!(
                "macroblock_number {} out of range for {} macroblocks",
                hdr.macroblock_number,
                vol.macroblock_count()
            );
        }

        if hdr.header_extension_code {
            hdr.modulo_time_base = read_modulo_time_base(&mut r)?;
            read_marker(&mut r)?;
            hdr.time_increment = r.read_u16(vol.vop_time_increment_bits())?;
            read_marker(&mut r)?;

            hdr.coding_type = r.read_u8(2)?;
            let coding_type = VopCodingType::n(hdr.coding_type);

            hdr.intra_dc_vlc_thr = r.read_u8(3)?;

            if vol.sprite_enable == SpriteEnable::Gmc
                && coding_type == Some(VopCodingType::S)
                && vol.no_of_sprite_warping_points > 0
            {
                hdr.sprite_trajectory =
                    SpriteTrajectory::parse(&mut r, vol.no_of_sprite_warping_points)?;
            }

            if vol.reduced_resolution_vop_enable
                && matches!(coding_type, Some(VopCodingType::I) | Some(VopCodingType::P))
            {
                hdr.reduced_resolution = r.read_bool()?;
            }

            if coding_type != Some(VopCodingType::I) {
                hdr.fcode_forward = r.read_u8(3)?;
            }

            if coding_type == Some(VopCodingType::B) {
                hdr.fcode_backward = r.read_u8(3)?;
            }
        }

        if vol.newpred_enable {
            (hdr.vop_id, hdr.vop_id_for_prediction) = read_newpred_ids(&mut r, vol)?;
        }

        hdr.size = r.position() as usize;
        Ok(hdr)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Packs a string of '0' and '1' characters into bytes, padding the last one with zeros.
    /// Any other character is ignored.
    pub(crate) fn bits(s: &str) -> Vec<u8> {
        let bits = s
            .chars()
            .filter(|c| *c == '0' || *c == '1')
            .map(|c| c == '1')
            .collect::<Vec<_>>();

        bits.chunks(8)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |byte, (i, &bit)| byte | ((bit as u8) << (7 - i)))
            })
            .collect()
    }

    /// QCIF layer at 30 fps: verid 1, no control parameters, resync markers disabled.
    pub(crate) const QCIF_VOL_BITS: &str = "00100000 0 00000001 0 0001 0 00 1 \
        0000000000011110 1 1 00001 1 0000010110000 1 0000010010000 1 \
        0 1 0 0 0 1 1 0 0";

    #[test]
    fn parse_visual_object_sequence() {
        let vos = VisualObjectSequence::parse(&[0xb0, 0xf5]).unwrap();
        assert_eq!(vos.profile, VisualProfile::AdvancedSimple);
        assert_eq!(vos.level, 5);

        let vos = VisualObjectSequence::parse(&[0xb0, 0x08]).unwrap();
        assert_eq!(vos.profile, VisualProfile::Simple);
        assert_eq!(vos.level, 0);

        let vos = VisualObjectSequence::parse(&[0xb0, 0x42]).unwrap();
        assert_eq!(vos.profile, VisualProfile::Other(0x42));

        assert!(VisualObjectSequence::parse(&[0xb5, 0x01]).is_err());
        assert!(VisualObjectSequence::parse(&[0xb0]).is_err());
    }

    #[test]
    fn parse_visual_object() {
        // Identifier with verid 2, video type, signal type with colour description.
        let data = bits(
            "10110101 1 0010 001 0001 1 101 1 1 00000001 00000001 00000001 1",
        );
        let vo = VisualObject::parse(&data).unwrap();
        assert_eq!(vo.verid, 2);
        assert_eq!(vo.priority, 1);
        assert_eq!(vo.object_type(), Some(VisualObjectType::Video));

        let signal_type = vo.video_signal_type.unwrap();
        assert_eq!(signal_type.video_format, 5);
        assert!(signal_type.video_range);
        assert_eq!(
            signal_type.colour_description,
            Some(ColourDescription {
                colour_primaries: 1,
                transfer_characteristics: 1,
                matrix_coefficients: 1,
            })
        );

        // No identifier, no signal type.
        let vo = VisualObject::parse(&bits("10110101 0 0001 0 1")).unwrap();
        assert_eq!(vo.verid, 1);
        assert_eq!(vo.video_signal_type, None);
    }

    #[test]
    fn parse_video_object_layer() {
        let vol = VideoObjectLayer::parse(&bits(QCIF_VOL_BITS), None).unwrap();

        assert_eq!(vol.verid, 1);
        assert_eq!(vol.width, 176);
        assert_eq!(vol.height, 144);
        assert_eq!(vol.vop_time_increment_resolution, 30);
        assert_eq!(vol.vop_time_increment_bits(), 5);
        assert!(vol.fixed_vop_rate);
        assert_eq!(vol.fixed_vop_time_increment, 1);
        assert_eq!(vol.chroma_format, 1);
        assert!(vol.obmc_disable);
        assert!(vol.resync_marker_disable);
        assert_eq!(vol.quant_precision, 5);
        assert_eq!(vol.macroblock_count(), 99);
        assert_eq!(
            vol.frame_rate(),
            Some(FrameRate {
                numerator: 30,
                denominator: 1
            })
        );
        assert_eq!(vol.pixel_aspect_ratio(), PixelAspectRatio::default());
        assert_eq!(vol.intra_quant_mat, to_zigzag(&DEFAULT_INTRA_QUANT_MAT));
    }

    #[test]
    fn parse_video_object_layer_errors() {
        // Missing marker before the resolution.
        let data = bits(
            "00100000 0 00000001 0 0001 0 00 0 0000000000011110 1 1 00001 1",
        );
        assert!(VideoObjectLayer::parse(&data, None).is_err());

        // Binary shape.
        let data = bits("00100000 0 00000001 0 0001 0 01 1 0000000000011110 1");
        assert!(VideoObjectLayer::parse(&data, None).is_err());

        // Zero time increment resolution.
        let data = bits("00100000 0 00000001 0 0001 0 00 1 0000000000000000 1 0");
        assert!(VideoObjectLayer::parse(&data, None).is_err());

        // Truncated.
        let data = bits(QCIF_VOL_BITS);
        assert!(VideoObjectLayer::parse(&data[..6], None).is_err());

        // Not a VOL start code.
        assert!(VideoObjectLayer::parse(&[0xb6, 0x00], None).is_err());
    }

    #[test]
    fn parse_quant_matrix_repeats_last_value() {
        let mut data = vec![10u8, 20, 30, 0];
        data.extend_from_slice(&[0xff; 4]);
        let mut reader = BitReader::new(&data);
        let mut matrix = [0; 64];

        VideoObjectLayer::parse_quant_matrix(&mut reader, &mut matrix).unwrap();
        assert_eq!(&matrix[..3], &[10, 20, 30]);
        assert!(matrix[3..].iter().all(|&v| v == 30));
        assert_eq!(reader.position(), 32);

        let data = [0u8; 4];
        let mut reader = BitReader::new(&data);
        assert!(VideoObjectLayer::parse_quant_matrix(&mut reader, &mut matrix).is_err());
    }

    #[test]
    fn parse_group_of_vop() {
        // 01:02:03, closed, not broken.
        let gov = GroupOfVop::parse(&bits("10110011 00001 000010 1 000011 1 0")).unwrap();
        assert_eq!(gov.hours, 1);
        assert_eq!(gov.minutes, 2);
        assert_eq!(gov.seconds, 3);
        assert!(gov.closed);
        assert!(!gov.broken_link);
        assert_eq!(gov.time_code_seconds(), 3723);

        assert!(GroupOfVop::parse(&bits("10110011 00001 000010 0 000011 1 0")).is_err());
    }

    #[test]
    fn parse_video_object_plane() {
        let vol = VideoObjectLayer::parse(&bits(QCIF_VOL_BITS), None).unwrap();

        // P-VOP, modulo_time_base 2, time increment 3, quant 4, fcode 1.
        let data = bits("10110110 01 110 1 00011 1 1 1 000 00100 001 1010");
        let vop = VideoObjectPlane::parse(&data, &vol).unwrap();

        assert_eq!(vop.picture_type(), Some(VopCodingType::P));
        assert_eq!(vop.modulo_time_base, 2);
        assert_eq!(vop.time_increment, 3);
        assert!(vop.coded);
        assert!(vop.rounding_type);
        assert_eq!(vop.quant, 4);
        assert_eq!(vop.fcode_forward, 1);
        assert_eq!(vop.width, 176);
        assert_eq!(vop.height, 144);
        assert_eq!(vop.size, 33);

        // Not coded: the header ends right after vop_coded.
        let data = bits("10110110 00 0 1 00010 1 0");
        let vop = VideoObjectPlane::parse(&data, &vol).unwrap();
        assert!(!vop.coded);
        assert_eq!(vop.time_increment, 2);
        assert_eq!(vop.size, 19);
    }

    #[test]
    fn parse_newpred_video_object_plane() {
        let mut vol = VideoObjectLayer::parse(&bits(QCIF_VOL_BITS), None).unwrap();
        vol.newpred_enable = true;
        assert_eq!(vol.vop_id_bits(), 8);

        // P-VOP with vop_id 5 predicting from vop_id 4, then quant 4 and fcode 1.
        let data = bits("10110110 01 0 1 00011 1 1 00000101 1 00000100 1 1 000 00100 001 1");
        let vop = VideoObjectPlane::parse(&data, &vol).unwrap();
        assert_eq!(vop.vop_id, 5);
        assert_eq!(vop.vop_id_for_prediction, Some(4));
        assert!(vop.rounding_type);
        assert_eq!(vop.quant, 4);
        assert_eq!(vop.fcode_forward, 1);
        assert_eq!(vop.size, 49);

        // No vop_id_for_prediction.
        let data = bits("10110110 01 0 1 00011 1 1 00000111 0 1 0 000 00110 010 1");
        let vop = VideoObjectPlane::parse(&data, &vol).unwrap();
        assert_eq!(vop.vop_id, 7);
        assert_eq!(vop.vop_id_for_prediction, None);
        assert!(!vop.rounding_type);
        assert_eq!(vop.quant, 6);
        assert_eq!(vop.fcode_forward, 2);
        assert_eq!(vop.size, 41);

        // Missing marker after the NEWPRED fields.
        let data = bits("10110110 01 0 1 00011 1 1 00000111 0 0 0 000 00110 010 1");
        assert!(VideoObjectPlane::parse(&data, &vol).is_err());
    }

    #[test]
    fn parse_warping_mv_codes() {
        // 0, +2, -1, -127.
        let data = bits("00 1  011 10 1  010 0 1  11110 0000000 1");
        let mut r = BitReader::new(&data);

        assert_eq!(SpriteTrajectory::parse_warping_mv_code(&mut r).unwrap(), 0);
        assert_eq!(SpriteTrajectory::parse_warping_mv_code(&mut r).unwrap(), 2);
        assert_eq!(SpriteTrajectory::parse_warping_mv_code(&mut r).unwrap(), -1);
        assert_eq!(
            SpriteTrajectory::parse_warping_mv_code(&mut r).unwrap(),
            -127
        );

        // dmv_length longer than 14.
        let data = bits("111 111111111 0");
        let mut r = BitReader::new(&data);
        assert!(SpriteTrajectory::parse_warping_mv_code(&mut r).is_err());
    }

    #[test]
    fn parse_video_packet_header() {
        let mut vol = VideoObjectLayer::parse(&bits(QCIF_VOL_BITS), None).unwrap();
        vol.resync_marker_disable = false;
        let vop = VideoObjectPlane {
            coding_type: VopCodingType::I as u8,
            ..Default::default()
        };

        // 17-bit marker, macroblock 33 on 7 bits, quant 9, no extension.
        let data = bits("00000000 00000000 1 0100001 01001 0 111");
        let hdr = VideoPacketHeader::parse(&data, &vol, &vop).unwrap();
        assert_eq!(hdr.macroblock_number, 33);
        assert_eq!(hdr.quant_scale, 9);
        assert!(!hdr.header_extension_code);
        assert_eq!(hdr.size, 30);

        // Macroblock number past the end of the VOP.
        let data = bits("00000000 00000000 1 1111111 01001 0");
        assert!(VideoPacketHeader::parse(&data, &vol, &vop).is_err());

        // Not a resync marker.
        let data = bits("00000000 00000001 1 0100001 01001 0");
        assert!(VideoPacketHeader::parse(&data, &vol, &vop).is_err());

        // NEWPRED fields close the header.
        vol.newpred_enable = true;
        let data = bits("00000000 00000000 1 0100001 01001 0 00000011 0 1 111");
        let hdr = VideoPacketHeader::parse(&data, &vol, &vop).unwrap();
        assert_eq!(hdr.vop_id, 3);
        assert_eq!(hdr.vop_id_for_prediction, None);
        assert_eq!(hdr.size, 40);
    }

    #[test]
    fn field_lengths() {
        assert_eq!(bits_for_max(0), 1);
        assert_eq!(bits_for_max(1), 1);
        assert_eq!(bits_for_max(29), 5);
        assert_eq!(bits_for_max(31), 5);
        assert_eq!(bits_for_max(32), 6);
        assert_eq!(macroblock_number_bits(1), 1);
        assert_eq!(macroblock_number_bits(2), 1);
        assert_eq!(macroblock_number_bits(99), 7);
        assert_eq!(macroblock_number_bits(396), 9);
    }
}
