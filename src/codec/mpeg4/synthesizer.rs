// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Writes MPEG-4 visual headers back into bitstream form. Mostly useful to build test streams.

use std::io::Write;

use thiserror::Error;

use crate::bitstream_utils::BitWriter;
use crate::bitstream_utils::BitWriterError;
use crate::codec::mpeg4::packet::resync_marker_len;
use crate::codec::mpeg4::packet::GROUP_OF_VOP_START_CODE;
use crate::codec::mpeg4::packet::VISUAL_OBJECT_SEQUENCE_START_CODE;
use crate::codec::mpeg4::packet::VISUAL_OBJECT_START_CODE;
use crate::codec::mpeg4::packet::VOP_START_CODE;
use crate::codec::mpeg4::packet::VIDEO_OBJECT_LAYER_FIRST;
use crate::codec::mpeg4::parser::macroblock_number_bits;
use crate::codec::mpeg4::parser::GroupOfVop;
use crate::codec::mpeg4::parser::SpriteEnable;
use crate::codec::mpeg4::parser::SpriteTrajectory;
use crate::codec::mpeg4::parser::VideoObjectLayer;
use crate::codec::mpeg4::parser::VideoObjectPlane;
use crate::codec::mpeg4::parser::VideoPacketHeader;
use crate::codec::mpeg4::parser::VisualObject;
use crate::codec::mpeg4::parser::VisualObjectSequence;
use crate::codec::mpeg4::parser::VisualObjectType;
use crate::codec::mpeg4::parser::VolShape;
use crate::codec::mpeg4::parser::VopCodingType;
use crate::codec::mpeg4::parser::EXTENDED_PAR;
use crate::codec::mpeg4::parser::MAX_SPRITE_WARPING_POINTS;
use crate::codec::mpeg4::short_header::SourceFormat;
use crate::codec::mpeg4::short_header::ShortVideoHeader;
use crate::codec::mpeg4::short_header::SHORT_VIDEO_MARKER_BITS;
use crate::codec::mpeg4::short_header::SHORT_VIDEO_START_MARKER;

mod private {
    pub trait HeaderStruct {}
}

impl private::HeaderStruct for VisualObjectSequence {}

impl private::HeaderStruct for VisualObject {}

impl private::HeaderStruct for VideoObjectLayer {}

impl private::HeaderStruct for GroupOfVop {}

impl private::HeaderStruct for VideoObjectPlane {}

impl private::HeaderStruct for VideoPacketHeader {}

impl private::HeaderStruct for ShortVideoHeader {}

#[derive(Error, Debug)]
pub enum SynthesizerError {
    #[error("tried to synthesize unsupported settings")]
    Unsupported,
    #[error(transparent)]
    BitWriter(#[from] BitWriterError),
}

pub type SynthesizerResult<T> = Result<T, SynthesizerError>;

/// A helper to output typed headers to [`std::io::Write`] using [`BitWriter`].
pub struct Synthesizer<'h, H: private::HeaderStruct, W: Write> {
    writer: BitWriter<W>,
    header: &'h H,
}

impl<H: private::HeaderStruct, W: Write> Synthesizer<'_, H, W> {
    fn f<T: Into<u32>>(&mut self, bits: usize, value: T) -> SynthesizerResult<()> {
        self.writer.write_f(bits, value)?;
        Ok(())
    }

    fn marker_bit(&mut self) -> SynthesizerResult<()> {
        self.f(1, true)
    }

    fn start_code(&mut self, code: u8) -> SynthesizerResult<()> {
        self.f(32, 0x100 | u32::from(code))
    }

    /// `next_start_code()` stuffing: a zero followed by ones up to the byte boundary.
    fn stuffing(&mut self) -> SynthesizerResult<()> {
        self.f(1, false)?;

        while !self.writer.aligned() {
            self.f(1, true)?;
        }

        Ok(())
    }

    fn modulo_time_base(&mut self, seconds: u32) -> SynthesizerResult<()> {
        for _ in 0..seconds {
            self.f(1, true)?;
        }

        self.f(1, false)
    }

    fn newpred_ids(
        &mut self,
        vol: &VideoObjectLayer,
        vop_id: u16,
        vop_id_for_prediction: Option<u16>,
    ) -> SynthesizerResult<()> {
        let bits = usize::from(vol.vop_id_bits());
        self.f(bits, vop_id)?;
        self.f(1, vop_id_for_prediction.is_some())?;
        if let Some(id) = vop_id_for_prediction {
            self.f(bits, id)?;
        }
        self.marker_bit()
    }

    fn payload(&mut self, payload: &[u8]) -> SynthesizerResult<()> {
        self.writer.write_bytes(payload)?;
        Ok(())
    }

    fn sprite_trajectory(
        &mut self,
        trajectory: &SpriteTrajectory,
        points: u8,
    ) -> SynthesizerResult<()> {
        if usize::from(points) > MAX_SPRITE_WARPING_POINTS {
            return Err(SynthesizerError::Unsupported);
        }

        for i in 0..usize::from(points) {
            self.warping_mv_code(trajectory.du[i])?;
            self.warping_mv_code(trajectory.dv[i])?;
        }

        Ok(())
    }

    fn warping_mv_code(&mut self, value: i16) -> SynthesizerResult<()> {
        let magnitude = u32::from(value.unsigned_abs());
        let length = u32::BITS - magnitude.leading_zeros();

        // dmv_length, Table 6-27.
        match length {
            0 => self.f(2, 0u32)?,
            1..=5 => self.f(3, length + 1)?,
            6..=14 => {
                self.f(3, 0b111u32)?;
                for _ in 6..length {
                    self.f(1, true)?;
                }
                self.f(1, false)?;
            }
            _ => return Err(SynthesizerError::Unsupported),
        }

        if length > 0 {
            let value = i32::from(value);
            let code = if value > 0 {
                value
            } else {
                value + (1 << length) - 1
            };
            self.f(length as usize, code as u32)?;
        }

        self.marker_bit()
    }

    /// Writes a quantisation matrix, ending it with a 0 when its tail repeats.
    fn quant_matrix(&mut self, matrix: &[u8; 64]) -> SynthesizerResult<()> {
        if matrix[0] == 0 {
            return Err(SynthesizerError::Unsupported);
        }

        let mut run = matrix.len();
        for j in (1..matrix.len()).rev() {
            if matrix[j - 1] != matrix[j] {
                break;
            }
            run -= 1;
        }

        for value in &matrix[..run] {
            self.f(8, *value)?;
        }

        if run < matrix.len() {
            self.f(8, 0u32)?;
        }

        Ok(())
    }
}

impl<'h, W: Write> Synthesizer<'h, VisualObjectSequence, W> {
    pub fn synthesize(vos: &'h VisualObjectSequence, writer: W) -> SynthesizerResult<()> {
        let mut s = Self {
            writer: BitWriter::new(writer),
            header: vos,
        };

        s.start_code(VISUAL_OBJECT_SEQUENCE_START_CODE)?;
        s.f(8, s.header.profile_and_level_indication)
    }
}

impl<'h, W: Write> Synthesizer<'h, VisualObject, W> {
    pub fn synthesize(vo: &'h VisualObject, writer: W) -> SynthesizerResult<()> {
        let mut s = Self {
            writer: BitWriter::new(writer),
            header: vo,
        };

        s.start_code(VISUAL_OBJECT_START_CODE)?;

        let vo = s.header;
        s.f(1, vo.is_visual_object_identifier)?;
        if vo.is_visual_object_identifier {
            s.f(4, vo.verid)?;
            s.f(3, vo.priority)?;
        }

        s.f(4, vo.visual_object_type)?;
        if matches!(
            vo.object_type(),
            Some(VisualObjectType::Video) | Some(VisualObjectType::StillTexture)
        ) {
            s.f(1, vo.video_signal_type.is_some())?;
            if let Some(signal_type) = &vo.video_signal_type {
                s.f(3, signal_type.video_format)?;
                s.f(1, signal_type.video_range)?;
                s.f(1, signal_type.colour_description.is_some())?;
                if let Some(colour) = &signal_type.colour_description {
                    s.f(8, colour.colour_primaries)?;
                    s.f(8, colour.transfer_characteristics)?;
                    s.f(8, colour.matrix_coefficients)?;
                }
            }
        }

        s.stuffing()
    }
}

impl<'h, W: Write> Synthesizer<'h, VideoObjectLayer, W> {
    pub fn synthesize(vol: &'h VideoObjectLayer, writer: W) -> SynthesizerResult<()> {
        let mut s = Self {
            writer: BitWriter::new(writer),
            header: vol,
        };

        s.video_object_layer()
    }

    fn video_object_layer(&mut self) -> SynthesizerResult<()> {
        let vol = self.header;

        if vol.shape != VolShape::Rectangular
            || !vol.complexity_estimation_disable
            || vol.scalability
            || vol.vop_time_increment_resolution == 0
        {
            return Err(SynthesizerError::Unsupported);
        }

        self.start_code(VIDEO_OBJECT_LAYER_FIRST)?;
        self.f(1, vol.random_accessible_vol)?;
        self.f(8, vol.video_object_type_indication)?;

        self.f(1, vol.is_object_layer_identifier)?;
        if vol.is_object_layer_identifier {
            self.f(4, vol.verid)?;
            self.f(3, vol.priority)?;
        }

        self.f(4, vol.aspect_ratio_info)?;
        if vol.aspect_ratio_info == EXTENDED_PAR {
            self.f(8, vol.par_width)?;
            self.f(8, vol.par_height)?;
        }

        self.f(1, vol.control_parameters)?;
        if vol.control_parameters {
            self.f(2, vol.chroma_format)?;
            self.f(1, vol.low_delay)?;
            self.f(1, vol.vbv_parameters.is_some())?;
            if let Some(vbv) = &vol.vbv_parameters {
                self.f(15, vbv.bit_rate >> 15)?;
                self.marker_bit()?;
                self.f(15, vbv.bit_rate & 0x7fff)?;
                self.marker_bit()?;
                self.f(15, vbv.buffer_size >> 3)?;
                self.marker_bit()?;
                self.f(3, vbv.buffer_size & 0x7)?;
                self.f(11, vbv.occupancy >> 15)?;
                self.marker_bit()?;
                self.f(15, vbv.occupancy & 0x7fff)?;
                self.marker_bit()?;
            }
        }

        self.f(2, vol.shape as u32)?;
        self.marker_bit()?;
        self.f(16, vol.vop_time_increment_resolution)?;
        self.marker_bit()?;

        self.f(1, vol.fixed_vop_rate)?;
        if vol.fixed_vop_rate {
            self.f(
                usize::from(vol.vop_time_increment_bits()),
                vol.fixed_vop_time_increment,
            )?;
        }

        self.marker_bit()?;
        self.f(13, vol.width)?;
        self.marker_bit()?;
        self.f(13, vol.height)?;
        self.marker_bit()?;

        self.f(1, vol.interlaced)?;
        self.f(1, vol.obmc_disable)?;

        if vol.verid == 1 {
            if vol.sprite_enable == SpriteEnable::Gmc {
                return Err(SynthesizerError::Unsupported);
            }
            self.f(1, vol.sprite_enable as u32)?;
        } else {
            self.f(2, vol.sprite_enable as u32)?;
        }

        if vol.sprite_enable != SpriteEnable::Unused {
            if vol.sprite_enable != SpriteEnable::Gmc {
                self.f(13, vol.sprite_width)?;
                self.marker_bit()?;
                self.f(13, vol.sprite_height)?;
                self.marker_bit()?;
                self.f(13, vol.sprite_left_coordinate)?;
                self.marker_bit()?;
                self.f(13, vol.sprite_top_coordinate)?;
                self.marker_bit()?;
            }

            self.f(6, vol.no_of_sprite_warping_points)?;
            self.f(2, vol.sprite_warping_accuracy)?;
            self.f(1, vol.sprite_brightness_change)?;
            if vol.sprite_enable != SpriteEnable::Gmc {
                self.f(1, vol.low_latency_sprite_enable)?;
            }
        }

        self.f(1, vol.not_8_bit)?;
        if vol.not_8_bit {
            self.f(4, vol.quant_precision)?;
            self.f(4, vol.bits_per_pixel)?;
        }

        self.f(1, vol.quant_type)?;
        if vol.quant_type {
            self.f(1, vol.load_intra_quant_mat)?;
            if vol.load_intra_quant_mat {
                self.quant_matrix(&vol.intra_quant_mat)?;
            }

            self.f(1, vol.load_non_intra_quant_mat)?;
            if vol.load_non_intra_quant_mat {
                self.quant_matrix(&vol.non_intra_quant_mat)?;
            }
        }

        if vol.verid != 1 {
            self.f(1, vol.quarter_sample)?;
        }

        self.f(1, vol.complexity_estimation_disable)?;
        self.f(1, vol.resync_marker_disable)?;
        self.f(1, vol.data_partitioned)?;
        if vol.data_partitioned {
            self.f(1, vol.reversible_vlc)?;
        }

        if vol.verid != 1 {
            self.f(1, vol.newpred_enable)?;
            if vol.newpred_enable {
                self.f(2, vol.requested_upstream_message_type)?;
                self.f(1, vol.newpred_segment_type)?;
            }
            self.f(1, vol.reduced_resolution_vop_enable)?;
        }

        self.f(1, vol.scalability)?;
        self.stuffing()
    }
}

impl<'h, W: Write> Synthesizer<'h, GroupOfVop, W> {
    pub fn synthesize(gov: &'h GroupOfVop, writer: W) -> SynthesizerResult<()> {
        let mut s = Self {
            writer: BitWriter::new(writer),
            header: gov,
        };

        s.start_code(GROUP_OF_VOP_START_CODE)?;
        s.f(5, s.header.hours)?;
        s.f(6, s.header.minutes)?;
        s.marker_bit()?;
        s.f(6, s.header.seconds)?;
        s.f(1, s.header.closed)?;
        s.f(1, s.header.broken_link)?;
        s.stuffing()
    }
}

impl<'h, W: Write> Synthesizer<'h, VideoObjectPlane, W> {
    /// Writes the VOP start code and header, followed by `payload` and the stuffing bits.
    pub fn synthesize(
        vop: &'h VideoObjectPlane,
        vol: &VideoObjectLayer,
        payload: &[u8],
        writer: W,
    ) -> SynthesizerResult<()> {
        let mut s = Self {
            writer: BitWriter::new(writer),
            header: vop,
        };

        s.start_code(VOP_START_CODE)?;
        s.video_object_plane(vol)?;
        if s.header.coded {
            s.payload(payload)?;
        }
        s.stuffing()
    }

    fn video_object_plane(&mut self, vol: &VideoObjectLayer) -> SynthesizerResult<()> {
        let vop = self.header;
        let coding_type = vop.picture_type();

        self.f(2, vop.coding_type)?;
        self.modulo_time_base(vop.modulo_time_base)?;
        self.marker_bit()?;
        self.f(
            usize::from(vol.vop_time_increment_bits()),
            vop.time_increment,
        )?;
        self.marker_bit()?;

        self.f(1, vop.coded)?;
        if !vop.coded {
            return Ok(());
        }

        if vol.newpred_enable {
            self.newpred_ids(vol, vop.vop_id, vop.vop_id_for_prediction)?;
        }

        if coding_type == Some(VopCodingType::P)
            || (coding_type == Some(VopCodingType::S) && vol.sprite_enable == SpriteEnable::Gmc)
        {
            self.f(1, vop.rounding_type)?;
        }

        if vol.reduced_resolution_vop_enable
            && matches!(coding_type, Some(VopCodingType::I) | Some(VopCodingType::P))
        {
            self.f(1, vop.reduced_resolution)?;
        }

        self.f(3, vop.intra_dc_vlc_thr)?;
        if vol.interlaced {
            self.f(1, vop.top_field_first)?;
            self.f(1, vop.alternate_vertical_scan_flag)?;
        }

        if vol.sprite_enable != SpriteEnable::Unused && coding_type == Some(VopCodingType::S) {
            if vol.sprite_enable != SpriteEnable::Gmc || vol.sprite_brightness_change {
                return Err(SynthesizerError::Unsupported);
            }

            self.sprite_trajectory(&vop.sprite_trajectory, vol.no_of_sprite_warping_points)?;
        }

        self.f(usize::from(vol.quant_precision), vop.quant)?;

        if coding_type != Some(VopCodingType::I) {
            self.f(3, vop.fcode_forward)?;
        }

        if coding_type == Some(VopCodingType::B) {
            self.f(3, vop.fcode_backward)?;
        }

        Ok(())
    }
}

impl<'h, W: Write> Synthesizer<'h, VideoPacketHeader, W> {
    /// Writes a resync marker and video packet header for a packet of `vop`, followed by
    /// `payload` and the stuffing bits.
    pub fn synthesize(
        hdr: &'h VideoPacketHeader,
        vol: &VideoObjectLayer,
        vop: &VideoObjectPlane,
        payload: &[u8],
        writer: W,
    ) -> SynthesizerResult<()> {
        let mut s = Self {
            writer: BitWriter::new(writer),
            header: hdr,
        };

        let marker_len =
            resync_marker_len(vop.coding_type, vop.fcode_forward, vop.fcode_backward) as usize;
        s.f(marker_len - 1, 0u32)?;
        s.f(1, true)?;

        let hdr = s.header;
        s.f(
            usize::from(macroblock_number_bits(vol.macroblock_count())),
            hdr.macroblock_number,
        )?;
        s.f(usize::from(vol.quant_precision), hdr.quant_scale)?;

        s.f(1, hdr.header_extension_code)?;
        if hdr.header_extension_code {
            let coding_type = VopCodingType::n(hdr.coding_type);

            s.modulo_time_base(hdr.modulo_time_base)?;
            s.marker_bit()?;
            s.f(
                usize::from(vol.vop_time_increment_bits()),
                hdr.time_increment,
            )?;
            s.marker_bit()?;
            s.f(2, hdr.coding_type)?;
            s.f(3, hdr.intra_dc_vlc_thr)?;

            if vol.sprite_enable == SpriteEnable::Gmc
                && coding_type == Some(VopCodingType::S)
                && vol.no_of_sprite_warping_points > 0
            {
                s.sprite_trajectory(&hdr.sprite_trajectory, vol.no_of_sprite_warping_points)?;
            }

            if vol.reduced_resolution_vop_enable
                && matches!(coding_type, Some(VopCodingType::I) | Some(VopCodingType::P))
            {
                s.f(1, hdr.reduced_resolution)?;
            }

            if coding_type != Some(VopCodingType::I) {
                s.f(3, hdr.fcode_forward)?;
            }

            if coding_type == Some(VopCodingType::B) {
                s.f(3, hdr.fcode_backward)?;
            }
        }

        if vol.newpred_enable {
            s.newpred_ids(vol, hdr.vop_id, hdr.vop_id_for_prediction)?;
        }

        s.payload(payload)?;
        s.stuffing()
    }
}

impl<'h, W: Write> Synthesizer<'h, ShortVideoHeader, W> {
    /// Writes a short video header picture: the header, `payload`, and zero bits up to the
    /// byte boundary.
    pub fn synthesize(
        svh: &'h ShortVideoHeader,
        payload: &[u8],
        writer: W,
    ) -> SynthesizerResult<()> {
        let mut s = Self {
            writer: BitWriter::new(writer),
            header: svh,
        };

        let svh = s.header;
        if SourceFormat::from_code(svh.source_format).is_none() {
            return Err(SynthesizerError::Unsupported);
        }

        s.f(usize::from(SHORT_VIDEO_MARKER_BITS), SHORT_VIDEO_START_MARKER)?;
        s.f(8, svh.temporal_reference)?;
        s.marker_bit()?;
        s.f(1, false)?;
        s.f(1, svh.split_screen_indicator)?;
        s.f(1, svh.document_camera_indicator)?;
        s.f(1, svh.full_picture_freeze_release)?;
        s.f(3, svh.source_format)?;
        s.f(1, svh.picture_coding_type)?;
        s.f(4, 0u32)?;
        s.f(5, svh.vop_quant)?;
        s.f(1, false)?;

        for psupp in &svh.psupp {
            s.f(1, true)?;
            s.f(8, *psupp)?;
        }
        s.f(1, false)?;

        s.payload(payload)?;
        while !s.writer.aligned() {
            s.f(1, false)?;
        }

        Ok(())
    }
}
