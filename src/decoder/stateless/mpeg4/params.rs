// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parameter buffers handed to MPEG-4 backends, modelled after the VA-API picture, slice and
//! inverse quantisation buffers.

use crate::codec::mpeg4::parser::SpriteEnable;
use crate::codec::mpeg4::parser::VideoObjectLayer;
use crate::codec::mpeg4::parser::VideoObjectPlane;
use crate::codec::mpeg4::short_header::ShortVideoHeader;

/// Custom quantisation matrices, in zigzag order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IqMatrixBuffer {
    pub load_intra_quant_mat: bool,
    pub load_non_intra_quant_mat: bool,
    pub intra_quant_mat: [u8; 64],
    pub non_intra_quant_mat: [u8; 64],
}

impl IqMatrixBuffer {
    /// Returns the matrices of `vol`, if it loads any.
    pub fn from_vol(vol: &VideoObjectLayer) -> Option<Self> {
        if !vol.quant_type || !(vol.load_intra_quant_mat || vol.load_non_intra_quant_mat) {
            return None;
        }

        Some(Self {
            load_intra_quant_mat: vol.load_intra_quant_mat,
            load_non_intra_quant_mat: vol.load_non_intra_quant_mat,
            intra_quant_mat: vol.intra_quant_mat,
            non_intra_quant_mat: vol.non_intra_quant_mat,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VolFields {
    pub short_video_header: bool,
    pub chroma_format: u8,
    pub interlaced: bool,
    pub obmc_disable: bool,
    pub sprite_enable: u8,
    pub sprite_warping_accuracy: u8,
    pub quant_type: bool,
    pub quarter_sample: bool,
    pub data_partitioned: bool,
    pub reversible_vlc: bool,
    pub resync_marker_disable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VopFields {
    pub coding_type: u8,
    pub backward_reference_vop_coding_type: u8,
    pub rounding_type: bool,
    pub intra_dc_vlc_thr: u8,
    pub top_field_first: bool,
    pub alternate_vertical_scan_flag: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PictureParameterBuffer {
    pub vop_width: u16,
    pub vop_height: u16,
    pub vol_fields: VolFields,
    pub no_of_sprite_warping_points: u8,
    pub sprite_trajectory_du: [i16; 3],
    pub sprite_trajectory_dv: [i16; 3],
    pub quant_precision: u8,
    pub vop_fields: VopFields,
    pub vop_fcode_forward: u8,
    pub vop_fcode_backward: u8,
    pub vop_time_increment_resolution: u16,
    pub num_gobs_in_vop: u16,
    pub num_macroblocks_in_gob: u16,
    /// Temporal distance between a B-VOP and its forward reference.
    pub trb: u16,
    /// Temporal distance between the two references of a B-VOP.
    pub trd: u16,
}

impl PictureParameterBuffer {
    /// Picture parameters of a VOP. Temporal distances and reference types are filled in by
    /// the caller.
    pub fn from_vop(vol: &VideoObjectLayer, vop: &VideoObjectPlane) -> Self {
        let mut du = [0; 3];
        let mut dv = [0; 3];
        du.copy_from_slice(&vop.sprite_trajectory.du[..3]);
        dv.copy_from_slice(&vop.sprite_trajectory.dv[..3]);

        Self {
            vop_width: vop.width,
            vop_height: vop.height,
            vol_fields: VolFields {
                short_video_header: false,
                chroma_format: vol.chroma_format,
                interlaced: vol.interlaced,
                obmc_disable: vol.obmc_disable,
                sprite_enable: vol.sprite_enable as u8,
                sprite_warping_accuracy: vol.sprite_warping_accuracy,
                quant_type: vol.quant_type,
                quarter_sample: vol.quarter_sample,
                data_partitioned: vol.data_partitioned,
                reversible_vlc: vol.reversible_vlc,
                resync_marker_disable: vol.resync_marker_disable,
            },
            no_of_sprite_warping_points: if vol.sprite_enable == SpriteEnable::Unused {
                0
            } else {
                vol.no_of_sprite_warping_points
            },
            sprite_trajectory_du: du,
            sprite_trajectory_dv: dv,
            quant_precision: vol.quant_precision,
            vop_fields: VopFields {
                coding_type: vop.coding_type,
                backward_reference_vop_coding_type: 0,
                rounding_type: vop.rounding_type,
                intra_dc_vlc_thr: vop.intra_dc_vlc_thr,
                top_field_first: vop.top_field_first,
                alternate_vertical_scan_flag: vop.alternate_vertical_scan_flag,
            },
            vop_fcode_forward: vop.fcode_forward,
            vop_fcode_backward: vop.fcode_backward,
            vop_time_increment_resolution: vol.vop_time_increment_resolution,
            ..Default::default()
        }
    }

    /// Picture parameters of a short video header picture. `vol` only contributes its time
    /// increment resolution.
    pub fn from_short_header(svh: &ShortVideoHeader, vol: Option<&VideoObjectLayer>) -> Self {
        Self {
            vop_width: svh.vop_width,
            vop_height: svh.vop_height,
            vol_fields: VolFields {
                short_video_header: true,
                chroma_format: 1,
                obmc_disable: true,
                resync_marker_disable: true,
                ..Default::default()
            },
            quant_precision: 5,
            vop_fields: VopFields {
                coding_type: svh.picture_type() as u8,
                ..Default::default()
            },
            vop_time_increment_resolution: vol.map_or(0, |vol| vol.vop_time_increment_resolution),
            num_gobs_in_vop: svh.num_gobs_in_vop,
            num_macroblocks_in_gob: svh.num_macroblocks_in_gob,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceParameterBuffer {
    /// Bit offset of the first macroblock in the first byte of the slice data.
    pub macroblock_offset: u32,
    pub macroblock_number: u32,
    pub quant_scale: u32,
}

/// A buffer attached to a picture before it is submitted.
pub enum ParamBuffer<'a, H> {
    IqMatrix(IqMatrixBuffer),
    Picture {
        params: PictureParameterBuffer,
        forward_reference: Option<&'a H>,
        backward_reference: Option<&'a H>,
    },
    Slice {
        params: SliceParameterBuffer,
        data: &'a [u8],
    },
}
