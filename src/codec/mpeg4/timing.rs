// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Presentation timestamps and temporal distances for MPEG-4 VOPs and short video header
//! pictures.
//!
//! VOP times are expressed in the bitstream as a number of whole seconds (`modulo_time_base`)
//! on top of the last synchronisation point plus a fraction (`vop_time_increment`) of
//! `vop_time_increment_resolution`. Container timestamps, when provided, only re-anchor that
//! clock at the start of each group of VOPs.

use log::debug;

use crate::codec::mpeg4::parser::GroupOfVop;
use crate::codec::mpeg4::parser::VideoObjectLayer;
use crate::codec::mpeg4::parser::VideoObjectPlane;
use crate::codec::mpeg4::parser::VopCodingType;

/// Timestamps are in nanoseconds.
pub const SECOND: u64 = 1_000_000_000;

/// H.263 pictures tick at 30000/1001 Hz.
const SVH_TICK_NUMERATOR: u64 = SECOND * 1001;
const SVH_TICK_DENOMINATOR: u64 = 30000;

/// Number of ticks between two 8-bit temporal references, accounting for wrap-around.
pub fn temporal_reference_delta(prev: u8, new: u8) -> u32 {
    let new = if new < prev {
        u32::from(new) + 256
    } else {
        u32::from(new)
    };

    new - u32::from(prev)
}

fn clamp_u16(value: u64) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

#[derive(Clone, Debug)]
pub struct TemporalModel {
    /// Time in seconds of the synchronisation point preceding the last reference VOP.
    last_sync_time: u64,
    /// Time in seconds of the synchronisation point of the last reference VOP.
    sync_time: u64,
    /// Time of the reference VOP before the last one, in resolution units.
    last_non_b_scale_time: u64,
    /// Time of the last reference VOP, in resolution units.
    non_b_scale_time: u64,
    trb: u16,
    trd: u16,
    /// Time code of the last GOV, in nanoseconds.
    gop_pts: Option<u64>,
    /// Offset applied to bitstream times to obtain output timestamps.
    pts_diff: i64,
    max_pts: Option<u64>,
    /// Whether the next VOP re-anchors the clock.
    calculate_pts_diff: bool,
    prev_temporal_reference: Option<u8>,
    svh_time: u64,
}

impl Default for TemporalModel {
    fn default() -> Self {
        Self {
            last_sync_time: 0,
            sync_time: 0,
            last_non_b_scale_time: 0,
            non_b_scale_time: 0,
            trb: 0,
            trd: 0,
            gop_pts: None,
            pts_diff: 0,
            max_pts: None,
            calculate_pts_diff: true,
            prev_temporal_reference: None,
            svh_time: 0,
        }
    }
}

impl TemporalModel {
    pub fn new() -> Self {
        Default::default()
    }

    /// Makes the time code of `gov` the new synchronisation point and re-anchors the clock on
    /// the next VOP.
    pub fn start_gop(&mut self, gov: &GroupOfVop) {
        let time_code = gov.time_code_seconds();

        self.last_sync_time = time_code;
        self.sync_time = time_code;
        self.gop_pts = Some(time_code.saturating_mul(SECOND));
        self.calculate_pts_diff = true;
    }

    /// Duration of one frame, or of one time increment for variable rate layers.
    pub fn frame_duration(&self, vol: &VideoObjectLayer) -> u64 {
        let increment = if vol.fixed_vop_rate {
            u64::from(vol.fixed_vop_time_increment.max(1))
        } else {
            1
        };

        increment.saturating_mul(SECOND) / u64::from(vol.vop_time_increment_resolution.max(1))
    }

    /// Computes the presentation timestamp of `vop`, updating the temporal distances used by
    /// B and P pictures. `timestamp` is the container timestamp of the input the VOP came from.
    pub fn vop_pts(
        &mut self,
        vol: &VideoObjectLayer,
        vop: &VideoObjectPlane,
        timestamp: Option<u64>,
    ) -> u64 {
        let resolution = u64::from(vol.vop_time_increment_resolution.max(1));
        let modulo_time_base = u64::from(vop.modulo_time_base);
        let time_increment = u64::from(vop.time_increment);
        let increment_ns = time_increment.saturating_mul(SECOND) / resolution;

        if self.calculate_pts_diff {
            self.calculate_pts_diff = false;

            let anchor = self
                .gop_pts
                .unwrap_or(0)
                .saturating_add(modulo_time_base.saturating_mul(SECOND))
                .saturating_add(increment_ns);
            let duration = self.frame_duration(vol);

            let ts = match (timestamp, self.max_pts) {
                (Some(ts), Some(max_pts)) if ts < max_pts => max_pts.saturating_add(duration),
                (Some(ts), _) => ts,
                (None, None) => 0,
                (None, Some(max_pts)) => {
                    let continued = anchor.saturating_add_signed(self.pts_diff);
                    if continued > max_pts {
                        continued
                    } else {
                        max_pts.saturating_add(duration)
                    }
                }
            };

            self.pts_diff = ts.wrapping_sub(anchor) as i64;
            debug!(
                "Re-anchoring VOP clock: anchor {}, timestamp {}, pts_diff {}",
                anchor, ts, self.pts_diff
            );
        }

        let pts = if vop.picture_type() == Some(VopCodingType::B) {
            let sync_time = self.last_sync_time.saturating_add(modulo_time_base);
            let scale_time = sync_time
                .saturating_mul(resolution)
                .saturating_add(time_increment);

            self.trb = clamp_u16(scale_time.saturating_sub(self.last_non_b_scale_time));
            sync_time.saturating_mul(SECOND).saturating_add(increment_ns)
        } else {
            self.last_sync_time = self.sync_time;
            self.sync_time = self.sync_time.saturating_add(modulo_time_base);

            self.last_non_b_scale_time = self.non_b_scale_time;
            self.non_b_scale_time = self
                .sync_time
                .saturating_mul(resolution)
                .saturating_add(time_increment);

            self.trd = clamp_u16(
                self.non_b_scale_time
                    .saturating_sub(self.last_non_b_scale_time),
            );
            self.sync_time
                .saturating_mul(SECOND)
                .saturating_add(increment_ns)
        };

        let pts = pts.saturating_add_signed(self.pts_diff);
        self.update_max_pts(pts);
        pts
    }

    /// Computes the presentation timestamp of a short video header picture from its temporal
    /// reference. The first picture of a stream is at 0.
    pub fn svh_pts(&mut self, temporal_reference: u8) -> u64 {
        let delta = self
            .prev_temporal_reference
            .map_or(0, |prev| temporal_reference_delta(prev, temporal_reference));
        self.prev_temporal_reference = Some(temporal_reference);

        self.svh_time = self
            .svh_time
            .saturating_add(u64::from(delta) * SVH_TICK_NUMERATOR / SVH_TICK_DENOMINATOR);
        self.update_max_pts(self.svh_time);
        self.svh_time
    }

    fn update_max_pts(&mut self, pts: u64) {
        self.max_pts = Some(self.max_pts.map_or(pts, |max_pts| max_pts.max(pts)));
    }

    /// Temporal distance between the last B picture and its forward reference.
    pub fn trb(&self) -> u16 {
        self.trb
    }

    /// Temporal distance between the last two reference pictures.
    pub fn trd(&self) -> u16 {
        self.trd
    }

    pub fn max_pts(&self) -> Option<u64> {
        self.max_pts
    }

    pub fn reset(&mut self) {
        *self = Default::default();
    }
}
