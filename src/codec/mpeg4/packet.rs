// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Start code scanning for MPEG-4 visual elementary streams.
//!
//! A [`Packet`] spans from the start code value byte up to (but excluding) the next start code
//! prefix, so that a packet is only known to be complete once the following start code has been
//! seen.

use thiserror::Error;

use crate::codec::mpeg4::parser::VopCodingType;

/// The `00 00 01` prefix shared by all MPEG-4 start codes.
pub const START_CODE_PREFIX: [u8; 3] = [0x00, 0x00, 0x01];

pub const VISUAL_OBJECT_SEQUENCE_START_CODE: u8 = 0xb0;
pub const VISUAL_OBJECT_SEQUENCE_END_CODE: u8 = 0xb1;
pub const USER_DATA_START_CODE: u8 = 0xb2;
pub const GROUP_OF_VOP_START_CODE: u8 = 0xb3;
pub const VISUAL_OBJECT_START_CODE: u8 = 0xb5;
pub const VOP_START_CODE: u8 = 0xb6;
pub const VIDEO_OBJECT_LAYER_FIRST: u8 = 0x20;

/// Size in bytes of the short video header start and end markers, as found in the stream.
pub const SHORT_VIDEO_MARKER_SIZE: usize = 3;

/// Type of a packet, derived from the start code value that opens it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketType {
    VideoObject(u8),
    VideoObjectLayer(u8),
    VisualObjectSequenceStart,
    VisualObjectSequenceEnd,
    UserData,
    GroupOfVop,
    VideoSessionError,
    VisualObject,
    VideoObjectPlane,
    Fba,
    FbaPlane,
    Mesh,
    MeshPlane,
    StillTextureObject,
    TextureSpatial,
    TextureSnrLayer,
    TextureTile,
    ShapeLayer,
    Stuffing,
    System(u8),
    Reserved(u8),
    /// `short_video_start_marker`, opening an H.263 picture.
    ShortVideoStart,
    /// `short_video_end_marker`.
    ShortVideoEnd,
}

impl From<u8> for PacketType {
    fn from(code: u8) -> Self {
        match code {
            0x00..=0x1f => PacketType::VideoObject(code),
            0x20..=0x2f => PacketType::VideoObjectLayer(code),
            0xb0 => PacketType::VisualObjectSequenceStart,
            0xb1 => PacketType::VisualObjectSequenceEnd,
            0xb2 => PacketType::UserData,
            0xb3 => PacketType::GroupOfVop,
            0xb4 => PacketType::VideoSessionError,
            0xb5 => PacketType::VisualObject,
            0xb6 => PacketType::VideoObjectPlane,
            0xba => PacketType::Fba,
            0xbb => PacketType::FbaPlane,
            0xbc => PacketType::Mesh,
            0xbd => PacketType::MeshPlane,
            0xbe => PacketType::StillTextureObject,
            0xbf => PacketType::TextureSpatial,
            0xc0 => PacketType::TextureSnrLayer,
            0xc1 => PacketType::TextureTile,
            0xc2 => PacketType::ShapeLayer,
            0xc3 => PacketType::Stuffing,
            0xc6..=0xff => PacketType::System(code),
            _ => PacketType::Reserved(code),
        }
    }
}

impl PacketType {
    /// Whether packets of this type carry nothing the video decoder needs.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            PacketType::UserData
                | PacketType::VideoSessionError
                | PacketType::Fba
                | PacketType::FbaPlane
                | PacketType::Mesh
                | PacketType::MeshPlane
                | PacketType::StillTextureObject
                | PacketType::TextureSpatial
                | PacketType::TextureSnrLayer
                | PacketType::TextureTile
                | PacketType::ShapeLayer
                | PacketType::Stuffing
                | PacketType::System(_)
        )
    }

    /// Whether the packet is complete as soon as its start code is seen.
    fn is_self_delimited(&self) -> bool {
        matches!(
            self,
            PacketType::VisualObjectSequenceEnd | PacketType::ShortVideoEnd
        )
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ScanError {
    #[error("no start code found")]
    NoPacket,
    #[error("the end of the packet has not been received yet")]
    NoPacketEnd,
}

#[derive(Debug, Clone)]
pub struct Packet<'a> {
    /// The buffer this packet was found in.
    pub data: &'a [u8],
    pub packet_type: PacketType,
    /// Offset of the start code prefix (or short video marker) in `data`.
    pub sc_offset: usize,
    /// Offset of the first byte handed to the header parsers.
    pub offset: usize,
    /// Number of bytes from `offset` to the next start code.
    pub size: usize,
}

impl<'a> Packet<'a> {
    fn find_start_code(data: &[u8], offset: usize) -> Option<usize> {
        data.get(offset..)?
            .windows(3)
            .position(|window| window == START_CODE_PREFIX)
            .map(|pos| pos + offset)
    }

    fn find_short_video_marker(data: &[u8], offset: usize) -> Option<usize> {
        data.get(offset..)?
            .windows(3)
            .position(|window| {
                window[0] == 0x00
                    && window[1] == 0x00
                    && matches!(window[2] & 0xfc, 0x80 | 0xfc)
            })
            .map(|pos| pos + offset)
    }

    /// Find the next MPEG-4 packet at or after `pos`.
    ///
    /// User data packets are stepped over when `skip_user_data` is set.
    pub fn next(data: &'a [u8], pos: usize, skip_user_data: bool) -> Result<Self, ScanError> {
        let mut pos = pos;

        loop {
            let sc_offset = Self::find_start_code(data, pos).ok_or(ScanError::NoPacket)?;
            let offset = sc_offset + START_CODE_PREFIX.len();

            // A prefix aligned with the end of the buffer needs its value byte first.
            let code = *data.get(offset).ok_or(ScanError::NoPacketEnd)?;
            let packet_type = PacketType::from(code);

            let size = if packet_type.is_self_delimited() {
                1
            } else {
                match Self::find_start_code(data, offset + 1) {
                    Some(next) => next - offset,
                    None => return Err(ScanError::NoPacketEnd),
                }
            };

            if skip_user_data && packet_type == PacketType::UserData {
                pos = offset + size;
                continue;
            }

            return Ok(Packet {
                data,
                packet_type,
                sc_offset,
                offset,
                size,
            });
        }
    }

    /// Find the next short video header picture (or end marker) at or after `pos`.
    ///
    /// The 22-bit markers are byte aligned and belong to the header, so `offset` equals
    /// `sc_offset` for these packets.
    pub fn next_short_header(data: &'a [u8], pos: usize) -> Result<Self, ScanError> {
        let sc_offset = Self::find_short_video_marker(data, pos).ok_or(ScanError::NoPacket)?;

        if data[sc_offset + 2] & 0xfc == 0xfc {
            return Ok(Packet {
                data,
                packet_type: PacketType::ShortVideoEnd,
                sc_offset,
                offset: sc_offset,
                size: SHORT_VIDEO_MARKER_SIZE,
            });
        }

        let next = Self::find_short_video_marker(data, sc_offset + SHORT_VIDEO_MARKER_SIZE)
            .ok_or(ScanError::NoPacketEnd)?;

        Ok(Packet {
            data,
            packet_type: PacketType::ShortVideoStart,
            sc_offset,
            offset: sc_offset,
            size: next - sc_offset,
        })
    }

    /// Offset right past the end of this packet, where scanning should resume.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

impl<'a> AsRef<[u8]> for Packet<'a> {
    fn as_ref(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.size]
    }
}

/// Length in bits of the resync marker preceding video packets of a VOP.
pub fn resync_marker_len(coding_type: u8, fcode_forward: u8, fcode_backward: u8) -> u32 {
    match VopCodingType::n(coding_type) {
        Some(VopCodingType::I) | None => 17,
        Some(VopCodingType::P) | Some(VopCodingType::S) => 16 + u32::from(fcode_forward),
        // B-VOPs always use at least 17 zeros.
        Some(VopCodingType::B) => 16 + u32::from(fcode_forward.max(fcode_backward).max(2)),
    }
}

/// Returns the byte offsets in `region` where a byte aligned resync marker of `marker_len`
/// bits starts. The marker is `marker_len - 1` zero bits followed by a one.
///
/// Offset 0 is never reported, as the first video packet of a VOP has no marker.
pub fn find_resync_markers(region: &[u8], marker_len: u32) -> Vec<usize> {
    // The first 16 zero bits fill two bytes, the rest live at the top of the third one.
    let tail_bits = marker_len.saturating_sub(16).clamp(1, 8);
    let shift = 8 - tail_bits;

    region
        .windows(3)
        .enumerate()
        .skip(1)
        .filter(|(_, w)| w[0] == 0x00 && w[1] == 0x00 && (w[2] >> shift) == 1)
        .map(|(pos, _)| pos)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_start_codes() {
        assert_eq!(PacketType::from(0x00), PacketType::VideoObject(0x00));
        assert_eq!(PacketType::from(0x1f), PacketType::VideoObject(0x1f));
        assert_eq!(PacketType::from(0x21), PacketType::VideoObjectLayer(0x21));
        assert_eq!(PacketType::from(0x30), PacketType::Reserved(0x30));
        assert_eq!(PacketType::from(0xb7), PacketType::Reserved(0xb7));
        assert_eq!(PacketType::from(0xb6), PacketType::VideoObjectPlane);
        assert_eq!(PacketType::from(0xc3), PacketType::Stuffing);
        assert_eq!(PacketType::from(0xc4), PacketType::Reserved(0xc4));
        assert_eq!(PacketType::from(0xc6), PacketType::System(0xc6));

        assert!(PacketType::UserData.is_ignorable());
        assert!(PacketType::TextureTile.is_ignorable());
        assert!(!PacketType::VideoObjectPlane.is_ignorable());
        assert!(!PacketType::Reserved(0xb8).is_ignorable());
    }

    #[test]
    fn walk_packets() {
        let data = [
            0x00, 0x00, 0x01, 0xb0, 0x01, 0x00, 0x00, 0x01, 0xb5, 0x09, 0x00, 0x00, 0x01, 0xb6,
            0x10, 0x20, 0x00, 0x00, 0x01, 0xb1,
        ];

        let packet = Packet::next(&data, 0, false).unwrap();
        assert_eq!(packet.packet_type, PacketType::VisualObjectSequenceStart);
        assert_eq!(packet.sc_offset, 0);
        assert_eq!(packet.offset, 3);
        assert_eq!(packet.as_ref(), &[0xb0, 0x01]);

        let packet = Packet::next(&data, packet.end(), false).unwrap();
        assert_eq!(packet.packet_type, PacketType::VisualObject);
        assert_eq!(packet.as_ref(), &[0xb5, 0x09]);

        let packet = Packet::next(&data, packet.end(), false).unwrap();
        assert_eq!(packet.packet_type, PacketType::VideoObjectPlane);
        assert_eq!(packet.as_ref(), &[0xb6, 0x10, 0x20]);

        // The end of sequence code does not need a terminator.
        let packet = Packet::next(&data, packet.end(), false).unwrap();
        assert_eq!(packet.packet_type, PacketType::VisualObjectSequenceEnd);
        assert_eq!(packet.end(), data.len());

        assert_eq!(
            Packet::next(&data, data.len(), false).unwrap_err(),
            ScanError::NoPacket
        );
    }

    #[test]
    fn incomplete_packets() {
        // No terminating start code yet.
        let data = [0x00, 0x00, 0x01, 0xb6, 0x10, 0x20];
        assert_eq!(
            Packet::next(&data, 0, false).unwrap_err(),
            ScanError::NoPacketEnd
        );

        // Prefix aligned exactly with the end of the buffer.
        let data = [0x12, 0x34, 0x00, 0x00, 0x01];
        assert_eq!(
            Packet::next(&data, 0, false).unwrap_err(),
            ScanError::NoPacketEnd
        );

        // No start code at all.
        let data = [0x12, 0x34, 0x00, 0x00];
        assert_eq!(
            Packet::next(&data, 0, false).unwrap_err(),
            ScanError::NoPacket
        );
    }

    #[test]
    fn skip_user_data() {
        let data = [
            0x00, 0x00, 0x01, 0xb2, b'x', b'v', b'i', b'd', 0x00, 0x00, 0x01, 0xb3, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01, 0xb2,
        ];

        let packet = Packet::next(&data, 0, false).unwrap();
        assert_eq!(packet.packet_type, PacketType::UserData);

        let packet = Packet::next(&data, 0, true).unwrap();
        assert_eq!(packet.packet_type, PacketType::GroupOfVop);
        assert_eq!(packet.size, 4);

        // Trailing user data without a terminator is incomplete, skipped or not.
        assert_eq!(
            Packet::next(&data, packet.end(), true).unwrap_err(),
            ScanError::NoPacketEnd
        );
    }

    #[test]
    fn short_video_markers() {
        let data = [
            0x11, 0x00, 0x00, 0x80, 0x02, 0x0a, 0x00, 0x00, 0x82, 0x06, 0x00, 0x00, 0xfc,
        ];

        let packet = Packet::next_short_header(&data, 0).unwrap();
        assert_eq!(packet.packet_type, PacketType::ShortVideoStart);
        assert_eq!(packet.offset, 1);
        assert_eq!(packet.size, 5);

        let packet = Packet::next_short_header(&data, packet.end()).unwrap();
        assert_eq!(packet.packet_type, PacketType::ShortVideoStart);
        assert_eq!(packet.size, 4);

        let packet = Packet::next_short_header(&data, packet.end()).unwrap();
        assert_eq!(packet.packet_type, PacketType::ShortVideoEnd);
        assert_eq!(packet.end(), data.len());

        // A GOB start code (group number 1) does not terminate a picture.
        let data = [0x00, 0x00, 0x80, 0x02, 0x00, 0x00, 0x84, 0x10];
        assert_eq!(
            Packet::next_short_header(&data, 0).unwrap_err(),
            ScanError::NoPacketEnd
        );
    }

    #[test]
    fn resync_markers() {
        assert_eq!(resync_marker_len(VopCodingType::I as u8, 0, 0), 17);
        assert_eq!(resync_marker_len(VopCodingType::P as u8, 1, 0), 17);
        assert_eq!(resync_marker_len(VopCodingType::S as u8, 3, 0), 19);
        assert_eq!(resync_marker_len(VopCodingType::B as u8, 1, 1), 18);
        assert_eq!(resync_marker_len(VopCodingType::B as u8, 2, 4), 20);

        // 17-bit markers at 3 and 9; the pattern at 0 is ignored.
        let region = [
            0x00, 0x00, 0x80, 0x00, 0x00, 0x80, 0x12, 0x34, 0x56, 0x00, 0x00, 0xff, 0x00,
        ];
        assert_eq!(find_resync_markers(&region, 17), vec![3, 9]);

        // A 19-bit marker needs "001" at the top of the third byte.
        let region = [0x55, 0x00, 0x00, 0x20, 0x00, 0x00, 0x80];
        assert_eq!(find_resync_markers(&region, 19), vec![1]);

        // B-VOPs with both fcodes at 1 use 18-bit markers, "01" at the top of the third byte.
        let b_len = resync_marker_len(VopCodingType::B as u8, 1, 1);
        let region = [0x55, 0x55, 0x55, 0x00, 0x00, 0x40, 0x21, 0x55];
        assert_eq!(find_resync_markers(&region, b_len), vec![3]);
        let region = [0x55, 0x55, 0x55, 0x00, 0x00, 0x80, 0x21, 0x55];
        assert!(find_resync_markers(&region, b_len).is_empty());
    }
}
