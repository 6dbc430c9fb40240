// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stateless decoder for MPEG-4 Part 2 visual streams and their H.263 (short video header)
//! subset.
//!
//! Input is accumulated in a sub-buffer and split into start code delimited packets. Header
//! packets update the decoder state, and each VOP (or short header picture) is turned into a
//! picture parameter buffer and one slice per video packet before being submitted to the
//! backend.

pub mod dummy;
pub mod params;

use std::rc::Rc;

use anyhow::anyhow;
use anyhow::Context;
use byteorder::BigEndian;
use byteorder::WriteBytesExt;
use bytes::BufMut;
use bytes::BytesMut;
use log::debug;
use log::warn;

use crate::codec::mpeg4::dpb::Dpb;
use crate::codec::mpeg4::dpb::PictureData;
use crate::codec::mpeg4::packet::find_resync_markers;
use crate::codec::mpeg4::packet::resync_marker_len;
use crate::codec::mpeg4::packet::Packet;
use crate::codec::mpeg4::packet::PacketType;
use crate::codec::mpeg4::packet::ScanError;
use crate::codec::mpeg4::packet::USER_DATA_START_CODE;
use crate::codec::mpeg4::packet::VISUAL_OBJECT_SEQUENCE_END_CODE;
use crate::codec::mpeg4::parser::GroupOfVop;
use crate::codec::mpeg4::parser::VideoObjectLayer;
use crate::codec::mpeg4::parser::VideoObjectPlane;
use crate::codec::mpeg4::parser::VideoPacketHeader;
use crate::codec::mpeg4::parser::VisualObject;
use crate::codec::mpeg4::parser::VisualObjectSequence;
use crate::codec::mpeg4::parser::VisualProfile;
use crate::codec::mpeg4::parser::VopCodingType;
use crate::codec::mpeg4::short_header::ShortVideoHeader;
use crate::codec::mpeg4::timing::TemporalModel;
use crate::decoder::stateless::mpeg4::params::IqMatrixBuffer;
use crate::decoder::stateless::mpeg4::params::ParamBuffer;
use crate::decoder::stateless::mpeg4::params::PictureParameterBuffer;
use crate::decoder::stateless::mpeg4::params::SliceParameterBuffer;
use crate::decoder::stateless::DecodeError;
use crate::decoder::stateless::DecodeStatus;
use crate::decoder::stateless::DecodingState;
use crate::decoder::stateless::StatelessBackendResult;
use crate::decoder::stateless::StatelessCodec;
use crate::decoder::stateless::StatelessDecoder;
use crate::decoder::stateless::StatelessDecoderBackend;
use crate::decoder::stateless::StatelessDecoderBackendPicture;
use crate::decoder::stateless::StatelessVideoDecoder;
use crate::decoder::stateless::SurfaceWait;
use crate::decoder::BlockingMode;
use crate::decoder::DecodedHandle;
use crate::decoder::DecoderEvent;
use crate::decoder::StreamInfo;
use crate::FrameRate;
use crate::PixelAspectRatio;
use crate::Resolution;

/// Number of reference pictures an MPEG-4 context needs.
const REF_FRAMES: u32 = 2;

/// Bytes kept from a buffer without any start code, as they may hold the start of a prefix.
const MAX_PREFIX_TAIL: usize = 3;

/// H.263 pictures are 12:11 at 30000/1001 frames per second.
const SVH_FRAME_RATE: FrameRate = FrameRate {
    numerator: 30000,
    denominator: 1001,
};
const SVH_PIXEL_ASPECT_RATIO: PixelAspectRatio = PixelAspectRatio {
    width: 12,
    height: 11,
};

/// Profiles a backend context can be created for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Mpeg4Profile {
    #[default]
    Simple,
    AdvancedSimple,
}

impl TryFrom<VisualProfile> for Mpeg4Profile {
    type Error = String;

    fn try_from(profile: VisualProfile) -> Result<Self, Self::Error> {
        match profile {
            VisualProfile::Simple => Ok(Mpeg4Profile::Simple),
            VisualProfile::AdvancedSimple | VisualProfile::SimpleScalable => {
                Ok(Mpeg4Profile::AdvancedSimple)
            }
            other => Err(format!("{:?}", other)),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Entrypoint {
    /// Slice-level decoding, where the backend does the variable length decoding.
    #[default]
    Vld,
}

/// Parameters of the backend decoding context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextInfo {
    pub profile: Mpeg4Profile,
    pub entrypoint: Entrypoint,
    pub resolution: Resolution,
    pub ref_frames: u32,
}

/// Decoder configuration, usually provided by the container.
#[derive(Clone, Debug, Default)]
pub struct Mpeg4Config {
    /// The stream is H.263 baseline, delimited by short video markers.
    pub short_video_header: bool,
    /// Headers received out of band, decoded before the first input.
    pub codec_data: Option<Vec<u8>>,
    pub surface_wait: SurfaceWait,
}

/// Stateless backend methods specific to MPEG-4.
pub trait StatelessMpeg4DecoderBackend:
    StatelessDecoderBackend + StatelessDecoderBackendPicture<Mpeg4>
{
    /// Whether a context can be created for `profile` using `entrypoint`.
    fn supports_profile(&self, profile: Mpeg4Profile, entrypoint: Entrypoint) -> bool;

    /// Called when new stream parameters are found.
    fn new_sequence(&mut self, stream_info: &StreamInfo) -> StatelessBackendResult<()>;

    /// Makes sure a decoding context matching `context` exists, (re)creating it if needed.
    fn ensure_context(&mut self, context: &ContextInfo) -> StatelessBackendResult<()>;

    /// Whether a surface is free to decode the next picture into.
    fn surface_available(&self) -> bool;

    /// Called when the decoding of a new picture starts.
    fn new_picture(&mut self, timestamp: u64) -> StatelessBackendResult<Self::Picture>;

    /// Attaches a parameter buffer or slice to `picture`.
    fn add_buffer(
        &mut self,
        picture: &mut Self::Picture,
        buffer: ParamBuffer<'_, Self::Handle>,
    ) -> StatelessBackendResult<()>;

    /// Submits the picture to the accelerator.
    fn submit_picture(&mut self, picture: Self::Picture) -> StatelessBackendResult<Self::Handle>;
}

/// What the caller should do after a packet has been processed.
enum PacketStatus {
    Continue,
    EndOfStream,
}

pub struct Mpeg4DecoderState<B: StatelessDecoderBackend> {
    config: Mpeg4Config,
    /// Whether the stream is split on short video markers rather than start codes.
    is_svh: bool,

    vos: Option<VisualObjectSequence>,
    vo: Option<VisualObject>,
    vol: Option<Rc<VideoObjectLayer>>,
    /// Profile signalled by the stream.
    profile: Mpeg4Profile,
    /// Profile the current context was requested for.
    requested_profile: Option<Mpeg4Profile>,
    context: Option<ContextInfo>,
    stream_info: Option<StreamInfo>,

    timing: TemporalModel,
    dpb: Dpb<B::Handle>,

    /// Input not consumed yet.
    sub_buffer: BytesMut,
    /// Number of bytes of `sub_buffer` that come from previous calls.
    carried_len: usize,
    /// Timestamp of the input the carried bytes started in.
    carried_timestamp: Option<u64>,
    /// Consecutive failed surface checks in non-blocking mode.
    surface_retries: u32,
    decode_order: u64,
}

impl<B: StatelessDecoderBackend> Default for Mpeg4DecoderState<B> {
    fn default() -> Self {
        Self {
            config: Default::default(),
            is_svh: false,
            vos: None,
            vo: None,
            vol: None,
            profile: Default::default(),
            requested_profile: None,
            context: None,
            stream_info: None,
            timing: Default::default(),
            dpb: Default::default(),
            sub_buffer: Default::default(),
            carried_len: 0,
            carried_timestamp: None,
            surface_retries: 0,
            decode_order: 0,
        }
    }
}

impl<B: StatelessDecoderBackend> Mpeg4DecoderState<B> {
    fn next_decode_order(&mut self) -> u64 {
        let decode_order = self.decode_order;
        self.decode_order += 1;
        decode_order
    }
}

/// [`StatelessCodec`] structure to use in order to create a MPEG-4 stateless decoder.
///
/// # Accepted input
///
/// The decoder accepts an elementary stream split at arbitrary byte positions. Incomplete packets
/// are kept until the rest of their data is received, and the start of the next packet marks
/// the end of the previous one: call [`StatelessVideoDecoder::flush`] at the end of the stream
/// to decode the last picture.
pub struct Mpeg4;

impl StatelessCodec for Mpeg4 {
    type DecoderState<B: StatelessDecoderBackend + StatelessDecoderBackendPicture<Self>> =
        Mpeg4DecoderState<B>;
}

/// Splits the payload of `vop` into one slice per video packet.
fn vop_slices<'a>(
    vol: &VideoObjectLayer,
    vop: &VideoObjectPlane,
    data: &'a [u8],
) -> anyhow::Result<Vec<(SliceParameterBuffer, &'a [u8])>> {
    let region = data
        .get(vop.size / 8..)
        .ok_or_else(|| anyhow!("VOP header larger than its packet"))?;

    let first = SliceParameterBuffer {
        macroblock_offset: (vop.size % 8) as u32,
        macroblock_number: 0,
        quant_scale: u32::from(vop.quant),
    };

    if vol.resync_marker_disable {
        return Ok(vec![(first, region)]);
    }

    let marker_len = resync_marker_len(vop.coding_type, vop.fcode_forward, vop.fcode_backward);
    let markers = find_resync_markers(region, marker_len);

    let first_end = markers.first().copied().unwrap_or(region.len());
    let mut slices = vec![(first, &region[..first_end])];

    for (i, &start) in markers.iter().enumerate() {
        let end = markers.get(i + 1).copied().unwrap_or(region.len());
        let packet = &region[start..end];
        let hdr = VideoPacketHeader::parse(packet, vol, vop)
            .with_context(|| format!("invalid video packet at offset {}", start))?;

        slices.push((
            SliceParameterBuffer {
                macroblock_offset: (hdr.size % 8) as u32,
                macroblock_number: u32::from(hdr.macroblock_number),
                quant_scale: u32::from(hdr.quant_scale),
            },
            &packet[hdr.size / 8..],
        ));
    }

    Ok(slices)
}

impl<B> StatelessDecoder<Mpeg4, B>
where
    B: StatelessMpeg4DecoderBackend,
{
    /// Creates a decoder using `config`.
    pub fn with_config(backend: B, blocking_mode: BlockingMode, config: Mpeg4Config) -> Self {
        let mut decoder = Self::new(backend, blocking_mode);
        decoder.codec.config = config;
        decoder
    }

    /// Sets up the decoder for the configured stream type and decodes the codec data, if any.
    fn open(&mut self) -> Result<(), DecodeError> {
        self.codec.is_svh = self.codec.config.short_video_header;
        self.decoding_state = DecodingState::Opening;

        if self.codec.is_svh {
            return Ok(());
        }

        let Some(mut codec_data) = self.codec.config.codec_data.clone() else {
            return Ok(());
        };

        debug!("Decoding {} bytes of codec data", codec_data.len());

        // Terminate the last header so the scanner sees its end.
        codec_data
            .write_u32::<BigEndian>(0x0000_0100 | u32::from(USER_DATA_START_CODE))
            .context("while terminating codec data")?;

        let mut pos = 0;
        while let Ok(packet) = Packet::next(&codec_data, pos, true) {
            self.decode_packet(&packet, None)?;
            pos = packet.end();
        }

        Ok(())
    }

    /// Checks that a surface is free for the next picture, waiting for one in blocking mode.
    fn check_surface(&mut self) -> Result<(), DecodeError> {
        if self.backend.surface_available() {
            self.codec.surface_retries = 0;
            return Ok(());
        }

        let wait = self.codec.config.surface_wait;
        match self.blocking_mode {
            BlockingMode::Blocking => {
                let backend = &self.backend;
                if wait.wait(|| backend.surface_available()) {
                    self.codec.surface_retries = 0;
                    Ok(())
                } else {
                    Err(DecodeError::SurfaceTimeout)
                }
            }
            BlockingMode::NonBlocking => {
                self.codec.surface_retries += 1;
                if self.codec.surface_retries > wait.max_retries {
                    Err(DecodeError::SurfaceTimeout)
                } else {
                    Err(DecodeError::NoSurfaceAvailable)
                }
            }
        }
    }

    /// Applies new stream parameters, notifying the backend and the client if they changed.
    fn apply_stream_info(&mut self, info: StreamInfo) -> Result<(), DecodeError> {
        if self.codec.stream_info.as_ref() == Some(&info) {
            return Ok(());
        }

        debug!("New stream parameters: {:?}", info);
        self.backend.new_sequence(&info)?;
        self.coded_resolution = info.coded_resolution;
        self.ready_queue.push_format_changed(info.clone());
        self.codec.stream_info = Some(info);

        Ok(())
    }

    /// Makes sure the backend has a context for `profile` at `resolution`.
    fn ensure_context(
        &mut self,
        profile: Mpeg4Profile,
        resolution: Resolution,
    ) -> Result<(), DecodeError> {
        let up_to_date = self.codec.requested_profile == Some(profile)
            && self
                .codec
                .context
                .as_ref()
                .is_some_and(|context| context.resolution == resolution);
        if up_to_date {
            return Ok(());
        }

        let candidates: &[Mpeg4Profile] = match profile {
            Mpeg4Profile::Simple => &[Mpeg4Profile::Simple, Mpeg4Profile::AdvancedSimple],
            Mpeg4Profile::AdvancedSimple => &[Mpeg4Profile::AdvancedSimple],
        };

        let supported = candidates
            .iter()
            .copied()
            .find(|&candidate| self.backend.supports_profile(candidate, Entrypoint::Vld))
            .ok_or_else(|| DecodeError::UnsupportedProfile(format!("{:?}", profile)))?;

        let context = ContextInfo {
            profile: supported,
            entrypoint: Entrypoint::Vld,
            resolution,
            ref_frames: REF_FRAMES,
        };

        debug!("Requesting decoding context {:?}", context);
        self.backend.ensure_context(&context)?;

        self.codec.context = Some(context);
        self.codec.requested_profile = Some(profile);
        if self.decoding_state == DecodingState::Opening {
            self.decoding_state = DecodingState::Ready;
        }

        Ok(())
    }

    /// Outputs every pending picture and marks the end of the sequence.
    fn end_of_sequence(&mut self) {
        debug!("End of sequence");
        let pending = self.codec.dpb.flush();
        self.ready_queue.extend(pending);
        self.decoding_state = DecodingState::Flushed;
    }

    fn start_picture(&mut self, pic: PictureData) {
        if let Some(handle) = self.codec.dpb.start_picture(pic) {
            self.ready_queue.push_frame(handle);
        }
    }

    fn finish_picture(&mut self, handle: B::Handle) {
        if let Some(handle) = self.codec.dpb.finish_picture(handle) {
            self.ready_queue.push_frame(handle);
        }

        self.decoding_state = DecodingState::Decoding;
    }

    /// Attaches the picture parameters and `slices` to `picture` and submits it. The current
    /// picture of the DPB gives the reference pictures.
    fn submit_picture(
        &mut self,
        mut picture: B::Picture,
        mut params: PictureParameterBuffer,
        slices: Vec<(SliceParameterBuffer, &[u8])>,
    ) -> Result<B::Handle, DecodeError> {
        let dpb = &self.codec.dpb;
        let prev = dpb.prev().and_then(|entry| entry.handle.as_ref());
        let next = dpb.next().and_then(|entry| entry.handle.as_ref());

        let (forward_reference, backward_reference) =
            match VopCodingType::n(params.vop_fields.coding_type) {
                Some(VopCodingType::B) => {
                    if next.is_none() {
                        warn!("B picture without backward reference");
                    }

                    params.trb = self.codec.timing.trb();
                    params.trd = self.codec.timing.trd();
                    params.vop_fields.backward_reference_vop_coding_type = dpb
                        .next()
                        .map_or(0, |entry| entry.pic.coding_type as u8);
                    (prev, next)
                }
                Some(VopCodingType::P) | Some(VopCodingType::S) => {
                    params.trd = self.codec.timing.trd();
                    (prev, None)
                }
                _ => (None, None),
            };

        self.backend
            .add_buffer(
                &mut picture,
                ParamBuffer::Picture {
                    params,
                    forward_reference,
                    backward_reference,
                },
            )
            .map_err(DecodeError::AllocationFailed)?;

        for (params, data) in slices {
            self.backend
                .add_buffer(&mut picture, ParamBuffer::Slice { params, data })
                .map_err(DecodeError::AllocationFailed)?;
        }

        let handle = self.backend.submit_picture(picture)?;

        if self.blocking_mode == BlockingMode::Blocking {
            handle.sync()?;
        }

        Ok(handle)
    }

    fn handle_visual_object_sequence(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let vos = VisualObjectSequence::parse(data)?;
        debug!(
            "Visual object sequence: {:?} profile, level {}",
            vos.profile, vos.level
        );

        let profile = Mpeg4Profile::try_from(vos.profile).map_err(DecodeError::UnsupportedProfile)?;
        if profile != self.codec.profile {
            debug!("Profile changed to {:?}", profile);
            self.codec.profile = profile;
        }

        self.codec.vos = Some(vos);
        Ok(())
    }

    fn handle_video_object_layer(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let vol = VideoObjectLayer::parse(data, self.codec.vo.as_ref())?;
        debug!(
            "Video object layer: {}x{}, time increment resolution {}, interlaced {}",
            vol.width, vol.height, vol.vop_time_increment_resolution, vol.interlaced
        );

        if vol.chroma_format != 1 {
            return Err(DecodeError::UnsupportedChromaFormat(vol.chroma_format));
        }

        let info = StreamInfo {
            coded_resolution: vol.resolution(),
            frame_rate: vol.frame_rate(),
            pixel_aspect_ratio: vol.pixel_aspect_ratio(),
        };

        self.codec.vol = Some(Rc::new(vol));
        self.apply_stream_info(info)
    }

    fn handle_group_of_vop(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let gov = if data.len() >= GroupOfVop::SIZE {
            GroupOfVop::parse(data)?
        } else {
            warn!("Truncated group of VOP header, assuming a closed group");
            GroupOfVop {
                closed: true,
                ..Default::default()
            }
        };

        debug!(
            "Group of VOP at {}s, closed {}, broken link {}",
            gov.time_code_seconds(),
            gov.closed,
            gov.broken_link
        );

        self.codec.timing.start_gop(&gov);
        self.codec.dpb.start_gop(gov.closed, gov.broken_link);
        Ok(())
    }

    fn handle_video_object_plane(
        &mut self,
        data: &[u8],
        timestamp: Option<u64>,
    ) -> Result<(), DecodeError> {
        self.check_surface()?;

        let vol = self
            .codec
            .vol
            .clone()
            .ok_or_else(|| anyhow!("VOP received before any video object layer"))?;
        let vop = VideoObjectPlane::parse(data, &vol)?;

        self.ensure_context(self.codec.profile, vol.resolution())?;

        if self.codec.dpb.current().is_some() {
            warn!("Dropping unfinished picture");
            self.codec.dpb.discard_current();
        }

        let coding_type = vop
            .picture_type()
            .ok_or(DecodeError::UnknownPictureType(vop.coding_type))?;

        if !vop.coded {
            debug!("Not coded {:?} VOP, repeating the previous picture", coding_type);
            if let Some(handle) = self.codec.dpb.reoutput_prev() {
                self.ready_queue.push_frame(handle);
            }
            return Ok(());
        }

        let pts = self.codec.timing.vop_pts(&vol, &vop, timestamp);
        debug!(
            "{:?} VOP, time increment {}, pts {}",
            coding_type, vop.time_increment, pts
        );

        let mut picture = self
            .backend
            .new_picture(pts)
            .map_err(DecodeError::AllocationFailed)?;

        if let Some(iq_matrix) = IqMatrixBuffer::from_vol(&vol) {
            self.backend
                .add_buffer(&mut picture, ParamBuffer::IqMatrix(iq_matrix))
                .map_err(DecodeError::AllocationFailed)?;
        }

        let pic = PictureData {
            coding_type,
            pts,
            decode_order: self.codec.next_decode_order(),
            is_reference: PictureData::is_reference_type(coding_type, vop.coded),
        };
        self.start_picture(pic);

        let params = PictureParameterBuffer::from_vop(&vol, &vop);
        let result = vop_slices(&vol, &vop, data)
            .map_err(DecodeError::from)
            .and_then(|slices| self.submit_picture(picture, params, slices));

        match result {
            Ok(handle) => {
                self.finish_picture(handle);
                Ok(())
            }
            Err(e) => {
                self.codec.dpb.discard_current();
                Err(e)
            }
        }
    }

    fn handle_short_video_header(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        self.check_surface()?;

        let svh = ShortVideoHeader::parse(data)?;
        let resolution = svh.resolution();

        self.apply_stream_info(StreamInfo {
            coded_resolution: resolution,
            frame_rate: Some(SVH_FRAME_RATE),
            pixel_aspect_ratio: SVH_PIXEL_ASPECT_RATIO,
        })?;
        self.ensure_context(Mpeg4Profile::Simple, resolution)?;

        let coding_type = svh.picture_type();
        let pts = self.codec.timing.svh_pts(svh.temporal_reference);
        debug!(
            "{:?} short header picture, temporal reference {}, pts {}",
            coding_type, svh.temporal_reference, pts
        );

        let picture = self
            .backend
            .new_picture(pts)
            .map_err(DecodeError::AllocationFailed)?;

        let pic = PictureData {
            coding_type,
            pts,
            decode_order: self.codec.next_decode_order(),
            is_reference: true,
        };
        self.start_picture(pic);

        let params = PictureParameterBuffer::from_short_header(&svh, self.codec.vol.as_deref());
        let slice = SliceParameterBuffer {
            macroblock_offset: (svh.size % 8) as u32,
            macroblock_number: 0,
            quant_scale: u32::from(svh.vop_quant),
        };
        let payload = data.get(svh.size / 8..).unwrap_or_default();

        match self.submit_picture(picture, params, vec![(slice, payload)]) {
            Ok(handle) => {
                self.finish_picture(handle);
                Ok(())
            }
            Err(e) => {
                self.codec.dpb.discard_current();
                Err(e)
            }
        }
    }

    /// Processes a single packet. `timestamp` is the timestamp of the input it started in.
    fn decode_packet(
        &mut self,
        packet: &Packet,
        timestamp: Option<u64>,
    ) -> Result<PacketStatus, DecodeError> {
        let data = packet.as_ref();

        if packet.packet_type.is_ignorable() {
            debug!(
                "Skipping {:?} packet, {} bytes",
                packet.packet_type, packet.size
            );
            return Ok(PacketStatus::Continue);
        }

        match packet.packet_type {
            PacketType::VisualObjectSequenceStart => self.handle_visual_object_sequence(data)?,
            PacketType::VisualObjectSequenceEnd | PacketType::ShortVideoEnd => {
                self.end_of_sequence();
                return Ok(PacketStatus::EndOfStream);
            }
            PacketType::VisualObject => {
                self.codec.vo = Some(VisualObject::parse(data)?);
            }
            PacketType::VideoObjectLayer(_) => self.handle_video_object_layer(data)?,
            PacketType::GroupOfVop => self.handle_group_of_vop(data)?,
            PacketType::VideoObjectPlane => self.handle_video_object_plane(data, timestamp)?,
            PacketType::ShortVideoStart => self.handle_short_video_header(data)?,
            PacketType::VideoObject(code) => {
                warn!("Ignoring video object start code {:#04x}", code)
            }
            PacketType::Reserved(code) => warn!("Ignoring reserved start code {:#04x}", code),
            // Skipped above.
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
            | PacketType::System(_) => (),
        }

        Ok(PacketStatus::Continue)
    }

    /// Decodes every complete packet of the sub-buffer and keeps the rest for later.
    fn process_sub_buffer(&mut self, timestamp: Option<u64>) -> Result<DecodeStatus, DecodeError> {
        let mut buffer = std::mem::take(&mut self.codec.sub_buffer);
        let carried_len = self.codec.carried_len;
        let carried_timestamp = self.codec.carried_timestamp;

        let mut pos = 0;
        let result = loop {
            let scan = if self.codec.is_svh {
                Packet::next_short_header(&buffer, pos)
            } else {
                Packet::next(&buffer, pos, false)
            };

            let packet = match scan {
                Ok(packet) => packet,
                Err(ScanError::NoPacket) => {
                    pos = pos.max(buffer.len().saturating_sub(MAX_PREFIX_TAIL));
                    break Ok(DecodeStatus::NeedMoreData);
                }
                Err(ScanError::NoPacketEnd) => break Ok(DecodeStatus::NeedMoreData),
            };

            let packet_timestamp = if packet.offset < carried_len {
                carried_timestamp
            } else {
                timestamp
            };

            match self.decode_packet(&packet, packet_timestamp) {
                Ok(PacketStatus::Continue) => pos = packet.end(),
                Ok(PacketStatus::EndOfStream) => {
                    pos = packet.end();
                    break Ok(DecodeStatus::EndOfStream);
                }
                Err(DecodeError::NoSurfaceAvailable) => {
                    pos = packet.sc_offset;
                    break Err(DecodeError::NoSurfaceAvailable);
                }
                Err(e) => {
                    pos = buffer.len();
                    break Err(e);
                }
            }
        };

        let tail = buffer.split_off(pos.min(buffer.len()));
        self.codec.carried_timestamp = if pos < carried_len {
            carried_timestamp
        } else {
            timestamp
        };
        self.codec.sub_buffer = tail;

        match result {
            Ok(DecodeStatus::NeedMoreData) if self.codec.sub_buffer.is_empty() => {
                Ok(DecodeStatus::Done)
            }
            result => result,
        }
    }
}

impl<B> StatelessVideoDecoder<B::Handle> for StatelessDecoder<Mpeg4, B>
where
    B: StatelessMpeg4DecoderBackend,
{
    fn decode(
        &mut self,
        timestamp: Option<u64>,
        bitstream: &[u8],
    ) -> Result<DecodeStatus, DecodeError> {
        let timestamp = timestamp.filter(|&timestamp| timestamp != 0);

        if self.decoding_state == DecodingState::Closed {
            self.open()?;
        }

        self.codec.carried_len = self.codec.sub_buffer.len();
        self.codec.sub_buffer.extend_from_slice(bitstream);

        self.process_sub_buffer(timestamp)
    }

    fn flush(&mut self) -> Result<DecodeStatus, DecodeError> {
        if self.decoding_state == DecodingState::Closed {
            return Ok(DecodeStatus::EndOfStream);
        }

        self.codec.carried_len = self.codec.sub_buffer.len();
        if self.codec.is_svh {
            self.codec.sub_buffer.put_slice(&[0x00, 0x00, 0xfc]);
        } else {
            self.codec
                .sub_buffer
                .put_u32(0x0000_0100 | u32::from(VISUAL_OBJECT_SEQUENCE_END_CODE));
        }

        let result = self.process_sub_buffer(None);
        if matches!(result, Err(DecodeError::NoSurfaceAvailable)) {
            return result;
        }

        // Garbage before the end code may have stopped the decoding early.
        if self.decoding_state != DecodingState::Flushed {
            self.end_of_sequence();
        }
        self.codec.sub_buffer.clear();

        result.map(|_| DecodeStatus::EndOfStream)
    }

    fn reset(&mut self) {
        self.codec.dpb.clear();
        self.codec.sub_buffer.clear();
        self.codec.carried_len = 0;
        self.codec.carried_timestamp = None;
        self.codec.timing.reset();
        self.codec.surface_retries = 0;
        self.ready_queue.clear();

        self.decoding_state = match (self.decoding_state, &self.codec.context) {
            (DecodingState::Closed, _) => DecodingState::Closed,
            (_, Some(_)) => DecodingState::Ready,
            (_, None) => DecodingState::Opening,
        };
    }

    fn close(&mut self) {
        let config = std::mem::take(&mut self.codec.config);
        self.codec = Mpeg4DecoderState {
            config,
            ..Default::default()
        };
        self.ready_queue.clear();
        self.coded_resolution = Default::default();
        self.decoding_state = DecodingState::Closed;
    }

    fn stream_info(&self) -> Option<&StreamInfo> {
        self.codec.stream_info.as_ref()
    }

    fn decoding_state(&self) -> DecodingState {
        self.decoding_state
    }

    fn next_event(&mut self) -> Option<DecoderEvent<B::Handle>> {
        (&mut self.ready_queue).next()
    }
}
