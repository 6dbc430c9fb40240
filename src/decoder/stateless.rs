// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stateless decoders.
//!
//! Stateless here refers to the backend API targeted by these decoders. The decoders themselves do
//! hold the decoding state so the backend doesn't need to.
//!
//! The [`StatelessDecoder`] struct is the basis of all stateless decoders. It is created by
//! combining a codec to a [backend](crate::backend), after which bitstream chunks can be
//! submitted through the [`StatelessVideoDecoder::decode`] method.

pub mod mpeg4;

use std::time::Duration;

use thiserror::Error;

use crate::decoder::BlockingMode;
use crate::decoder::DecodedHandle;
use crate::decoder::DecoderEvent;
use crate::decoder::EventQueue;
use crate::decoder::StreamInfo;
use crate::Resolution;

/// Error returned by stateless backend methods.
#[derive(Error, Debug)]
pub enum StatelessBackendError {
    #[error("not enough resources to proceed with the operation now")]
    OutOfResources,
    #[error("profile is not supported by the backend")]
    UnsupportedProfile,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type returned by stateless backend methods.
pub type StatelessBackendResult<T> = Result<T, StatelessBackendError>;

/// Lifecycle of a stateless decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodingState {
    /// Nothing has been set up yet. The next `decode` call opens the decoder.
    #[default]
    Closed,
    /// Codec data has been processed, but no backend context exists yet.
    Opening,
    /// A backend context exists and pictures can be submitted.
    Ready,
    /// At least one picture has been submitted since the last end of sequence.
    Decoding,
    /// An end of sequence has been processed and all pending pictures were output.
    Flushed,
}

/// Error returned by the [`StatelessVideoDecoder::decode`] method.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("error while parsing the bitstream: {0:#}")]
    BitstreamParse(#[from] anyhow::Error),
    #[error("unsupported profile: {0}")]
    UnsupportedProfile(String),
    #[error("unsupported chroma format {0}")]
    UnsupportedChromaFormat(u8),
    #[error("no surface available to decode into, call decode again later")]
    NoSurfaceAvailable,
    #[error("timed out waiting for a surface")]
    SurfaceTimeout,
    #[error("failed to allocate picture resources: {0}")]
    AllocationFailed(StatelessBackendError),
    #[error("unknown picture coding type {0}")]
    UnknownPictureType(u8),
    #[error(transparent)]
    BackendError(#[from] StatelessBackendError),
}

/// Outcome of a successful decode or flush call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// All the input has been consumed.
    Done,
    /// The input ends with an incomplete unit, which is kept until more data is submitted.
    NeedMoreData,
    /// An end of sequence has been processed and all pending frames have been output.
    EndOfStream,
}

/// How long to wait for a free surface in [`BlockingMode::Blocking`] mode, and how many times to
/// retry in [`BlockingMode::NonBlocking`] mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceWait {
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for SurfaceWait {
    fn default() -> Self {
        Self {
            max_retries: 100,
            interval: Duration::from_millis(10),
        }
    }
}

impl SurfaceWait {
    /// Polls `available` up to `max_retries` times, sleeping `interval` between attempts. Returns
    /// whether it eventually reported `true`.
    pub fn wait<F: FnMut() -> bool>(&self, mut available: F) -> bool {
        for attempt in 0..self.max_retries.max(1) {
            if available() {
                return true;
            }

            if attempt + 1 < self.max_retries {
                std::thread::sleep(self.interval);
            }
        }

        false
    }
}

/// Specifies the type of picture that a backend will create for a given codec.
///
/// The picture type is state that is preserved from the start of a given frame to its submission
/// to the backend.
pub trait StatelessDecoderBackendPicture<Codec: StatelessCodec> {
    /// Backend-specific type representing a frame being decoded. Parameter buffers are attached
    /// to it until it is submitted.
    type Picture;
}

/// Common trait shared by all stateless video decoder backends, providing codec-independent
/// methods.
pub trait StatelessDecoderBackend {
    /// The type that the backend returns as a result of a decode operation.
    /// This will usually be some backend-specific type with a resource and a
    /// resource pool so that said buffer can be reused for another decode
    /// operation when it goes out of scope.
    type Handle: DecodedHandle + Clone;
}

/// Stateless video decoder interface.
///
/// A stateless decoder differs from a stateful one in that its input and output queues are not
/// operating independently: a new picture can only be processed if there is already an output
/// surface available to receive its decoded content.
///
/// Input is buffered internally, so chunks can be split at arbitrary byte positions. When no
/// surface is available in non-blocking mode, [`decode`] returns
/// [`DecodeError::NoSurfaceAvailable`] and keeps the pending data: the caller should process
/// pending events, then call [`decode`] again with the next chunk or an empty one.
///
/// [`decode`]: StatelessVideoDecoder::decode
pub trait StatelessVideoDecoder<H: DecodedHandle> {
    /// Appends `bitstream` to the pending input and decodes every complete unit found in it.
    ///
    /// `timestamp` is applied to the first picture starting in `bitstream`. A value of `None`
    /// or `Some(0)` lets the decoder derive timestamps from the stream timing.
    fn decode(
        &mut self,
        timestamp: Option<u64>,
        bitstream: &[u8],
    ) -> Result<DecodeStatus, DecodeError>;

    /// Flush the decoder i.e. finish processing all pending input and make sure the
    /// resulting frames are ready to be retrieved via [`next_event`].
    ///
    /// [`next_event`]: StatelessVideoDecoder::next_event
    fn flush(&mut self) -> Result<DecodeStatus, DecodeError>;

    /// Drops pending input and pictures, e.g. on seek. Stream headers are kept.
    fn reset(&mut self);

    /// Releases all the decoding state. The next `decode` call starts from scratch.
    fn close(&mut self);

    fn stream_info(&self) -> Option<&StreamInfo>;

    fn decoding_state(&self) -> DecodingState;

    /// Returns the next event, if there is any pending.
    fn next_event(&mut self) -> Option<DecoderEvent<H>>;
}

pub trait StatelessCodec {
    /// State that needs to be kept during a decoding operation, typed by backend.
    type DecoderState<B: StatelessDecoderBackend + StatelessDecoderBackendPicture<Self>>;
}

/// A struct that serves as a basis to implement a stateless decoder.
///
/// A stateless decoder is defined by two generic parameters:
///
/// * A codec, represented by a type that implements [`StatelessCodec`]. This type defines the
/// codec-specific decoder state and other codec properties.
/// * A backend, i.e. an interface to talk to the hardware that accelerates decoding.
///
/// This struct just manages the high-level decoder state as well as the queue of decoder events.
/// All the rest is left to codec-specific code.
pub struct StatelessDecoder<C, B>
where
    C: StatelessCodec,
    B: StatelessDecoderBackend + StatelessDecoderBackendPicture<C>,
{
    /// The current coded resolution
    coded_resolution: Resolution,

    /// Whether the decoder should block on decode operations.
    blocking_mode: BlockingMode,

    ready_queue: EventQueue<B::Handle>,

    decoding_state: DecodingState,

    /// The backend used for hardware acceleration.
    backend: B,

    /// Codec-specific state.
    codec: C::DecoderState<B>,
}

impl<C, B> StatelessDecoder<C, B>
where
    C: StatelessCodec,
    B: StatelessDecoderBackend + StatelessDecoderBackendPicture<C>,
    C::DecoderState<B>: Default,
{
    pub fn new(backend: B, blocking_mode: BlockingMode) -> Self {
        Self {
            backend,
            blocking_mode,
            coded_resolution: Default::default(),
            decoding_state: Default::default(),
            ready_queue: Default::default(),
            codec: Default::default(),
        }
    }
}

impl<C, B> StatelessDecoder<C, B>
where
    C: StatelessCodec,
    B: StatelessDecoderBackend + StatelessDecoderBackendPicture<C>,
{
    /// Coded resolution of the last stream parameters applied.
    pub fn coded_resolution(&self) -> Resolution {
        self.coded_resolution
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn surface_wait_polls_until_available() {
        let wait = SurfaceWait {
            max_retries: 5,
            interval: Duration::from_millis(1),
        };
        let polls = Cell::new(0);

        assert!(wait.wait(|| {
            polls.set(polls.get() + 1);
            polls.get() == 3
        }));
        assert_eq!(polls.get(), 3);
    }

    #[test]
    fn surface_wait_gives_up() {
        let wait = SurfaceWait {
            max_retries: 4,
            interval: Duration::from_millis(1),
        };
        let polls = Cell::new(0);

        assert!(!wait.wait(|| {
            polls.set(polls.get() + 1);
            false
        }));
        assert_eq!(polls.get(), 4);

        // At least one poll is always made.
        let wait = SurfaceWait {
            max_retries: 0,
            interval: Duration::from_millis(1),
        };
        assert!(wait.wait(|| true));
    }
}
