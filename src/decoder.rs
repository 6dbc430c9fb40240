// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod stateless;

use std::collections::VecDeque;

use crate::decoder::stateless::StatelessBackendResult;
use crate::FrameRate;
use crate::PixelAspectRatio;
use crate::Resolution;

/// Stream parameters, as signalled by the sequence-level headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamInfo {
    /// Coded resolution of the stream.
    pub coded_resolution: Resolution,
    /// Frame rate, when the stream declares a fixed one.
    pub frame_rate: Option<FrameRate>,
    pub pixel_aspect_ratio: PixelAspectRatio,
}

/// Events that can be retrieved using the `next_event` method of a decoder.
#[derive(Debug)]
pub enum DecoderEvent<H> {
    /// The next frame, in presentation order, has been decoded.
    FrameReady(H),
    /// The stream parameters have changed. Frames emitted after this event use the new
    /// parameters.
    FormatChanged(StreamInfo),
}

/// Instructs the decoder on whether it should block on the decode operations.
/// Nonblocking mode is conditional on backend support.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockingMode {
    #[default]
    Blocking,
    NonBlocking,
}

/// The handle type used by the stateless decoder backend. The only requirement
/// from implementors is that they give access to the underlying handle and
/// that they can be (cheaply) cloned.
pub trait DecodedHandle {
    /// Returns the presentation timestamp of the picture.
    fn timestamp(&self) -> u64;

    /// Returns the coded resolution at the time this handle was decoded.
    fn coded_resolution(&self) -> Resolution;

    /// Wait until this handle has been completely rendered.
    fn sync(&self) -> StatelessBackendResult<()>;
}

/// A queue where decoder events wait until the client retrieves them.
pub(crate) struct EventQueue<H> {
    queue: VecDeque<DecoderEvent<H>>,
}

impl<H> Default for EventQueue<H> {
    fn default() -> Self {
        Self {
            queue: Default::default(),
        }
    }
}

impl<H> EventQueue<H> {
    /// Push a decoded frame to the back of the queue.
    pub(crate) fn push_frame(&mut self, handle: H) {
        self.queue.push_back(DecoderEvent::FrameReady(handle))
    }

    pub(crate) fn push_format_changed(&mut self, info: StreamInfo) {
        self.queue.push_back(DecoderEvent::FormatChanged(info))
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear()
    }
}

impl<H> Extend<H> for EventQueue<H> {
    fn extend<I: IntoIterator<Item = H>>(&mut self, iter: I) {
        self.queue
            .extend(iter.into_iter().map(DecoderEvent::FrameReady))
    }
}

/// Allows us to manipulate the event list like an iterator without consuming it.
impl<'a, H> Iterator for &'a mut EventQueue<H> {
    type Item = DecoderEvent<H>;

    /// Returns the next event (if any) waiting to be dequeued.
    fn next(&mut self) -> Option<DecoderEvent<H>> {
        self.queue.pop_front()
    }
}
