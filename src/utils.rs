// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Utility functions used by several parts of this crate.
//!
//! This module is for anything that doesn't fit into the other top-level modules. Try not to add
//! new code here unless it really doesn't belong anywhere else.

use log::debug;

use crate::decoder::stateless::DecodeError;
use crate::decoder::stateless::DecodeStatus;
use crate::decoder::stateless::StatelessVideoDecoder;
use crate::decoder::DecodedHandle;
use crate::decoder::DecoderEvent;

/// Simple decoding loop that plays the stream once from start to finish.
///
/// Each item of `stream_iter` is handed to the decoder as-is, so it can be split at any byte
/// position. `on_new_frame` is called with every frame in output order.
pub fn simple_playback_loop<D, H, R, I>(
    decoder: &mut D,
    stream_iter: I,
    on_new_frame: &mut dyn FnMut(H),
) -> anyhow::Result<()>
where
    D: StatelessVideoDecoder<H> + ?Sized,
    H: DecodedHandle,
    R: AsRef<[u8]>,
    I: Iterator<Item = R>,
{
    // Closure that drains all pending decoder events and calls `on_new_frame` on each
    // completed frame.
    let mut check_events = |decoder: &mut D| {
        while let Some(event) = decoder.next_event() {
            match event {
                DecoderEvent::FrameReady(frame) => on_new_frame(frame),
                DecoderEvent::FormatChanged(info) => debug!("New stream format: {:?}", info),
            }
        }
    };

    for chunk in stream_iter {
        let mut bitstream = chunk.as_ref();
        loop {
            match decoder.decode(None, bitstream) {
                Ok(status) => {
                    check_events(decoder);
                    if status == DecodeStatus::EndOfStream {
                        debug!("End of stream reached");
                    }
                    break;
                }
                Err(DecodeError::NoSurfaceAvailable) => {
                    // The input has been kept by the decoder, give it a chance to free surfaces.
                    check_events(decoder);
                    bitstream = &[];
                }
                Err(e) => anyhow::bail!(e),
            }
        }
    }

    loop {
        match decoder.flush() {
            Ok(_) => break,
            Err(DecodeError::NoSurfaceAvailable) => check_events(decoder),
            Err(e) => anyhow::bail!(e),
        }
    }
    check_events(decoder);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::Handle;
    use crate::codec::mpeg4::parser::VopCodingType;
    use crate::decoder::stateless::mpeg4::tests::qcif_vol;
    use crate::decoder::stateless::mpeg4::tests::StreamBuilder;
    use crate::decoder::stateless::mpeg4::Mpeg4;
    use crate::decoder::stateless::StatelessDecoder;
    use crate::decoder::BlockingMode;

    #[test]
    fn playback_in_small_chunks() {
        let stream = StreamBuilder::new(qcif_vol())
            .vol()
            .vop(VopCodingType::I, 0)
            .vop(VopCodingType::P, 2)
            .vop(VopCodingType::B, 1)
            .build();

        let mut decoder = StatelessDecoder::<Mpeg4, _>::new_dummy(
            BlockingMode::NonBlocking,
            Default::default(),
        );

        let mut frames = Vec::new();
        simple_playback_loop(&mut decoder, stream.chunks(7), &mut |handle: Handle| {
            frames.push(handle.timestamp())
        })
        .unwrap();

        assert_eq!(frames, vec![0, 33_333_333, 66_666_666]);
    }

    #[test]
    fn playback_errors_are_reported() {
        let stream = StreamBuilder::new(qcif_vol())
            .vop(VopCodingType::I, 0)
            .end()
            .build();

        let mut decoder = StatelessDecoder::<Mpeg4, _>::new_dummy(
            BlockingMode::Blocking,
            Default::default(),
        );

        let result =
            simple_playback_loop(&mut decoder, std::iter::once(stream), &mut |_: Handle| ());
        assert!(result.is_err());
    }
}
