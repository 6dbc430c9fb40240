// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! m4vdump, runs an MPEG-4 Part 2 or H.263 elementary stream through the decoder using the dummy
//! backend, and prints the pictures it would have submitted to the hardware.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use argh::FromArgs;
use mp4v_codecs::backend::dummy::Backend;
use mp4v_codecs::decoder::stateless::mpeg4::Mpeg4;
use mp4v_codecs::decoder::stateless::mpeg4::Mpeg4Config;
use mp4v_codecs::decoder::stateless::StatelessDecoder;
use mp4v_codecs::decoder::stateless::StatelessVideoDecoder;
use mp4v_codecs::decoder::BlockingMode;
use mp4v_codecs::decoder::DecodedHandle;
use mp4v_codecs::utils::simple_playback_loop;

/// Dumps the decoding parameters of an MPEG-4 visual elementary stream
#[derive(Debug, FromArgs)]
struct Args {
    /// input file
    #[argh(positional)]
    input: PathBuf,

    /// size of the chunks the input is split into. Default: 4096
    #[argh(option, default = "4096")]
    chunk_size: usize,

    /// whether the input is an H.263 (short video header) stream
    #[argh(switch)]
    short_header: bool,

    /// file containing the headers received out of band, if any
    #[argh(option)]
    codec_data: Option<PathBuf>,

    /// whether to decode frames synchronously
    #[argh(switch)]
    synchronous: bool,
}

fn read_file(path: &PathBuf) -> Vec<u8> {
    let mut buffer = Vec::new();
    File::open(path)
        .expect("error opening input file")
        .read_to_end(&mut buffer)
        .expect("error reading input file");
    buffer
}

fn main() {
    env_logger::init();

    let args: Args = argh::from_env();

    let input = read_file(&args.input);
    let config = Mpeg4Config {
        short_video_header: args.short_header,
        codec_data: args.codec_data.as_ref().map(read_file),
        ..Default::default()
    };

    let blocking_mode = if args.synchronous {
        BlockingMode::Blocking
    } else {
        BlockingMode::NonBlocking
    };

    let backend = Backend::new();
    let log = backend.log();
    let mut decoder = StatelessDecoder::<Mpeg4, _>::with_config(backend, blocking_mode, config);

    let mut frame_num = 0;
    let mut on_new_frame = |handle: mp4v_codecs::backend::dummy::Handle| {
        println!(
            "frame {}: pts {} ({}x{})",
            frame_num,
            handle.timestamp(),
            handle.coded_resolution().width,
            handle.coded_resolution().height
        );
        frame_num += 1;
    };

    simple_playback_loop(
        &mut decoder,
        input.chunks(args.chunk_size.max(1)),
        &mut on_new_frame,
    )
    .expect("error during playback loop");

    if let Some(info) = decoder.stream_info() {
        println!("stream: {:?}", info);
    }

    for (i, submission) in log.borrow().submissions.iter().enumerate() {
        let coding_type = submission
            .picture
            .as_ref()
            .map_or(0, |params| params.vop_fields.coding_type);
        println!(
            "picture {}: pts {}, coding type {}, refs {:?}/{:?}, {} slice(s)",
            i,
            submission.timestamp,
            coding_type,
            submission.forward_reference,
            submission.backward_reference,
            submission.slices.len()
        );
        for slice in &submission.slices {
            println!(
                "    macroblock {} at bit {}, quant {}, {} bytes, crc {:08x}",
                slice.params.macroblock_number,
                slice.params.macroblock_offset,
                slice.params.quant_scale,
                slice.data_len,
                slice.crc
            );
        }
    }
}
