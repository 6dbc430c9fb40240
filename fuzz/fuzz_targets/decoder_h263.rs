#![no_main]

use mp4v_codecs::backend::dummy::Handle;
use mp4v_codecs::decoder::stateless::mpeg4::Mpeg4;
use mp4v_codecs::decoder::stateless::mpeg4::Mpeg4Config;
use mp4v_codecs::decoder::stateless::StatelessDecoder;
use mp4v_codecs::decoder::BlockingMode;
use mp4v_codecs::utils::simple_playback_loop;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let config = Mpeg4Config {
        short_video_header: true,
        ..Default::default()
    };
    let mut decoder = StatelessDecoder::<Mpeg4, _>::new_dummy(BlockingMode::NonBlocking, config);

    let _ = simple_playback_loop(&mut decoder, data.chunks(61), &mut |_: Handle| ());
});
