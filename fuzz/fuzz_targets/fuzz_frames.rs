#![no_main]

use bytes::{Bytes, BytesMut};
use libfuzzer_sys::fuzz_target;
use stagewire::config::LengthWidth;
use stagewire::core::{EndMarkerCodec, TlvCodec};
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Decoding untrusted bytes must never panic or yield a frame past the ceiling
    for width in [LengthWidth::Two, LengthWidth::Four, LengthWidth::Eight] {
        let mut codec = TlvCodec::new(Bytes::from_static(b"BF"), width).with_max_frame_size(4096);
        let mut buf = BytesMut::from(data);
        while let Ok(Some(frame)) = codec.decode(&mut buf) {
            assert!(frame.len() <= 4096);
        }
        let _ = codec.decode_eof(&mut buf);
    }

    let mut codec = EndMarkerCodec::new(Bytes::from_static(b"\r\n")).with_max_frame_size(4096);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        assert!(frame.ends_with(b"\r\n"));
        assert!(frame.len() <= 4096);
    }
    let _ = codec.decode_eof(&mut buf);
});
