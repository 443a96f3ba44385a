#![no_main]

use libfuzzer_sys::fuzz_target;
use stagewire::utils::compression::{Compression, CompressionKind};

fuzz_target!(|data: &[u8]| {
    for kind in [CompressionKind::Deflate, CompressionKind::Lz4, CompressionKind::Zstd] {
        let engine = Compression::new(kind, 3).with_max_output(1024 * 1024);

        // Round trip must be lossless
        if let Ok(compressed) = engine.compress(data) {
            let restored = engine.decompress(&compressed);
            assert_eq!(restored.ok().as_deref(), Some(data));
        }

        // Arbitrary input must fail cleanly and respect the size limit
        if let Ok(out) = engine.decompress(data) {
            assert!(out.len() <= 1024 * 1024);
        }
    }
});
