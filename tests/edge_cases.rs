#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for framing, compression and pipeline failure handling.
//! Covers boundary sizes, malformed input and the error each one must produce.

use bytes::{Bytes, BytesMut};
use stagewire::config::{LengthWidth, ServerConfig};
use stagewire::core::{Connection, EndMarkerCodec, TlvCodec};
use stagewire::error::PipelineError;
use stagewire::pipeline::{Pipeline, Stage, StageContext};
use stagewire::utils::compression::{Compression, CompressionKind};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

// ============================================================================
// TLV EDGE CASES
// ============================================================================

#[test]
fn test_tlv_body_exactly_at_ceiling() {
    let codec = TlvCodec::default();
    let body = vec![0xAB; 65535 - codec.header_len()];
    let mut wire = BytesMut::new();
    codec.encode_frame(&body, &mut wire).unwrap();
    assert_eq!(wire.len(), 65535);

    let decoded = TlvCodec::default().decode(&mut wire).unwrap().unwrap();
    assert_eq!(decoded.len(), body.len());
}

#[test]
fn test_tlv_body_one_past_ceiling_fails() {
    let codec = TlvCodec::default();
    let body = vec![0xAB; 65536 - codec.header_len()];
    let mut wire = Vec::new();
    assert!(matches!(
        codec.encode_frame(&body, &mut wire),
        Err(PipelineError::OversizedFrame {
            size: 65536,
            limit: 65535
        })
    ));
    assert!(wire.is_empty(), "nothing is written on error");
}

#[test]
fn test_tlv_two_byte_width_overflow() {
    let codec = TlvCodec::new(Bytes::from_static(b"BF"), LengthWidth::Two)
        .with_max_frame_size(1 << 20);
    let mut wire = Vec::new();
    assert!(matches!(
        codec.encode_frame(&vec![0u8; 65534], &mut wire),
        Err(PipelineError::LengthOverflow {
            length: 65538,
            width: 2
        })
    ));
}

#[test]
fn test_tlv_declared_length_zero() {
    let mut codec = TlvCodec::default();
    let mut wire = BytesMut::from(&b"BF\x00\x00\x00\x00"[..]);
    assert!(matches!(
        codec.decode(&mut wire),
        Err(PipelineError::MalformedFrame {
            declared: 0,
            header: 6
        })
    ));
}

#[test]
fn test_tlv_declared_length_equals_header() {
    let mut codec = TlvCodec::default();
    let mut wire = BytesMut::from(&b"BF\x00\x00\x00\x06"[..]);
    let body = codec.decode(&mut wire).unwrap().unwrap();
    assert!(body.is_empty());
}

#[test]
fn test_tlv_eight_byte_huge_declaration_rejected() {
    let mut codec = TlvCodec::new(Bytes::from_static(b"BF"), LengthWidth::Eight);
    let mut wire = BytesMut::from(&b"BF\xFF\xFF\xFF\xFF\xFF\xFF\xFF\xFF"[..]);
    assert!(matches!(
        codec.decode(&mut wire),
        Err(PipelineError::OversizedFrame { .. })
    ));
}

#[test]
fn test_tlv_foreign_tag_accepted_by_default() {
    let mut codec = TlvCodec::default();
    let mut wire = BytesMut::from(&b"XY\x00\x00\x00\x08ok"[..]);
    assert_eq!(&codec.decode(&mut wire).unwrap().unwrap()[..], b"ok");
}

#[test]
fn test_tlv_foreign_tag_rejected_when_validating() {
    let config = ServerConfig::tlv("BF", 4).unwrap().with_tag_validation(true);
    let mut codec = TlvCodec::from_config(&config).unwrap();
    let mut wire = BytesMut::from(&b"XY\x00\x00\x00\x08ok"[..]);
    match codec.decode(&mut wire) {
        Err(PipelineError::TagMismatch { expected, actual }) => {
            assert_eq!(expected, b"BF");
            assert_eq!(actual, b"XY");
        }
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[test]
fn test_tlv_multi_byte_tag() {
    let mut codec = TlvCodec::new(Bytes::from_static(b"STAGE"), LengthWidth::Two);
    let mut wire = BytesMut::new();
    codec.encode(Bytes::from_static(b"x"), &mut wire).unwrap();
    assert_eq!(&wire[..], b"STAGE\x00\x08x");
    assert_eq!(&codec.decode(&mut wire).unwrap().unwrap()[..], b"x");
}

// ============================================================================
// END MARKER EDGE CASES
// ============================================================================

#[test]
fn test_end_marker_only_frame() {
    let mut codec = EndMarkerCodec::new(Bytes::from_static(b"\r\n"));
    let mut wire = BytesMut::from(&b"\r\n"[..]);
    assert_eq!(&codec.decode(&mut wire).unwrap().unwrap()[..], b"\r\n");
}

#[test]
fn test_end_marker_payload_containing_marker_is_split() {
    let mut codec = EndMarkerCodec::new(Bytes::from_static(b"\n"));
    let mut wire = BytesMut::new();
    codec.encode(Bytes::from_static(b"a\nb"), &mut wire).unwrap();
    assert_eq!(&codec.decode(&mut wire).unwrap().unwrap()[..], b"a\n");
    assert_eq!(&codec.decode(&mut wire).unwrap().unwrap()[..], b"b\n");
}

#[test]
fn test_end_marker_clean_eof_between_frames() {
    let mut codec = EndMarkerCodec::new(Bytes::from_static(b"\n"));
    let mut wire = BytesMut::new();
    assert!(codec.decode_eof(&mut wire).unwrap().is_none());
}

// ============================================================================
// COMPRESSION EDGE CASES
// ============================================================================

#[test]
fn test_compression_empty_data() {
    for kind in [CompressionKind::Deflate, CompressionKind::Lz4, CompressionKind::Zstd] {
        let engine = Compression::new(kind, 3);
        assert!(matches!(engine.compress(&[]), Err(PipelineError::MissingInput)));
        assert!(matches!(engine.decompress(&[]), Err(PipelineError::MissingInput)));
    }
}

#[test]
fn test_compression_single_byte() {
    for kind in [CompressionKind::Deflate, CompressionKind::Lz4, CompressionKind::Zstd] {
        let engine = Compression::new(kind, 3);
        let compressed = engine.compress(&[42]).unwrap();
        assert_eq!(engine.decompress(&compressed).unwrap(), vec![42]);
    }
}

#[test]
fn test_compression_highly_repetitive_data() {
    let data = vec![b'a'; 1024 * 1024];
    let engine = Compression::default();
    let compressed = engine.compress(&data).unwrap();
    assert!(compressed.len() < data.len() / 100);
    assert_eq!(engine.decompress(&compressed).unwrap(), data);
}

#[test]
fn test_decompression_garbage_deflate() {
    let engine = Compression::default();
    let result = engine.decompress(&[0xFF; 32]);
    assert!(matches!(result, Err(PipelineError::DecodeFailure(_))));

    // A failed instance never poisons the next call
    let good = engine.compress(b"still fine").unwrap();
    assert_eq!(engine.decompress(&good).unwrap(), b"still fine");
}

#[test]
fn test_decompression_size_limit() {
    let engine = Compression::default().with_max_output(1024);
    let bomb = Compression::default().compress(&vec![0u8; 64 * 1024]).unwrap();
    assert!(matches!(
        engine.decompress(&bomb),
        Err(PipelineError::DecodeFailure(_))
    ));
}

// ============================================================================
// PIPELINE FAILURE HANDLING
// ============================================================================

#[tokio::test]
async fn test_pipeline_malformed_frame_stops_before_handler() {
    let config = ServerConfig::tlv("BF", 2).unwrap();
    let ctx = StageContext::new(config.clone());
    let pipeline = Pipeline::standard(&config, false, |_, _| {
        panic!("handler must not run for a malformed frame")
    });

    let (mut client, server) = duplex(64);
    let mut conn = Connection::new(server);
    client.write_all(b"BF\x00\x03").await.unwrap();

    let result = pipeline.run(&ctx, &mut conn, Bytes::new()).await;
    assert!(matches!(
        result,
        Err(PipelineError::MalformedFrame {
            declared: 3,
            header: 4
        })
    ));
}

#[tokio::test]
async fn test_pipeline_empty_body_into_decompress_is_missing_input() {
    let config = ServerConfig::tlv("BF", 4).unwrap();
    let ctx = StageContext::new(config.clone());
    let pipeline = Pipeline::standard(&config, true, |_, b| Ok(b.to_vec()));

    let (mut client, server) = duplex(64);
    let mut conn = Connection::new(server);
    client.write_all(b"BF\x00\x00\x00\x06").await.unwrap();

    let result = pipeline.run(&ctx, &mut conn, Bytes::new()).await;
    assert!(matches!(result, Err(PipelineError::MissingInput)));
}

#[tokio::test]
async fn test_pipeline_handler_error_is_returned_verbatim() {
    let config = ServerConfig::end_marker("\n").unwrap();
    let ctx = StageContext::new(config.clone());
    let pipeline = Pipeline::standard(&config, false, |_, _| {
        Err(PipelineError::handler("reject", "no thanks"))
    });

    let (mut client, server) = duplex(64);
    let mut conn = Connection::new(server);
    client.write_all(b"hi\n").await.unwrap();

    match pipeline.run(&ctx, &mut conn, Bytes::new()).await {
        Err(PipelineError::Handler { stage, message }) => {
            assert_eq!(stage, "reject");
            assert_eq!(message, "no thanks");
        }
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_pipeline_clean_eof_is_connection_closed() {
    let config = ServerConfig::tlv("BF", 4).unwrap();
    let ctx = StageContext::new(config.clone());
    let pipeline = Pipeline::standard(&config, false, |_, b| Ok(b.to_vec()));

    let (client, server) = duplex(64);
    let mut conn = Connection::new(server);
    drop(client);

    let err = pipeline.run(&ctx, &mut conn, Bytes::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::ConnectionClosed));
    assert!(err.is_disconnect());
}

#[tokio::test]
async fn test_pipeline_oversized_reply_is_not_written() {
    let config = ServerConfig::tlv("BF", 4)
        .unwrap()
        .with_max_frame_size(32)
        .unwrap();
    let ctx = StageContext::new(config.clone());
    let pipeline = Pipeline::new(vec![
        Stage::DecodeTlv,
        Stage::handler("inflate", |_, b| Ok(b.repeat(16))),
        Stage::EncodeTlv,
    ]);

    let (mut client, server) = duplex(1024);
    let mut conn = Connection::new(server);
    client.write_all(b"BF\x00\x00\x00\x0Bhello").await.unwrap();

    let result = pipeline.run(&ctx, &mut conn, Bytes::new()).await;
    assert!(matches!(result, Err(PipelineError::OversizedFrame { .. })));

    drop(conn);
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_pipeline_end_marker_compressed_echo_for_every_kind() {
    let config = ServerConfig::end_marker("\n").unwrap();
    for kind in [CompressionKind::Deflate, CompressionKind::Lz4, CompressionKind::Zstd] {
        let ctx = StageContext::new(config.clone()).with_compression(Compression::new(kind, 3));
        let pipeline = Pipeline::standard(&config, true, |_, b| {
            assert_eq!(b, b"hello hello hello");
            Ok(b.to_vec())
        });

        let mut wire = ctx.compression().compress(b"hello hello hello").unwrap();
        wire.push(b'\n');

        let (mut client, server) = duplex(1024);
        let mut conn = Connection::new(server);
        client.write_all(&wire).await.unwrap();

        let out = pipeline.run(&ctx, &mut conn, Bytes::new()).await;
        assert!(out.is_ok(), "{kind:?}: {out:?}");

        let mut reply = vec![0u8; wire.len()];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, wire, "{kind:?}");
    }
}

#[test]
fn test_error_display_formatting() {
    let err = PipelineError::MalformedFrame {
        declared: 3,
        header: 6,
    };
    assert_eq!(
        err.to_string(),
        "Malformed frame: declared length 3 is smaller than header length 6"
    );
    assert_eq!(
        PipelineError::MissingInput.to_string(),
        "Stage input is missing or empty"
    );
}
