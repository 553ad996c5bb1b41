//! Integration tests for codec buffer behaviour
//!
//! These tests validate how the packet codec uses its `BytesMut` buffers:
//! frames are split off without copying the remainder, partial frames wait
//! without consuming, and encoders append in place.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{Bytes, BytesMut};
use peer_protocol::core::codec::PacketCodec;
use peer_protocol::core::packet::{Command, Packet, MAX_FRAME_SIZE, MAX_PACKET_PAYLOAD};
use peer_protocol::error::{FrameError, ProtocolError};
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn test_codec_decode_split() {
    let mut codec = PacketCodec;
    let packet = Packet::encode(Command::MessageSend, &[1, 2, 3, 4, 5]).unwrap();

    let mut buffer = BytesMut::from(&packet.to_bytes()[..]);
    let original_capacity = buffer.capacity();

    let decoded = codec.decode(&mut buffer).expect("Failed to decode");
    assert_eq!(decoded.unwrap().payload(), &[1, 2, 3, 4, 5]);

    // Buffer should now be empty after split
    assert_eq!(buffer.len(), 0);
    assert!(buffer.capacity() <= original_capacity);
}

#[test]
fn test_codec_partial_decode_preserves_buffer() {
    let mut codec = PacketCodec;
    let bytes = Packet::encode(Command::PeerInfo, b"partial").unwrap().to_bytes();

    let mut buffer = BytesMut::from(&bytes[..5]);
    assert!(codec.decode(&mut buffer).unwrap().is_none());
    assert_eq!(&buffer[..], &bytes[..5]);
    // The codec reserves room for the rest of the frame.
    assert!(buffer.capacity() >= bytes.len());
}

#[test]
fn test_codec_encode_appends_in_place() {
    let mut codec = PacketCodec;
    let mut buffer = BytesMut::with_capacity(MAX_FRAME_SIZE * 2);
    let ptr = buffer.as_ptr();

    codec
        .encode(Packet::encode(Command::PeerInfo, &[0u8; MAX_PACKET_PAYLOAD]).unwrap(), &mut buffer)
        .unwrap();
    codec
        .encode(Packet::encode(Command::PeerInfo, &[1u8; MAX_PACKET_PAYLOAD]).unwrap(), &mut buffer)
        .unwrap();

    assert_eq!(buffer.len(), MAX_FRAME_SIZE * 2);
    assert_eq!(buffer.as_ptr(), ptr, "encoding within capacity must not reallocate");
}

#[test]
fn test_codec_multiple_packets_in_buffer() {
    let mut codec = PacketCodec;
    let mut buffer = BytesMut::new();
    for i in 0..5u8 {
        codec
            .encode(Packet::encode(Command::MessageSend, &[i; 10]).unwrap(), &mut buffer)
            .unwrap();
    }

    for i in 0..5u8 {
        let packet = codec.decode(&mut buffer).unwrap().expect("complete frame");
        assert_eq!(packet.payload(), &[i; 10]);
        packet.check().unwrap();
    }
    assert!(codec.decode(&mut buffer).unwrap().is_none());
}

#[test]
fn test_codec_incremental_buffer_fill() {
    let mut codec = PacketCodec;
    let bytes = Packet::encode(Command::MessageSend, b"byte by byte").unwrap().to_bytes();
    let mut buffer = BytesMut::new();

    for (i, byte) in bytes.iter().enumerate() {
        buffer.extend_from_slice(&[*byte]);
        let decoded = codec.decode(&mut buffer).unwrap();
        if i + 1 < bytes.len() {
            assert!(decoded.is_none(), "frame must not complete at byte {i}");
        } else {
            assert_eq!(decoded.unwrap().payload(), b"byte by byte");
        }
    }
}

#[test]
fn test_codec_rejects_bad_header_before_body() {
    let mut codec = PacketCodec;
    let mut buffer = BytesMut::from(&[0x03, 0xFF, 0xFF][..]);
    assert!(matches!(
        codec.decode(&mut buffer),
        Err(ProtocolError::Frame(FrameError::PayloadTooLarge { .. }))
    ));

    let mut buffer = BytesMut::from(&[0x42, 0x00, 0x01][..]);
    assert!(matches!(
        codec.decode(&mut buffer),
        Err(ProtocolError::Frame(FrameError::UnknownCommand(0x42)))
    ));
}

#[test]
fn test_codec_does_not_verify_checksum() {
    let mut codec = PacketCodec;
    let mut bytes = Packet::encode(Command::MessageSend, b"abc").unwrap().to_bytes();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let mut buffer = BytesMut::from(&bytes[..]);
    let packet = codec.decode(&mut buffer).unwrap().unwrap();
    assert!(matches!(
        packet.check(),
        Err(ProtocolError::Frame(FrameError::ChecksumMismatch { .. }))
    ));
}

#[test]
fn test_codec_buffer_reuse() {
    let mut codec = PacketCodec;
    let mut buffer = BytesMut::with_capacity(1024);

    for round in 0..100u8 {
        codec
            .encode(Packet::encode(Command::PeerInfo, &[round; 32]).unwrap(), &mut buffer)
            .unwrap();
        let packet = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(packet.payload(), &[round; 32]);
        assert!(buffer.is_empty());
    }
}

#[test]
fn test_bytes_freeze_is_zero_copy() {
    let bytes = Packet::encode(Command::PeerInfo, b"freeze").unwrap().to_bytes();
    let mut buffer = BytesMut::from(&bytes[..]);
    let ptr = buffer.as_ptr();

    let frozen: Bytes = buffer.split().freeze();
    assert_eq!(frozen.as_ptr(), ptr);

    let (packet, _) = Packet::decode(&frozen).unwrap();
    assert_eq!(packet.payload(), b"freeze");
}
