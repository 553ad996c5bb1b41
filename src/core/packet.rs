//! Packet frame.
//!
//! ```text
//! [Command(1)] [Length(2, BE)] [Payload(Length)] [Checksum(8, BE)]
//! ```
//!
//! The checksum is CRC-64 over `command ‖ length ‖ payload`. Decoding reads
//! the checksum off the wire but does not verify it; call [`Packet::check`]
//! before trusting the payload.

use crate::core::buffer::BoundedBytes;
use crate::error::{FrameError, Result};
use crate::utils::checksum::Crc64Digest;
use bytes::{BufMut, BytesMut};
use std::fmt;

/// Largest payload a packet can carry.
pub const MAX_PACKET_PAYLOAD: usize = 200;
/// Command byte plus big-endian length.
pub const HEADER_SIZE: usize = 3;
/// Big-endian CRC-64.
pub const CHECKSUM_SIZE: usize = 8;
/// Largest complete frame on the wire.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PACKET_PAYLOAD + CHECKSUM_SIZE;

/// Packet command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Keep-alive, consumed by the read pump
    Heartbeat = 0x01,
    /// Peer information exchange
    PeerInfo = 0x02,
    /// Application message
    MessageSend = 0x03,
    /// Raw stream follows on the socket
    Stream = 0x04,
    /// Handshake message chunk
    Handshake = 0x05,
    /// Final handshake message chunk
    HandshakeEnd = 0x06,
    /// Orderly close
    Disconnect = 0x07,
}

impl Command {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = FrameError;

    fn try_from(byte: u8) -> std::result::Result<Self, FrameError> {
        match byte {
            0x01 => Ok(Command::Heartbeat),
            0x02 => Ok(Command::PeerInfo),
            0x03 => Ok(Command::MessageSend),
            0x04 => Ok(Command::Stream),
            0x05 => Ok(Command::Handshake),
            0x06 => Ok(Command::HandshakeEnd),
            0x07 => Ok(Command::Disconnect),
            other => Err(FrameError::UnknownCommand(other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Heartbeat => "heartbeat",
            Command::PeerInfo => "peer-info",
            Command::MessageSend => "message-send",
            Command::Stream => "stream",
            Command::Handshake => "handshake",
            Command::HandshakeEnd => "handshake-end",
            Command::Disconnect => "disconnect",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    command: Command,
    payload: BoundedBytes<MAX_PACKET_PAYLOAD>,
    checksum: u64,
}

impl Packet {
    /// Build a packet around `payload`, computing its checksum.
    pub fn encode(command: Command, payload: &[u8]) -> Result<Packet> {
        let payload = BoundedBytes::from_slice(payload)?;
        let checksum = compute_checksum(command.as_u8(), &payload);
        Ok(Packet {
            command,
            payload,
            checksum,
        })
    }

    /// Decode one frame from the front of `bytes`, returning it with the
    /// number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Packet, usize)> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                needed: HEADER_SIZE,
                available: bytes.len(),
            }
            .into());
        }

        let command = Command::try_from(bytes[0])?;
        let length = read_length(bytes)?;
        let total = frame_len(length);
        if bytes.len() < total {
            return Err(FrameError::Truncated {
                needed: total,
                available: bytes.len(),
            }
            .into());
        }

        let payload = BoundedBytes::from_slice(&bytes[HEADER_SIZE..HEADER_SIZE + length])?;
        let mut checksum = [0u8; CHECKSUM_SIZE];
        checksum.copy_from_slice(&bytes[HEADER_SIZE + length..total]);

        Ok((
            Packet {
                command,
                payload,
                checksum: u64::from_be_bytes(checksum),
            },
            total,
        ))
    }

    /// Recompute the checksum and compare it with the carried one.
    pub fn check(&self) -> Result<()> {
        let computed = compute_checksum(self.command.as_u8(), &self.payload);
        if computed != self.checksum {
            return Err(FrameError::ChecksumMismatch {
                expected: self.checksum,
                computed,
            }
            .into());
        }
        Ok(())
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    /// Size of this packet on the wire.
    pub fn encoded_len(&self) -> usize {
        frame_len(self.payload.len())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.to_vec()
    }

    /// Append the wire form to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.command.as_u8());
        dst.put_u16(self.payload.len() as u16);
        dst.put_slice(&self.payload);
        dst.put_u64(self.checksum);
    }
}

/// Parse and bound the advertised payload length from a frame header.
pub(crate) fn read_length(header: &[u8]) -> Result<usize> {
    let length = u16::from_be_bytes([header[1], header[2]]) as usize;
    if length > MAX_PACKET_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: length,
            max: MAX_PACKET_PAYLOAD,
        }
        .into());
    }
    Ok(length)
}

pub(crate) fn frame_len(payload_len: usize) -> usize {
    HEADER_SIZE + payload_len + CHECKSUM_SIZE
}

fn compute_checksum(command: u8, payload: &[u8]) -> u64 {
    let mut digest = Crc64Digest::new();
    digest
        .update(&[command])
        .update(&(payload.len() as u16).to_be_bytes())
        .update(payload);
    digest.finalize()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::utils::checksum::crc64;

    #[test]
    fn test_round_trip() {
        let packet = Packet::encode(Command::MessageSend, b"hello").unwrap();
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 5 + CHECKSUM_SIZE);

        let (decoded, consumed) = Packet::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, packet);
        decoded.check().unwrap();
    }

    #[test]
    fn test_checksum_covers_header() {
        let packet = Packet::encode(Command::Heartbeat, &[0xAA, 0xBB]).unwrap();
        let expected = crc64(&[0x01, 0x00, 0x02, 0xAA, 0xBB]);
        assert_eq!(packet.checksum(), expected);
        assert_eq!(&packet.to_bytes()[HEADER_SIZE + 2..], &expected.to_be_bytes());
    }

    #[test]
    fn test_max_payload_boundary() {
        assert!(Packet::encode(Command::MessageSend, &[0u8; MAX_PACKET_PAYLOAD]).is_ok());
        let err = Packet::encode(Command::MessageSend, &[0u8; MAX_PACKET_PAYLOAD + 1]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Frame(FrameError::PayloadTooLarge { size: 201, max: 200 })
        ));
    }

    #[test]
    fn test_empty_payload() {
        let packet = Packet::encode(Command::Disconnect, &[]).unwrap();
        let (decoded, consumed) = Packet::decode(&packet.to_bytes()).unwrap();
        assert_eq!(consumed, HEADER_SIZE + CHECKSUM_SIZE);
        assert!(decoded.payload().is_empty());
        decoded.check().unwrap();
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let mut bytes = vec![Command::MessageSend.as_u8()];
        bytes.extend_from_slice(&201u16.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 209]);
        assert!(matches!(
            Packet::decode(&bytes),
            Err(ProtocolError::Frame(FrameError::PayloadTooLarge { .. }))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_command() {
        let bytes = [0x00, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            Packet::decode(&bytes),
            Err(ProtocolError::Frame(FrameError::UnknownCommand(0x00)))
        ));
    }

    #[test]
    fn test_decode_truncated() {
        let bytes = Packet::encode(Command::MessageSend, b"abc").unwrap().to_bytes();
        for cut in 0..bytes.len() {
            assert!(matches!(
                Packet::decode(&bytes[..cut]),
                Err(ProtocolError::Frame(FrameError::Truncated { .. }))
            ));
        }
    }

    #[test]
    fn test_decode_reports_consumed_with_trailing_data() {
        let mut bytes = Packet::encode(Command::MessageSend, b"one").unwrap().to_bytes();
        let first_len = bytes.len();
        bytes.extend_from_slice(&Packet::encode(Command::MessageSend, b"two").unwrap().to_bytes());

        let (first, consumed) = Packet::decode(&bytes).unwrap();
        assert_eq!(first.payload(), b"one");
        assert_eq!(consumed, first_len);
        let (second, _) = Packet::decode(&bytes[consumed..]).unwrap();
        assert_eq!(second.payload(), b"two");
    }

    #[test]
    fn test_tampered_payload_fails_check() {
        let mut bytes = Packet::encode(Command::MessageSend, b"payload").unwrap().to_bytes();
        bytes[HEADER_SIZE] ^= 0x01;
        let (decoded, _) = Packet::decode(&bytes).unwrap();
        assert!(matches!(
            decoded.check(),
            Err(ProtocolError::Frame(FrameError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn test_tampered_command_fails_check() {
        let mut bytes = Packet::encode(Command::MessageSend, b"payload").unwrap().to_bytes();
        bytes[0] = Command::PeerInfo.as_u8();
        let (decoded, _) = Packet::decode(&bytes).unwrap();
        assert!(decoded.check().is_err());
    }

    #[test]
    fn test_command_byte_mapping() {
        for byte in 0x01..=0x07u8 {
            assert_eq!(Command::try_from(byte).unwrap().as_u8(), byte);
        }
        assert_eq!(
            Command::try_from(0x08).unwrap_err(),
            FrameError::UnknownCommand(0x08)
        );
    }
}
