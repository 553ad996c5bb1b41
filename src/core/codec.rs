//! Tokio codec for packet framing.
//!
//! The decoder validates the command byte and the advertised length from the
//! 3-byte header before waiting on the body, so a peer cannot make us buffer
//! more than one maximum-size frame. Checksums are not verified here.

use crate::core::packet::{frame_len, read_length, Command, Packet, HEADER_SIZE};
use crate::error::ProtocolError;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Clone, Copy, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        Command::try_from(src[0])?;
        let total = frame_len(read_length(&src[..HEADER_SIZE])?);
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total);
        let (packet, _) = Packet::decode(&frame)?;
        Ok(Some(packet))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst);
        Ok(())
    }
}
