#![allow(clippy::unwrap_used)]

use bytes::BytesMut;
use peer_protocol::core::{
    codec::PacketCodec,
    packet::{Command, Packet, MAX_PACKET_PAYLOAD},
};
use peer_protocol::did::Did;
use peer_protocol::protocol::{MessageContent, Rpc};
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn stress_packet_encode_decode_large_series() {
    // Heavy burst of packets through one buffer, every frame checked
    let mut codec = PacketCodec;
    let mut buf = BytesMut::new();

    for size in [0usize, 1, 64, 128, MAX_PACKET_PAYLOAD] {
        for i in 0..10_000usize {
            let payload = vec![(i & 0xFF) as u8; size];
            codec
                .encode(Packet::encode(Command::MessageSend, &payload).unwrap(), &mut buf)
                .unwrap();
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            assert!(decoded.check().is_ok());
            assert!(buf.is_empty());
        }
    }
}

#[test]
fn stress_rpc_sign_verify_series() {
    let did = Did::from_seeds([21u8; 32], [22u8; 32], vec![]);
    let key = did.verifying_key();

    for i in 0..2_000u32 {
        let content = MessageContent::public(&i.to_be_bytes()).unwrap();
        let rpc = Rpc::new(&content, &did).unwrap();
        let packet = Packet::encode(Command::MessageSend, &rpc.to_bytes()).unwrap();

        let (decoded, _) = Packet::decode(&packet.to_bytes()).unwrap();
        decoded.check().unwrap();
        let parsed = Rpc::from_bytes(decoded.payload()).unwrap();
        parsed.verify(&key).unwrap();

        let message = MessageContent::from_bytes(parsed.payload()).unwrap();
        assert_eq!(message.open(None).unwrap(), i.to_be_bytes());
    }
}
