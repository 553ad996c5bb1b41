#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use peer_protocol::core::codec::PacketCodec;
use peer_protocol::{MessageContent, Packet, Rpc};
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Fuzz packet framing and the envelope layers inside it
    if let Ok((packet, used)) = Packet::decode(data) {
        assert!(used <= data.len());
        if packet.check().is_ok() {
            if let Ok(rpc) = Rpc::from_bytes(packet.payload()) {
                let _ = rpc.from_address();
                let _ = MessageContent::from_bytes(rpc.payload());
            }
        }
    }

    let mut codec = PacketCodec;
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
