#![no_main]

use libfuzzer_sys::fuzz_target;
use peer_protocol::protocol::handshake::HandshakeMessage;
use peer_protocol::DidVerifier;

fuzz_target!(|data: &[u8]| {
    // Fuzz handshake message parsing and document verification
    let Ok(message) = HandshakeMessage::from_json(data) else {
        return;
    };

    if let Ok(encoded) = message.to_json() {
        let _ = HandshakeMessage::from_json(&encoded);
    }

    if let HandshakeMessage::Hello(hello) = message {
        let _ = hello.document.ed25519_key();
        let _ = hello.document.x25519_key();
        if let Ok(signature) = bs58::decode(&hello.signature).into_vec() {
            let _ = DidVerifier::default().verify(&hello.document, &signature);
        }
    }
});
