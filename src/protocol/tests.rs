// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::config::VerifierConfig;
use crate::core::packet::{Command, Packet};
use crate::did::identity::Did;
use crate::did::verifier::DidVerifier;
use crate::error::{ProtocolError, VerifyError};
use crate::protocol::handshake::*;
use crate::transport::connection::Connection;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

async fn connection_pair() -> (Connection, Connection) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let client = Connection::new(client.unwrap(), true).unwrap();
    let server = Connection::new(accepted.unwrap().0, false).unwrap();
    (client, server)
}

fn did(seed: u8) -> Arc<Did> {
    Arc::new(Did::from_seeds([seed; 32], [seed.wrapping_add(100); 32], vec![]))
}

fn did_handshake(identity: Arc<Did>) -> DidHandshake {
    DidHandshake::new(identity, Arc::new(DidVerifier::default()))
}

#[tokio::test]
async fn test_mutual_did_handshake() {
    let (mut client_conn, mut server_conn) = connection_pair().await;
    let alice = did(1);
    let bob = did(2);
    let client = did_handshake(alice.clone());
    let server = did_handshake(bob.clone());

    let (client_result, server_result) = tokio::join!(
        client.handshake(&mut client_conn),
        server.handshake(&mut server_conn)
    );
    let seen_by_alice = client_result.expect("initiator").expect("identity");
    let seen_by_bob = server_result.expect("responder").expect("identity");

    assert_eq!(seen_by_alice.did(), bob.identifier());
    assert_eq!(seen_by_alice.address(), bob.address());
    assert_eq!(seen_by_bob.did(), alice.identifier());
    assert_eq!(seen_by_alice.session_key(), seen_by_bob.session_key());

    for verifier in [client.verifier(), server.verifier()] {
        let stats = verifier.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failure, 0);
    }
}

#[tokio::test]
async fn test_session_keys_differ_per_handshake() {
    let alice = did(1);
    let bob = did(2);
    let client = did_handshake(alice);
    let server = did_handshake(bob);

    let mut keys = Vec::new();
    for _ in 0..2 {
        let (mut client_conn, mut server_conn) = connection_pair().await;
        let (client_result, server_result) = tokio::join!(
            client.handshake(&mut client_conn),
            server.handshake(&mut server_conn)
        );
        server_result.unwrap();
        keys.push(*client_result.unwrap().unwrap().session_key());
    }
    assert_ne!(keys[0], keys[1]);
}

#[tokio::test]
async fn test_noop_handshake_is_anonymous() {
    let (mut client_conn, mut server_conn) = connection_pair().await;
    let (client_result, server_result) = tokio::join!(
        NoopHandshake.handshake(&mut client_conn),
        NoopHandshake.handshake(&mut server_conn)
    );
    assert!(client_result.unwrap().is_none());
    assert!(server_result.unwrap().is_none());
}

#[tokio::test]
async fn test_untrusted_peer_rejected() {
    let (mut client_conn, mut server_conn) = connection_pair().await;
    let client = did_handshake(did(1));

    let config = VerifierConfig {
        require_trusted_root: true,
        trusted_roots: vec!["did:key:zUnrelatedRoot".into()],
        ..VerifierConfig::default()
    };
    let server = DidHandshake::new(did(2), Arc::new(DidVerifier::new(config)));

    let server_side = async {
        let result = server.handshake(&mut server_conn).await;
        drop(server_conn);
        result
    };
    let (client_result, server_result) =
        tokio::join!(client.handshake(&mut client_conn), server_side);

    assert!(matches!(
        server_result,
        Err(ProtocolError::Verify(VerifyError::DocNotController(_)))
    ));
    assert!(client_result.is_err());
    assert_eq!(server.verifier().stats().failure, 1);
}

#[tokio::test]
async fn test_delegated_peer_accepted() {
    let (mut client_conn, mut server_conn) = connection_pair().await;
    let root = did(9);
    let delegated = Arc::new(
        Did::from_seeds([1u8; 32], [101u8; 32], vec![]).with_controller(root.identifier()),
    );
    let client = did_handshake(delegated);

    let config = VerifierConfig {
        require_trusted_root: true,
        trusted_roots: vec![root.identifier().to_string()],
        ..VerifierConfig::default()
    };
    let server = DidHandshake::new(did(2), Arc::new(DidVerifier::new(config)));

    let (client_result, server_result) = tokio::join!(
        client.handshake(&mut client_conn),
        server.handshake(&mut server_conn)
    );
    client_result.unwrap();
    assert!(server_result.unwrap().is_some());
}

#[tokio::test]
async fn test_self_connection_rejected() {
    let (mut client_conn, mut server_conn) = connection_pair().await;
    let same = did(5);
    let client = did_handshake(same.clone());
    let server = did_handshake(same);

    let server_side = async {
        let result = server.handshake(&mut server_conn).await;
        drop(server_conn);
        result
    };
    let (client_result, server_result) =
        tokio::join!(client.handshake(&mut client_conn), server_side);

    assert!(matches!(server_result, Err(ProtocolError::HandshakeError(_))));
    assert!(client_result.is_err());
}

#[tokio::test]
async fn test_oversized_message_rejected() {
    let (mut client_conn, _server_conn) = connection_pair().await;
    let client = did_handshake(did(1)).with_max_message_bytes(64);
    assert!(matches!(
        client.handshake(&mut client_conn).await,
        Err(ProtocolError::HandshakeError(_))
    ));
}

#[tokio::test]
async fn test_non_handshake_packet_rejected() {
    let (mut client_conn, mut server_conn) = connection_pair().await;
    client_conn
        .send_packet(Packet::encode(Command::MessageSend, b"too early").unwrap())
        .await
        .unwrap();

    let server = did_handshake(did(2));
    assert!(matches!(
        server.handshake(&mut server_conn).await,
        Err(ProtocolError::UnexpectedMessage(_))
    ));
}

#[tokio::test]
async fn test_chunked_message_round_trip() {
    let (mut client_conn, mut server_conn) = connection_pair().await;
    let message = HandshakeMessage::Confirm {
        response: "x".repeat(700),
    };

    write_message(&mut client_conn, &message, DEFAULT_MAX_HANDSHAKE_BYTES)
        .await
        .unwrap();
    let received = read_message(&mut server_conn, DEFAULT_MAX_HANDSHAKE_BYTES)
        .await
        .unwrap();
    assert_eq!(received, message);
}

#[tokio::test]
async fn test_peer_closing_mid_handshake() {
    let (mut client_conn, server_conn) = connection_pair().await;
    drop(server_conn);
    let client = did_handshake(did(1));
    assert!(client.handshake(&mut client_conn).await.is_err());
}
