//! Integration tests for configuration validation and loading

#![allow(clippy::expect_used, clippy::unwrap_used)]

use peer_protocol::config::{LoggingConfig, NetworkConfig, TransportConfig, VerifierConfig};
use peer_protocol::error::ProtocolError;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
    config.validate_strict().unwrap();
}

#[test]
fn test_invalid_listen_address() {
    let mut config = NetworkConfig::default();
    config.transport.listen_address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid listen address")));
}

#[test]
fn test_empty_listen_address() {
    let mut config = NetworkConfig::default();
    config.transport.listen_address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_zero_capacities() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.transport.delivery_capacity = 0;
        c.transport.peer_queue_capacity = 0;
    });

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Delivery capacity")));
    assert!(errors.iter().any(|e| e.contains("Peer queue capacity")));
}

#[test]
fn test_no_peer_slots() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.transport.max_inbound = 0;
        c.transport.max_outbound = 0;
    });
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("max_inbound or max_outbound")));
}

#[test]
fn test_handshake_timeout_bounds() {
    let mut config = NetworkConfig::default();
    config.transport.handshake_timeout = Duration::from_millis(10);
    assert!(config.validate().iter().any(|e| e.contains("too short")));

    config.transport.handshake_timeout = Duration::from_secs(600);
    assert!(config.validate().iter().any(|e| e.contains("too long")));
}

#[test]
fn test_heartbeat_zero_disables() {
    let mut config = NetworkConfig::default();
    config.transport.heartbeat_interval = Duration::ZERO;
    assert!(config.validate().is_empty());

    config.transport.heartbeat_interval = Duration::from_millis(5);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Heartbeat interval too short")));
}

#[test]
fn test_small_handshake_limit() {
    let config = NetworkConfig::default_with_overrides(|c| c.transport.max_handshake_bytes = 100);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max handshake bytes")));
}

#[test]
fn test_verifier_cache_settings() {
    let mut config = NetworkConfig::default();
    config.verifier.max_cache_size = 0;
    config.verifier.cache_ttl = Duration::ZERO;
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cache size")));
    assert!(errors.iter().any(|e| e.contains("cache TTL")));

    // Irrelevant once the cache is off.
    config.verifier.enable_cache = false;
    assert!(config.validate().is_empty());
}

#[test]
fn test_trusted_root_settings() {
    let mut config = NetworkConfig::default();
    config.verifier.require_trusted_root = true;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("no trusted roots")));

    config.verifier.trusted_roots = vec!["not-a-did".into()];
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("not a DID")));

    config.verifier.trusted_roots = vec!["did:key:z6Mkroot".into()];
    assert!(config.validate().is_empty());
}

#[test]
fn test_logging_requires_output() {
    let config = NetworkConfig {
        logging: LoggingConfig {
            log_to_console: false,
            log_to_file: false,
            ..LoggingConfig::default()
        },
        ..NetworkConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_logging_file_path_required() {
    let config = NetworkConfig {
        logging: LoggingConfig {
            log_to_file: true,
            log_file_path: None,
            ..LoggingConfig::default()
        },
        ..NetworkConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_validate_strict_collects_all_errors() {
    let config = NetworkConfig {
        transport: TransportConfig {
            listen_address: String::new(),
            delivery_capacity: 0,
            ..TransportConfig::default()
        },
        ..NetworkConfig::default()
    };

    match config.validate_strict() {
        Err(ProtocolError::ConfigError(msg)) => {
            assert!(msg.contains("cannot be empty"));
            assert!(msg.contains("Delivery capacity"));
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn test_toml_round_trip_preserves_values() {
    let config = NetworkConfig {
        transport: TransportConfig {
            listen_address: "0.0.0.0:9100".into(),
            heartbeat_interval: Duration::from_millis(2500),
            ..TransportConfig::default()
        },
        verifier: VerifierConfig {
            trusted_roots: vec!["did:key:z6Mkroot".into()],
            ..VerifierConfig::default()
        },
        logging: LoggingConfig {
            log_level: Level::DEBUG,
            json_format: true,
            ..LoggingConfig::default()
        },
    };

    let dir = std::env::temp_dir().join(format!("peer-protocol-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.toml");
    config.save_to_file(&path).unwrap();

    let loaded = NetworkConfig::from_file(&path).unwrap();
    assert_eq!(loaded.transport.listen_address, "0.0.0.0:9100");
    assert_eq!(loaded.transport.heartbeat_interval, Duration::from_millis(2500));
    assert_eq!(loaded.verifier.trusted_roots, vec!["did:key:z6Mkroot".to_string()]);
    assert_eq!(loaded.logging.log_level, Level::DEBUG);
    assert!(loaded.logging.json_format);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_durations_serialize_as_millis() {
    let text = NetworkConfig::example_config();
    assert!(text.contains("handshake_timeout = 10000"));
    assert!(text.contains("log_level = \"info\""));
}

#[test]
fn test_bad_toml_is_config_error() {
    assert!(matches!(
        NetworkConfig::from_toml("[transport\nlisten_address ="),
        Err(ProtocolError::ConfigError(_))
    ));
    assert!(matches!(
        NetworkConfig::from_toml(concat!(
            "[logging]\n",
            "app_name = \"x\"\n",
            "log_level = \"loud\"\n",
            "log_to_console = true\n",
            "log_to_file = false\n",
            "json_format = false",
        )),
        Err(ProtocolError::ConfigError(_))
    ));
}

#[test]
fn test_missing_file() {
    assert!(matches!(
        NetworkConfig::from_file("/nonexistent/peer-protocol.toml"),
        Err(ProtocolError::ConfigError(_))
    ));
}

#[test]
fn test_from_env_overrides() {
    // All env manipulation lives in this one test to avoid races between tests.
    std::env::set_var("PEER_PROTOCOL_MAX_INBOUND", "5");
    std::env::set_var("PEER_PROTOCOL_HEARTBEAT_INTERVAL_MS", "0");
    std::env::set_var("PEER_PROTOCOL_TRUSTED_ROOTS", "did:key:a, did:key:b");
    std::env::set_var("PEER_PROTOCOL_LOG_LEVEL", "warn");

    let config = NetworkConfig::from_env().unwrap();
    assert_eq!(config.transport.max_inbound, 5);
    assert!(config.transport.heartbeat_interval.is_zero());
    assert_eq!(config.verifier.trusted_roots, vec!["did:key:a", "did:key:b"]);
    assert_eq!(config.logging.log_level, Level::WARN);

    std::env::set_var("PEER_PROTOCOL_MAX_INBOUND", "many");
    assert!(matches!(NetworkConfig::from_env(), Err(ProtocolError::ConfigError(_))));

    for name in [
        "PEER_PROTOCOL_MAX_INBOUND",
        "PEER_PROTOCOL_HEARTBEAT_INTERVAL_MS",
        "PEER_PROTOCOL_TRUSTED_ROOTS",
        "PEER_PROTOCOL_LOG_LEVEL",
    ] {
        std::env::remove_var(name);
    }
}
