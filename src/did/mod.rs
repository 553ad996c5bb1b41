//! # Decentralized Identity
//!
//! Self-sovereign peer identities and their verification.
//!
//! ## Components
//! - **Identity**: Ed25519 signing key plus X25519 agreement key, with derived
//!   identifier and address
//! - **Document**: W3C-style DID document exchanged during the handshake
//! - **Verifier**: Policy checks and signature verification with a TTL verdict cache
//! - **Cache**: The verdict cache itself

pub mod cache;
pub mod document;
pub mod identity;
pub mod verifier;

pub use document::DidDocument;
pub use identity::{Did, ServiceEndpoint};
pub use verifier::{DidVerifier, VerifierStats};
