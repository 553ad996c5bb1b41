//! # Core Protocol Components
//!
//! Low-level packet handling, codecs, and fixed-size wire buffers.
//!
//! ## Components
//! - **Packet**: Command-tagged frame with a CRC-64 trailer
//! - **Codec**: Tokio codec for framing packets over byte streams
//! - **Buffer**: Fixed-capacity byte buffers used by the wire types
//!
//! ## Wire Format
//! ```text
//! [Command(1)] [Length(2, BE)] [Payload(Length <= 200)] [Checksum(8, BE)]
//! ```
//!
//! ## Security
//! - Advertised length is validated before any body bytes are buffered
//! - Decoding never trusts the checksum implicitly; callers run `Packet::check`

pub mod buffer;
pub mod codec;
pub mod packet;
