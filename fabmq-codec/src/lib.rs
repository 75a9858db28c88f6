#![deny(unsafe_code)]

//! MQTT v3.1 / v3.1.1 packet codec.
//!
//! ## Core Features:
//! - **Partial frames**: the decoder reports "need more data" by returning `Ok(None)` and leaves
//!   the input untouched, so a `Framed` read buffer can hold several frames or a fragment of one
//! - **Bridge level**: CONNECT level `0x83` is accepted under either protocol name and marks the
//!   connection as a broker-to-broker link that must not receive its own publishes back
//! - **Bridge suffix**: an optional trailer on PUBLISH frames carrying an expiry timestamp and the
//!   origin node, used for inter-node traffic
//! - **Tokio Integration**: `tokio_util::codec::{Decoder, Encoder}` implementations
//!

#[macro_use]
mod utils;

/// Error types for encoding/decoding operations
pub mod error;

/// Shared types and constants for MQTT protocol
pub mod types;

/// MQTT v3.1 / v3.1.1 protocol implementation
pub mod v3;

pub use self::types::{Protocol, Publish, QoS, TimestampMillis};
pub use self::v3::{decode_bridged, encode_bridged, Codec, Packet};
