//! MQTT v3.1 / v3.1.1 protocol codec

mod bridge;
#[allow(clippy::module_inception)]
mod codec;
mod decode;
mod encode;
mod packet;

pub use self::bridge::{decode_bridged, encode_bridged, BRIDGE_SUFFIX_LEN};
pub use self::codec::Codec;
pub use self::packet::{Connect, ConnectAck, ConnectAckReason, LastWill, Packet, SubscribeReturnCode};
pub use crate::types::{ConnectAckFlags, ConnectFlags, Protocol, Publish, QoS};
