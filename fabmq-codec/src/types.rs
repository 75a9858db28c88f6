use std::fmt;
use std::num::NonZeroU16;

use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DecodeError;

pub(crate) const MQTT: &[u8] = b"MQTT";
pub(crate) const MQISDP: &[u8] = b"MQIsdp";
pub const MQTT_LEVEL_31: u8 = 3;
pub const MQTT_LEVEL_311: u8 = 4;
/// Protocol level announced by broker-to-broker links (`-125` as a signed byte).
pub const MQTT_LEVEL_BRIDGE: u8 = 0x83;
pub(crate) const WILL_QOS_SHIFT: u8 = 3;

/// Max possible remaining length
pub(crate) const MAX_PACKET_SIZE: u32 = 0xF_FF_FF_FF;

/// Negotiated protocol variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum Protocol {
    /// `MQIsdp`, level 3
    V31,
    /// `MQTT`, level 4
    #[default]
    V311,
    /// level `0x83`; `legacy` is set when the peer announced the `MQIsdp` name
    Bridge { legacy: bool },
}

impl Protocol {
    pub(crate) fn from_parts(name: &[u8], level: u8) -> Result<Self, DecodeError> {
        let legacy = if name == MQTT {
            false
        } else if name == MQISDP {
            true
        } else {
            return Err(DecodeError::InvalidProtocol);
        };
        match (legacy, level) {
            (true, MQTT_LEVEL_31) => Ok(Protocol::V31),
            (false, MQTT_LEVEL_311) => Ok(Protocol::V311),
            (_, MQTT_LEVEL_BRIDGE) => Ok(Protocol::Bridge { legacy }),
            _ => Err(DecodeError::UnsupportedProtocolLevel),
        }
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Protocol::V31 | Protocol::Bridge { legacy: true } => "MQIsdp",
            Protocol::V311 | Protocol::Bridge { legacy: false } => "MQTT",
        }
    }

    #[inline]
    pub fn level(self) -> u8 {
        match self {
            Protocol::V31 => MQTT_LEVEL_31,
            Protocol::V311 => MQTT_LEVEL_311,
            Protocol::Bridge { .. } => MQTT_LEVEL_BRIDGE,
        }
    }

    /// Publishes from this connection are not routed back to it.
    #[inline]
    pub fn no_echo(self) -> bool {
        matches!(self, Protocol::Bridge { .. })
    }

    /// v3.1 rules apply (client identifier limited to 1..=23 characters).
    #[inline]
    pub fn is_v31(self) -> bool {
        matches!(self, Protocol::V31)
    }

    /// `MQIsdp` bridges skip client identifier checks altogether.
    #[inline]
    pub fn is_legacy_bridge(self) -> bool {
        matches!(self, Protocol::Bridge { legacy: true })
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:#04x}", self.name(), self.level())
    }
}

prim_enum! {
    /// Quality of Service
    #[derive(serde::Serialize, serde::Deserialize, PartialOrd, Ord, Hash)]
    pub enum QoS {
        /// At most once delivery
        ///
        /// No response is sent by the receiver and no retry is performed by the sender.
        AtMostOnce = 0,
        /// At least once delivery
        ///
        /// A QoS 1 PUBLISH Packet has a Packet Identifier in its variable header
        /// and is acknowledged by a PUBACK Packet.
        AtLeastOnce = 1,
        /// Exactly once delivery
        ///
        /// Acknowledged by the PUBREC / PUBREL / PUBCOMP exchange.
        ExactlyOnce = 2
    }
}

impl QoS {
    #[inline]
    pub fn value(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl From<QoS> for u8 {
    fn from(v: QoS) -> Self {
        v.value()
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ConnectFlags: u8 {
        const USERNAME    = 0b1000_0000;
        const PASSWORD    = 0b0100_0000;
        const WILL_RETAIN = 0b0010_0000;
        const WILL_QOS    = 0b0001_1000;
        const WILL        = 0b0000_0100;
        const CLEAN_START = 0b0000_0010;
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ConnectAckFlags: u8 {
        const SESSION_PRESENT = 0b0000_0001;
    }
}

pub(super) mod packet_type {
    pub(crate) const CONNECT: u8 = 0b0001_0000;
    pub(crate) const CONNACK: u8 = 0b0010_0000;
    pub(crate) const PUBLISH_START: u8 = 0b0011_0000;
    pub(crate) const PUBLISH_END: u8 = 0b0011_1111;
    pub(crate) const PUBACK: u8 = 0b0100_0000;
    pub(crate) const PUBREC: u8 = 0b0101_0000;
    pub(crate) const PUBREL: u8 = 0b0110_0010;
    pub(crate) const PUBCOMP: u8 = 0b0111_0000;
    pub(crate) const SUBSCRIBE: u8 = 0b1000_0010;
    pub(crate) const SUBACK: u8 = 0b1001_0000;
    pub(crate) const UNSUBSCRIBE: u8 = 0b1010_0010;
    pub(crate) const UNSUBACK: u8 = 0b1011_0000;
    pub(crate) const PINGREQ: u8 = 0b1100_0000;
    pub(crate) const PINGRESP: u8 = 0b1101_0000;
    pub(crate) const DISCONNECT: u8 = 0b1110_0000;
}

pub type TimestampMillis = i64;

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Publish {
    /// this might be re-delivery of an earlier attempt to send the Packet.
    pub dup: bool,
    pub retain: bool,
    /// the level of assurance for delivery of an Application Message.
    pub qos: QoS,
    /// the information channel to which payload data is published.
    pub topic: ByteString,
    /// only present in PUBLISH Packets where the QoS level is 1 or 2.
    pub packet_id: Option<NonZeroU16>,
    /// the Application Message that is being published, empty when absent.
    pub payload: Bytes,
    /// epoch millis after which the message is discarded, `0` never expires.
    pub expiry: TimestampMillis,
    /// node that first accepted the message, carried on inter-node links.
    pub origin: Option<Uuid>,
}

impl Publish {
    pub fn new<T>(topic: T, payload: Bytes, qos: QoS, retain: bool) -> Self
    where
        ByteString: From<T>,
    {
        Publish {
            dup: false,
            retain,
            qos,
            topic: topic.into(),
            packet_id: None,
            payload,
            expiry: 0,
            origin: None,
        }
    }

    #[inline]
    pub fn is_expired(&self, now: TimestampMillis) -> bool {
        self.expiry != 0 && self.expiry < now
    }
}

impl fmt::Debug for Publish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publish")
            .field("packet_id", &self.packet_id)
            .field("topic", &self.topic)
            .field("dup", &self.dup)
            .field("retain", &self.retain)
            .field("qos", &self.qos)
            .field("payload", &"<REDACTED>")
            .field("expiry", &self.expiry)
            .field("origin", &self.origin)
            .finish()
    }
}
