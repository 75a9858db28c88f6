//! Control packets of MQTT 3.1 and 3.1.1. Bridge links reuse the same set;
//! only their PUBLISH framing differs (see `bridge`).

use std::num::NonZeroU16;

use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use crate::types::{packet_type, Protocol, Publish, QoS};

prim_enum! {
    /// CONNACK return code
    #[derive(Deserialize, Serialize)]
    pub enum ConnectAckReason {
        ConnectionAccepted = 0,
        UnacceptableProtocolVersion = 1,
        /// Also sent for protocol name/level mismatches
        IdentifierRejected = 2,
        ServiceUnavailable = 3,
        /// The Authorizer refused the credentials
        BadUserNameOrPassword = 4,
        NotAuthorized = 5
    }
}

impl From<ConnectAckReason> for u8 {
    fn from(v: ConnectAckReason) -> Self {
        v as u8
    }
}

impl ConnectAckReason {
    pub fn reason(self) -> &'static str {
        match self {
            ConnectAckReason::ConnectionAccepted => "accepted",
            ConnectAckReason::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectAckReason::IdentifierRejected => "identifier rejected",
            ConnectAckReason::ServiceUnavailable => "service unavailable",
            ConnectAckReason::BadUserNameOrPassword => "bad username or password",
            ConnectAckReason::NotAuthorized => "not authorized",
        }
    }
}

/// Will registered by CONNECT, published when the connection drops without DISCONNECT.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct LastWill {
    pub qos: QoS,
    pub retain: bool,
    pub topic: ByteString,
    pub message: Bytes,
}

impl LastWill {
    pub fn to_publish(&self) -> Publish {
        Publish::new(self.topic.clone(), self.message.clone(), self.qos, self.retain)
    }
}

#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Connect {
    /// negotiated from the protocol name and level
    pub protocol: Protocol,
    pub clean_session: bool,
    /// seconds, 0 disables the idle timer
    pub keep_alive: u16,
    pub last_will: Option<LastWill>,
    /// may be empty on v3.1.1 with a clean session
    pub client_id: ByteString,
    pub username: Option<ByteString>,
    pub password: Option<Bytes>,
}

impl Connect {
    pub fn client_id<T>(mut self, client_id: T) -> Self
    where
        ByteString: From<T>,
    {
        self.client_id = client_id.into();
        self
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Deserialize, Serialize)]
pub struct ConnectAck {
    pub return_code: ConnectAckReason,
    pub session_present: bool,
}

/// Per filter SUBACK entry. The broker always grants the requested QoS.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Deserialize, Serialize)]
pub enum SubscribeReturnCode {
    Success(QoS),
    Failure,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Packet {
    Connect(Box<Connect>),
    ConnectAck(ConnectAck),
    Publish(Publish),
    /// QoS 1 acknowledgment
    PublishAck { packet_id: NonZeroU16 },
    /// QoS 2, step 1
    PublishReceived { packet_id: NonZeroU16 },
    /// QoS 2, step 2
    PublishRelease { packet_id: NonZeroU16 },
    /// QoS 2, step 3
    PublishComplete { packet_id: NonZeroU16 },
    Subscribe { packet_id: NonZeroU16, topic_filters: Vec<(ByteString, QoS)> },
    SubscribeAck { packet_id: NonZeroU16, status: Vec<SubscribeReturnCode> },
    Unsubscribe { packet_id: NonZeroU16, topic_filters: Vec<ByteString> },
    UnsubscribeAck { packet_id: NonZeroU16 },
    PingRequest,
    PingResponse,
    Disconnect,
}

impl From<Connect> for Packet {
    fn from(val: Connect) -> Packet {
        Packet::Connect(Box::new(val))
    }
}

impl Packet {
    /// Fixed header type bits, flags included where they are fixed.
    pub fn packet_type(&self) -> u8 {
        match self {
            Packet::Connect(_) => packet_type::CONNECT,
            Packet::ConnectAck { .. } => packet_type::CONNACK,
            Packet::Publish(_) => packet_type::PUBLISH_START,
            Packet::PublishAck { .. } => packet_type::PUBACK,
            Packet::PublishReceived { .. } => packet_type::PUBREC,
            Packet::PublishRelease { .. } => packet_type::PUBREL,
            Packet::PublishComplete { .. } => packet_type::PUBCOMP,
            Packet::Subscribe { .. } => packet_type::SUBSCRIBE,
            Packet::SubscribeAck { .. } => packet_type::SUBACK,
            Packet::Unsubscribe { .. } => packet_type::UNSUBSCRIBE,
            Packet::UnsubscribeAck { .. } => packet_type::UNSUBACK,
            Packet::PingRequest => packet_type::PINGREQ,
            Packet::PingResponse => packet_type::PINGRESP,
            Packet::Disconnect => packet_type::DISCONNECT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_ack_codes() {
        assert_eq!(u8::from(ConnectAckReason::IdentifierRejected), 2);
        assert_eq!(u8::from(ConnectAckReason::BadUserNameOrPassword), 4);
        assert_eq!(ConnectAckReason::try_from(0).unwrap(), ConnectAckReason::ConnectionAccepted);
        assert!(ConnectAckReason::try_from(6).is_err());
    }

    #[test]
    fn test_will_publish() {
        let will = LastWill {
            qos: QoS::AtLeastOnce,
            retain: true,
            topic: ByteString::from_static("w"),
            message: Bytes::from_static(b"bye"),
        };
        let p = will.to_publish();
        assert_eq!(p.topic, "w");
        assert_eq!(p.payload, Bytes::from_static(b"bye"));
        assert_eq!(p.qos, QoS::AtLeastOnce);
        assert!(p.retain);
        assert_eq!(p.packet_id, None);
        assert_eq!(p.expiry, 0);
        assert_eq!(p.origin, None);
    }

    #[test]
    fn test_packet_type() {
        assert_eq!(Packet::PublishRelease { packet_id: NonZeroU16::MIN }.packet_type(), 0b0110_0010);
        assert_eq!(Packet::Subscribe { packet_id: NonZeroU16::MIN, topic_filters: vec![] }.packet_type(), 0b1000_0010);
        assert_eq!(Packet::Disconnect.packet_type(), 0b1110_0000);
    }
}
