use std::fmt;

use bytestring::ByteString;
use tokio::sync::{mpsc, oneshot};

pub use fabmq_codec::v3::{ConnectAckReason, LastWill};
pub use fabmq_codec::{Publish, QoS, TimestampMillis};
pub use fabmq_utils::NodeId;

pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

pub type ClientId = ByteString;
pub type TopicName = ByteString;
pub type TopicFilter = ByteString;
/// Process-unique connection number, distinguishes successive connections of one client id.
pub type ConnId = u64;

pub type Tx = mpsc::UnboundedSender<Message>;
pub type Rx = mpsc::UnboundedReceiver<Message>;

/// Bus channel carrying cluster-wide publishes between nodes.
pub const CLUSTER_CHANNEL: &str = "mqtt.enqueue";

/// Commands delivered to a live connection.
#[derive(Debug)]
pub enum Message {
    /// Deliver at the QoS already set on the message.
    Forward(Publish),
    /// A newer connection took over this client id; acknowledge once the will has fired.
    Kick(oneshot::Sender<()>),
}

/// Where a routed message entered the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Api,
    Connection(ConnId),
    Cluster,
}

/// Why a connection ended.
#[derive(Debug)]
pub enum Reason {
    /// Client sent DISCONNECT
    Disconnect,
    /// Superseded by a newer connection with the same client id
    Kicked,
    RemoteClose,
    KeepaliveTimeout,
    Error(anyhow::Error),
}

impl Reason {
    /// A graceful close suppresses the will.
    #[inline]
    pub fn is_graceful(&self) -> bool {
        matches!(self, Reason::Disconnect)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Disconnect => write!(f, "Disconnect"),
            Reason::Kicked => write!(f, "Kicked"),
            Reason::RemoteClose => write!(f, "RemoteClose"),
            Reason::KeepaliveTimeout => write!(f, "KeepaliveTimeout"),
            Reason::Error(e) => write!(f, "Error({e})"),
        }
    }
}

impl From<anyhow::Error> for Reason {
    fn from(e: anyhow::Error) -> Self {
        Reason::Error(e)
    }
}
