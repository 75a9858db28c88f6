use serde_json::json;

use fabmq_utils::Counter;

/// Broker-wide gauges.
#[derive(Debug, Default)]
pub struct Stats {
    /// live connections
    pub connections: Counter,
    /// sessions parked in the disconnected map
    pub sessions: Counter,
    /// messages queued for disconnected sessions
    pub offline_messages: Counter,
    pub offline_dropped: Counter,
    pub publishes: Counter,
    pub broadcasts: Counter,
    pub expired: Counter,
    pub internal_errors: Counter,
}

impl Stats {
    #[inline]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "connections": self.connections.to_json(),
            "sessions": self.sessions.to_json(),
            "offline_messages": self.offline_messages.to_json(),
            "offline_dropped": self.offline_dropped.count(),
            "publishes": self.publishes.count(),
            "broadcasts": self.broadcasts.count(),
            "expired": self.expired.count(),
            "internal_errors": self.internal_errors.count(),
        })
    }
}
