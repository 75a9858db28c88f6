use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

use fabmq_utils::{deserialize_duration, Bytesize};

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

type Port = u16;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Listeners {
    #[serde(rename = "tcp")]
    #[serde(default)]
    _tcps: HashMap<String, ListenerInner>,

    #[serde(rename = "ws")]
    #[serde(default)]
    _wss: HashMap<String, ListenerInner>,

    #[serde(default, skip)]
    pub tcps: HashMap<Port, Listener>,
    #[serde(default, skip)]
    pub wss: HashMap<Port, Listener>,
}

impl Listeners {
    #[inline]
    pub(crate) fn init(&mut self) {
        for (name, mut inner) in self._tcps.drain() {
            if inner.enable {
                inner.name = format!("{name}/tcp");
                self.tcps.insert(inner.addr.port(), Listener::new(inner));
            }
        }

        for (name, mut inner) in self._wss.drain() {
            if inner.enable {
                inner.name = format!("{name}/ws");
                self.wss.insert(inner.addr.port(), Listener::new(inner));
            }
        }
    }

    #[inline]
    pub fn tcp(&self, port: u16) -> Option<Listener> {
        self.tcps.get(&port).cloned()
    }

    #[inline]
    pub fn ws(&self, port: u16) -> Option<Listener> {
        self.wss.get(&port).cloned()
    }

    #[inline]
    pub(crate) fn set_default(&mut self) {
        let inner = Listener::default();
        self.tcps.insert(inner.addr.port(), inner);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Listener {
    inner: Arc<ListenerInner>,
}

impl Listener {
    #[inline]
    fn new(inner: ListenerInner) -> Self {
        Self { inner: Arc::new(inner) }
    }
}

impl Deref for Listener {
    type Target = ListenerInner;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerInner {
    #[serde(default)]
    pub name: String,
    #[serde(default = "ListenerInner::enable_default")]
    pub enable: bool,
    #[serde(default = "ListenerInner::addr_default", deserialize_with = "deserialize_addr")]
    pub addr: SocketAddr,
    #[serde(default = "ListenerInner::max_packet_size_default")]
    pub max_packet_size: Bytesize,
    #[serde(default = "ListenerInner::backlog_default")]
    pub backlog: i32,
    #[serde(default = "ListenerInner::nodelay_default")]
    pub nodelay: bool,
    #[serde(default = "ListenerInner::reuseaddr_default")]
    pub reuseaddr: Option<bool>,
    #[serde(default)]
    pub reuseport: Option<bool>,
    /// idle disconnect after `keepalive * keepalive_backoff` without inbound frames
    #[serde(default = "ListenerInner::keepalive_backoff_default")]
    pub keepalive_backoff: f32,
    #[serde(default = "ListenerInner::handshake_timeout_default", deserialize_with = "deserialize_duration")]
    pub handshake_timeout: Duration,
    #[serde(default = "ListenerInner::send_timeout_default", deserialize_with = "deserialize_duration")]
    pub send_timeout: Duration,
    /// bridge-level clients exchange PUBLISH frames with the expiry/origin suffix
    #[serde(default)]
    pub bridge_suffix: bool,
}

impl Default for ListenerInner {
    fn default() -> Self {
        Self {
            name: "external/tcp".into(),
            enable: ListenerInner::enable_default(),
            addr: ListenerInner::addr_default(),
            max_packet_size: ListenerInner::max_packet_size_default(),
            backlog: ListenerInner::backlog_default(),
            nodelay: ListenerInner::nodelay_default(),
            reuseaddr: ListenerInner::reuseaddr_default(),
            reuseport: None,
            keepalive_backoff: ListenerInner::keepalive_backoff_default(),
            handshake_timeout: ListenerInner::handshake_timeout_default(),
            send_timeout: ListenerInner::send_timeout_default(),
            bridge_suffix: false,
        }
    }
}

impl ListenerInner {
    fn enable_default() -> bool {
        true
    }
    #[inline]
    fn addr_default() -> SocketAddr {
        ([0, 0, 0, 0], 1883).into()
    }
    #[inline]
    fn max_packet_size_default() -> Bytesize {
        Bytesize(1024 * 1024)
    }
    #[inline]
    fn backlog_default() -> i32 {
        1024
    }
    #[inline]
    fn nodelay_default() -> bool {
        false
    }
    #[inline]
    fn reuseaddr_default() -> Option<bool> {
        Some(true)
    }
    #[inline]
    fn keepalive_backoff_default() -> f32 {
        1.5
    }
    #[inline]
    fn handshake_timeout_default() -> Duration {
        Duration::from_secs(30)
    }
    #[inline]
    fn send_timeout_default() -> Duration {
        Duration::from_secs(10)
    }
}

/// Accepts `host:port` or `:port` (all interfaces).
pub fn deserialize_addr<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: Deserializer<'de>,
{
    let addr = String::deserialize(deserializer)?;
    let addr = if addr.starts_with(':') { format!("0.0.0.0{addr}") } else { addr };
    addr.parse::<SocketAddr>().map_err(de::Error::custom)
}
