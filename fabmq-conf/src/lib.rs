#![deny(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use config::{builder::DefaultState, Config, ConfigBuilder, File};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use fabmq_utils::{deserialize_duration, NodeId};

use self::listener::Listeners;
use self::logging::Log;

pub use self::listener::Listener;
pub use self::options::Options;

pub mod listener;
pub mod logging;
pub mod options;

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub node: Node,
    #[serde(default)]
    pub log: Log,
    #[serde(rename = "listener")]
    #[serde(default)]
    pub listeners: Listeners,
    #[serde(default)]
    pub mqtt: Mqtt,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    /// Layered sources: system file, working directory file, `FABMQ_*` environment, `-f` file.
    pub fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/fabmq/fabmq").required(false))
            .add_source(File::with_name("fabmq").required(false))
            .add_source(
                config::Environment::with_prefix("fabmq").prefix_separator("_").separator("__").try_parsing(true),
            );

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(true));
        }

        Self::build(builder, opts)
    }

    /// Settings from a TOML document only.
    pub fn from_toml(toml: &str, opts: Options) -> Result<Self> {
        let builder = Config::builder().add_source(File::from_str(toml, config::FileFormat::Toml));
        Self::build(builder, opts)
    }

    fn build(builder: ConfigBuilder<DefaultState>, opts: Options) -> Result<Self> {
        let mut inner: Inner = builder.build()?.try_deserialize()?;

        inner.listeners.init();
        if inner.listeners.tcps.is_empty() && inner.listeners.wss.is_empty() {
            inner.listeners.set_default();
        }

        //Command line configuration overriding file configuration
        if let Some(id) = opts.node_id {
            inner.node.id = id;
        }

        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn instance() -> &'static Self {
        match SETTINGS.get() {
            Some(c) => c,
            None => {
                unreachable!("Settings not initialized");
            }
        }
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }

    #[inline]
    pub fn logs(&self) {
        log::debug!("Config info is {:?}", self.0);
        log::info!("node_id is {}", self.node.id);
        log::info!("mqtt config is {:?}", self.mqtt);
        log::info!("auth users: {}, allow_anonymous: {}", self.auth.users.len(), self.auth.allow_anonymous);
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    #[serde(default = "Node::id_default")]
    pub id: NodeId,
}

impl Default for Node {
    fn default() -> Self {
        Self { id: Self::id_default() }
    }
}

impl Node {
    fn id_default() -> NodeId {
        NodeId::new_v4()
    }
}

/// Broker core behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct Mqtt {
    /// Per-session cap on messages queued while disconnected, 0 is unbounded
    #[serde(default = "Mqtt::max_offline_queue_default")]
    pub max_offline_queue: usize,
    /// Cap on distinct topics in each retained map, 0 is unbounded
    #[serde(default = "Mqtt::max_retained_default")]
    pub max_retained: usize,
    #[serde(default = "Mqtt::retain_sweep_interval_default", deserialize_with = "deserialize_duration")]
    pub retain_sweep_interval: Duration,
    #[serde(default = "Mqtt::retain_cluster_sweep_interval_default", deserialize_with = "deserialize_duration")]
    pub retain_cluster_sweep_interval: Duration,
    /// 0 disables the node announce
    #[serde(default = "Mqtt::announce_interval_default", deserialize_with = "deserialize_duration")]
    pub announce_interval: Duration,
    #[serde(default = "Mqtt::announce_ttl_default", deserialize_with = "deserialize_duration")]
    pub announce_ttl: Duration,
    /// How long a new connection waits for an evicted one to hand over its session
    #[serde(default = "Mqtt::kick_timeout_default", deserialize_with = "deserialize_duration")]
    pub kick_timeout: Duration,
}

impl Default for Mqtt {
    fn default() -> Self {
        Self {
            max_offline_queue: Self::max_offline_queue_default(),
            max_retained: Self::max_retained_default(),
            retain_sweep_interval: Self::retain_sweep_interval_default(),
            retain_cluster_sweep_interval: Self::retain_cluster_sweep_interval_default(),
            announce_interval: Self::announce_interval_default(),
            announce_ttl: Self::announce_ttl_default(),
            kick_timeout: Self::kick_timeout_default(),
        }
    }
}

impl Mqtt {
    fn max_offline_queue_default() -> usize {
        10_000
    }
    fn max_retained_default() -> usize {
        1_000_000
    }
    fn retain_sweep_interval_default() -> Duration {
        Duration::from_millis(97)
    }
    fn retain_cluster_sweep_interval_default() -> Duration {
        Duration::from_millis(9997)
    }
    fn announce_interval_default() -> Duration {
        Duration::from_millis(9997)
    }
    fn announce_ttl_default() -> Duration {
        Duration::from_millis(13997)
    }
    fn kick_timeout_default() -> Duration {
        Duration::from_secs(5)
    }
}

/// Static credentials for the built-in authorizer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Auth {
    /// Accept any credentials when no users are configured
    #[serde(default)]
    pub allow_anonymous: bool,
    /// username -> password
    #[serde(default)]
    pub users: HashMap<String, String>,
}
