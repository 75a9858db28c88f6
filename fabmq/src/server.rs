//! Listener loops.
//!
//! Each bound [`Listener`] gets an accept loop; every accepted transport is served
//! by [`v3::process`] on its own task.
//!
//! ```rust,no_run
//! use fabmq::broker::BrokerBuilder;
//! use fabmq::net::{Builder, Result};
//! use fabmq::server::MqttServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let broker = BrokerBuilder::new(uuid::Uuid::new_v4()).build().await?;
//!     MqttServer::new(broker)
//!         .listener(Builder::new().name("external/tcp").laddr(([0, 0, 0, 0], 1883).into()).bind()?)
//!         .build()
//!         .run()
//!         .await
//! }
//! ```

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::broker::Broker;
use crate::net::{Builder, Listener, ListenerType, Socket};
use crate::net::{MqttStream, Result};
use crate::v3;

pub struct MqttServerBuilder {
    broker: Broker,
    listeners: Vec<Listener>,
}

impl MqttServerBuilder {
    fn new(broker: Broker) -> Self {
        Self { broker, listeners: Vec::default() }
    }

    pub fn listener(mut self, listen: Listener) -> Self {
        self.listeners.push(listen);
        self
    }

    pub fn build(self) -> MqttServer {
        MqttServer { inner: Arc::new(MqttServerInner { broker: self.broker, listeners: self.listeners }) }
    }
}

#[derive(Clone)]
pub struct MqttServer {
    inner: Arc<MqttServerInner>,
}

pub struct MqttServerInner {
    pub broker: Broker,
    listeners: Vec<Listener>,
}

impl Deref for MqttServer {
    type Target = MqttServerInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl MqttServer {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(broker: Broker) -> MqttServerBuilder {
        MqttServerBuilder::new(broker)
    }

    /// Runs every listener until all of them stop.
    pub async fn run(self) -> Result<()> {
        futures::future::join_all(
            self.listeners
                .iter()
                .map(|l| match l.typ {
                    ListenerType::TCP => listen_tcp(self.broker.clone(), l).boxed(),
                    #[cfg(feature = "ws")]
                    ListenerType::WS => listen_ws(self.broker.clone(), l).boxed(),
                })
                .collect::<Vec<_>>(),
        )
        .await;
        Ok(())
    }
}

/// Transport settings of a configured listener.
pub fn listener_builder(l: &fabmq_conf::Listener) -> Builder {
    Builder::new()
        .name(l.name.clone())
        .laddr(l.addr)
        .backlog(l.backlog)
        .nodelay(l.nodelay)
        .reuseaddr(l.reuseaddr)
        .reuseport(l.reuseport)
        .max_packet_size(l.max_packet_size.as_u32())
        .keepalive_backoff(l.keepalive_backoff)
        .handshake_timeout(l.handshake_timeout)
        .send_timeout(l.send_timeout)
        .bridge_suffix(l.bridge_suffix)
}

/// Serves an already framed transport on a new task.
pub fn serve<Io: Socket>(broker: Broker, stream: MqttStream<Io>) {
    tokio::spawn(async move {
        let remote_addr = stream.remote_addr;
        if let Err(e) = v3::process(broker, stream).await {
            log::info!("{} MQTT processing error: {e:?}", remote_addr);
        }
    });
}

async fn listen_tcp(broker: Broker, l: &Listener) {
    loop {
        match l.accept().await {
            Ok(accept) => {
                log::debug!("TCP connection from {}", accept.remote_addr);
                match accept.tcp() {
                    Ok(s) => serve(broker.clone(), s),
                    Err(e) => log::warn!("TCP accept error: {e:?}"),
                }
            }
            Err(e) => {
                log::info!("TCP listener error: {e:?}");
                tokio::time::sleep(Duration::from_millis(1000)).await;
            }
        }
    }
}

#[cfg(feature = "ws")]
async fn listen_ws(broker: Broker, l: &Listener) {
    loop {
        match l.accept().await {
            Ok(accept) => {
                let broker = broker.clone();
                tokio::spawn(async move {
                    log::debug!("WebSocket connection from {}", accept.remote_addr);
                    match accept.ws().await {
                        Ok(s) => serve(broker, s),
                        Err(e) => log::warn!("WebSocket accept error: {e:?}"),
                    }
                });
            }
            Err(e) => {
                log::info!("WebSocket listener error: {e:?}");
                tokio::time::sleep(Duration::from_millis(1000)).await;
            }
        }
    }
}
