#![deny(unsafe_code)]

//! MQTT v3.1 / v3.1.1 broker engine.
//!
//! A [`Broker`](broker::Broker) routes publishes between protocol connections,
//! in-process subscribers and, through a [`ClusterBus`](cluster::ClusterBus), other
//! broker nodes. Sessions survive disconnects, retained messages are replayed to new
//! subscriptions and topics marked with a `|` level are shared across the cluster.
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use fabmq::broker::{BrokerBuilder, Subscriber};
//! use fabmq::net::{Builder, Result};
//! use fabmq::server::MqttServer;
//! use fabmq::types::QoS;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let broker = BrokerBuilder::new(uuid::Uuid::new_v4()).build().await?;
//!
//!     let (endpoint, mut rx) = Subscriber::endpoint("audit");
//!     broker.subscribe("sensors/#", endpoint);
//!     tokio::spawn(async move {
//!         while let Some(p) = rx.recv().await {
//!             println!("{} {:?}", p.topic, p.payload);
//!         }
//!     });
//!
//!     broker.publish("sensors/boot", Bytes::from_static(b"up"), QoS::AtMostOnce, true, None)?;
//!
//!     MqttServer::new(broker)
//!         .listener(Builder::new().name("external/tcp").laddr(([0, 0, 0, 0], 1883).into()).bind()?)
//!         .build()
//!         .run()
//!         .await
//! }
//! ```

pub mod auth;
pub mod broker;
pub mod client;
pub mod cluster;
pub mod inflight;
pub mod logger;
pub mod retain;
pub mod server;
pub mod session;
pub mod stats;
pub mod topic;
pub mod types;
pub mod v3;

pub use fabmq_codec as codec;
pub use fabmq_conf as conf;
pub use fabmq_net as net;
pub use fabmq_utils as utils;
pub use net::{Error, Result};
