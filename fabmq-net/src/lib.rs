#![deny(unsafe_code)]

//! Transport side of the broker: TCP (and optionally WebSocket) listeners that
//! hand out [`MqttStream`]s, framed with the v3 codec.
//!
//! Any `AsyncRead + AsyncWrite` byte pipe is a [`Socket`], so the protocol engine
//! runs unchanged over TCP, WebSocket or an in-process `tokio::io::duplex` pair.

mod builder;
mod error;
mod stream;
#[cfg(feature = "ws")]
mod ws;

pub use builder::{Acceptor, Builder, Listener, ListenerType};
pub use error::MqttError;
pub use stream::MqttStream;
#[cfg(feature = "ws")]
pub use ws::WsStream;

use tokio::io::{AsyncRead, AsyncWrite};

pub type Error = anyhow::Error;
pub type Result<T> = anyhow::Result<T, Error>;

/// Byte transport carrying one MQTT connection.
pub trait Socket: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Socket for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
