use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use socket2::{Domain, SockAddr, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
#[cfg(feature = "ws")]
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::handshake::server::{ErrorResponse, Request, Response},
};

use crate::stream::MqttStream;
#[cfg(feature = "ws")]
use crate::ws::WsStream;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct Builder {
    /// The name of the server.
    pub name: String,
    ///The local address the server listens on.
    pub laddr: SocketAddr,
    ///The maximum length of the TCP connection queue.
    pub backlog: i32,
    ///Sets the value of the TCP_NODELAY option on this socket.
    pub nodelay: bool,
    ///Whether to enable the SO_REUSEADDR option.
    pub reuseaddr: Option<bool>,
    ///Whether to enable the SO_REUSEPORT option.
    pub reuseport: Option<bool>,
    ///Maximum allowed mqtt message length. 0 means unlimited, default: 1M
    pub max_packet_size: u32,
    ///Idle disconnect after keepalive * backoff without inbound frames, Default: 1.5
    pub keepalive_backoff: f32,
    ///Handshake timeout.
    pub handshake_timeout: Duration,
    ///Send timeout. 0 means no timeout
    pub send_timeout: Duration,
    ///Bridge-level clients exchange PUBLISH frames with the expiry/origin suffix
    pub bridge_suffix: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            name: Default::default(),
            laddr: SocketAddr::from(SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 1883)),
            backlog: 512,
            nodelay: false,
            reuseaddr: None,
            reuseport: None,
            max_packet_size: 1024 * 1024, //"1M"
            keepalive_backoff: 1.5,
            handshake_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
            bridge_suffix: false,
        }
    }

    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    pub fn laddr(mut self, laddr: SocketAddr) -> Self {
        self.laddr = laddr;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn reuseaddr(mut self, reuseaddr: Option<bool>) -> Self {
        self.reuseaddr = reuseaddr;
        self
    }

    pub fn reuseport(mut self, reuseport: Option<bool>) -> Self {
        self.reuseport = reuseport;
        self
    }

    pub fn max_packet_size(mut self, max_packet_size: u32) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn keepalive_backoff(mut self, keepalive_backoff: f32) -> Self {
        self.keepalive_backoff = keepalive_backoff;
        self
    }

    pub fn handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub fn send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn bridge_suffix(mut self, bridge_suffix: bool) -> Self {
        self.bridge_suffix = bridge_suffix;
        self
    }

    pub fn bind(self) -> Result<Listener> {
        let builder = match self.laddr {
            SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
            SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
        };

        builder.set_linger(Some(Duration::from_secs(10)))?;

        builder.set_nonblocking(true)?;

        if let Some(reuseaddr) = self.reuseaddr {
            builder.set_reuse_address(reuseaddr)?;
        }

        #[cfg(not(windows))]
        if let Some(reuseport) = self.reuseport {
            builder.set_reuse_port(reuseport)?;
        }

        builder.bind(&SockAddr::from(self.laddr))?;
        builder.listen(self.backlog)?;
        let tcp_listener = TcpListener::from_std(std::net::TcpListener::from(builder))?;
        log::info!("MQTT Broker Listening on {} {}", self.name, tcp_listener.local_addr()?);
        Ok(Listener { typ: ListenerType::TCP, cfg: Arc::new(self), tcp_listener })
    }
}

#[derive(Debug, Copy, Clone)]
pub enum ListenerType {
    TCP,
    #[cfg(feature = "ws")]
    WS,
}

pub struct Listener {
    pub typ: ListenerType,
    pub cfg: Arc<Builder>,
    tcp_listener: TcpListener,
}

impl Listener {
    #[cfg(feature = "ws")]
    pub fn ws(mut self) -> Self {
        self.typ = ListenerType::WS;
        self
    }

    /// Bound address; differs from the configured one when port 0 was requested.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp_listener.local_addr()?)
    }

    pub async fn accept(&self) -> Result<Acceptor<TcpStream>> {
        let (socket, remote_addr) = self.tcp_listener.accept().await?;
        if let Err(e) = socket.set_nodelay(self.cfg.nodelay) {
            return Err(Error::from(e));
        }
        Ok(Acceptor { socket, remote_addr, cfg: self.cfg.clone(), typ: self.typ })
    }
}

pub struct Acceptor<S> {
    pub(crate) socket: S,
    pub remote_addr: SocketAddr,
    pub cfg: Arc<Builder>,
    pub typ: ListenerType,
}

impl<S> Acceptor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    #[inline]
    pub fn tcp(self) -> Result<MqttStream<S>> {
        if matches!(self.typ, ListenerType::TCP) {
            Ok(MqttStream::new(self.socket, self.remote_addr, self.cfg))
        } else {
            Err(anyhow!("Mismatched ListenerType"))
        }
    }

    #[inline]
    #[cfg(feature = "ws")]
    pub async fn ws(self) -> Result<MqttStream<WsStream<S>>> {
        if !matches!(self.typ, ListenerType::WS) {
            return Err(anyhow!("Mismatched ListenerType"));
        }

        match tokio::time::timeout(self.cfg.handshake_timeout, accept_hdr_async(self.socket, on_handshake))
            .await
        {
            Ok(Ok(ws_stream)) => Ok(MqttStream::new(WsStream::new(ws_stream), self.remote_addr, self.cfg)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(crate::MqttError::ReadTimeout.into()),
        }
    }
}

#[allow(clippy::result_large_err)]
#[cfg(feature = "ws")]
fn on_handshake(req: &Request, mut response: Response) -> std::result::Result<Response, ErrorResponse> {
    const PROTOCOL_ERROR: &str = "No \"Sec-WebSocket-Protocol: mqtt\" in client request";
    let offered = req
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ErrorResponse::new(Some(PROTOCOL_ERROR.into())))?;
    if !offered.split(',').any(|p| p.trim() == "mqtt") {
        return Err(ErrorResponse::new(Some(PROTOCOL_ERROR.into())));
    }
    response.headers_mut().append(
        "Sec-WebSocket-Protocol",
        "mqtt".parse().map_err(|_| ErrorResponse::new(Some("InvalidHeaderValue".into())))?,
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabmq_codec::v3::{Connect, ConnectAckReason, Packet};

    #[tokio::test]
    async fn test_tcp_accept() {
        let listener = Builder::new()
            .name("test/tcp")
            .laddr(([127, 0, 0, 1], 0).into())
            .reuseaddr(Some(true))
            .bind()
            .unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let server = tokio::spawn(async move {
            let acceptor = listener.accept().await.unwrap();
            let mut stream = acceptor.tcp().unwrap();
            let connect = stream.recv_connect(Duration::from_secs(5)).await.unwrap();
            stream.send_connect_ack(ConnectAckReason::ConnectionAccepted, false).await.unwrap();
            connect.client_id
        });

        let io = TcpStream::connect(addr).await.unwrap();
        let mut client = MqttStream::new(io, addr, Arc::new(Builder::new()));
        client.send_connect(Connect::default().client_id("c1")).await.unwrap();
        match client.recv(Duration::from_secs(5)).await.unwrap() {
            Some(Packet::ConnectAck(ack)) => assert_eq!(ack.return_code, ConnectAckReason::ConnectionAccepted),
            p => panic!("unexpected {:?}", p),
        }
        assert_eq!(server.await.unwrap(), "c1");
    }
}
