use std::net::SocketAddr;
use std::num::NonZeroU16;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytestring::ByteString;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use fabmq_codec::v3::{Codec, Connect, ConnectAck, ConnectAckReason, Packet, SubscribeReturnCode};
use fabmq_codec::{Publish, QoS};

use crate::error::MqttError;
use crate::{Builder, Error, Result};

/// One framed MQTT v3 connection.
pub struct MqttStream<Io> {
    pub io: Framed<Io, Codec>,
    pub remote_addr: SocketAddr,
    pub cfg: Arc<Builder>,
}

impl<Io> MqttStream<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: Io, remote_addr: SocketAddr, cfg: Arc<Builder>) -> Self {
        MqttStream { io: Framed::new(io, Codec::new(cfg.max_packet_size)), remote_addr, cfg }
    }

    /// Switch PUBLISH frames in both directions to the bridge format.
    #[inline]
    pub fn set_bridge(&mut self, bridge: bool) {
        self.io.codec_mut().set_bridge(bridge);
    }

    #[inline]
    pub fn is_bridge(&self) -> bool {
        self.io.codec().is_bridge()
    }

    #[inline]
    pub async fn send_disconnect(&mut self) -> Result<()> {
        self.send(Packet::Disconnect).await
    }

    #[inline]
    pub async fn send_publish(&mut self, publish: Publish) -> Result<()> {
        self.send(Packet::Publish(publish)).await
    }

    #[inline]
    pub async fn send_publish_ack(&mut self, packet_id: NonZeroU16) -> Result<()> {
        self.send(Packet::PublishAck { packet_id }).await
    }

    #[inline]
    pub async fn send_publish_received(&mut self, packet_id: NonZeroU16) -> Result<()> {
        self.send(Packet::PublishReceived { packet_id }).await
    }

    #[inline]
    pub async fn send_publish_release(&mut self, packet_id: NonZeroU16) -> Result<()> {
        self.send(Packet::PublishRelease { packet_id }).await
    }

    #[inline]
    pub async fn send_publish_complete(&mut self, packet_id: NonZeroU16) -> Result<()> {
        self.send(Packet::PublishComplete { packet_id }).await
    }

    #[inline]
    pub async fn send_subscribe(
        &mut self,
        packet_id: NonZeroU16,
        topic_filters: Vec<(ByteString, QoS)>,
    ) -> Result<()> {
        self.send(Packet::Subscribe { packet_id, topic_filters }).await
    }

    #[inline]
    pub async fn send_subscribe_ack(&mut self, packet_id: NonZeroU16, status: Vec<SubscribeReturnCode>) -> Result<()> {
        self.send(Packet::SubscribeAck { packet_id, status }).await
    }

    #[inline]
    pub async fn send_unsubscribe(&mut self, packet_id: NonZeroU16, topic_filters: Vec<ByteString>) -> Result<()> {
        self.send(Packet::Unsubscribe { packet_id, topic_filters }).await
    }

    #[inline]
    pub async fn send_unsubscribe_ack(&mut self, packet_id: NonZeroU16) -> Result<()> {
        self.send(Packet::UnsubscribeAck { packet_id }).await
    }

    #[inline]
    pub async fn send_connect(&mut self, connect: Connect) -> Result<()> {
        self.send(Packet::Connect(Box::new(connect))).await
    }

    #[inline]
    pub async fn send_connect_ack(&mut self, return_code: ConnectAckReason, session_present: bool) -> Result<()> {
        self.send(Packet::ConnectAck(ConnectAck { session_present, return_code })).await
    }

    #[inline]
    pub async fn send_ping_request(&mut self) -> Result<()> {
        self.send(Packet::PingRequest).await
    }

    #[inline]
    pub async fn send_ping_response(&mut self) -> Result<()> {
        self.send(Packet::PingResponse).await
    }

    #[inline]
    pub async fn send(&mut self, packet: Packet) -> Result<()> {
        let send_timeout = self.cfg.send_timeout;
        if send_timeout.is_zero() {
            self.io.send(packet).await.map_err(MqttError::Encode)?;
        } else {
            match tokio::time::timeout(send_timeout, self.io.send(packet)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(MqttError::Encode(e).into()),
                Err(_) => return Err(MqttError::WriteTimeout.into()),
            }
        }
        Ok(())
    }

    #[inline]
    pub async fn flush(&mut self) -> Result<()> {
        let send_timeout = self.cfg.send_timeout;
        if send_timeout.is_zero() {
            self.io.flush().await.map_err(MqttError::Encode)?;
        } else {
            match tokio::time::timeout(send_timeout, self.io.flush()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(MqttError::Encode(e).into()),
                Err(_) => return Err(MqttError::FlushTimeout.into()),
            }
        }
        Ok(())
    }

    #[inline]
    pub async fn close(&mut self) -> Result<()> {
        let send_timeout = self.cfg.send_timeout;
        if send_timeout.is_zero() {
            self.io.close().await.map_err(MqttError::Encode)?;
        } else {
            match tokio::time::timeout(send_timeout, self.io.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(MqttError::Encode(e).into()),
                Err(_) => return Err(MqttError::CloseTimeout.into()),
            }
        }
        Ok(())
    }

    /// `Ok(None)` when the peer closed the transport.
    #[inline]
    pub async fn recv(&mut self, tm: Duration) -> Result<Option<Packet>> {
        match tokio::time::timeout(tm, self.next()).await {
            Ok(Some(Ok(msg))) => Ok(Some(msg)),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Ok(None),
            Err(_) => Err(MqttError::ReadTimeout.into()),
        }
    }

    #[inline]
    pub async fn recv_connect(&mut self, tm: Duration) -> Result<Box<Connect>> {
        match self.recv(tm).await? {
            Some(Packet::Connect(connect)) => Ok(connect),
            Some(p) => Err(MqttError::UnexpectedPacket(p.packet_type()).into()),
            None => Err(MqttError::Closed.into()),
        }
    }
}

impl<Io> futures::Stream for MqttStream<Io>
where
    Io: AsyncRead + Unpin,
{
    type Item = Result<Packet>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = Pin::new(&mut self.io).poll_next(cx);
        Poll::Ready(match futures::ready!(next) {
            Some(Ok(packet)) => Some(Ok(packet)),
            Some(Err(e)) => Some(Err(Error::from(MqttError::Decode(e)))),
            None => None,
        })
    }
}
