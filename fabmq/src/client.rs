//! Outbound MQTT v3 client used for bridges and tests.
//!
//! The connection is driven by a spawned task; [`MqttClient`] is a cheap handle
//! that queues commands to it. Events come back through a [`ClientHandler`].

use std::collections::BTreeMap;
use std::num::NonZeroU16;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use fabmq_codec::v3::{Connect, ConnectAck, ConnectAckReason, Packet, SubscribeReturnCode};
use fabmq_net::{MqttError, MqttStream, Socket};

use crate::inflight::{InInflight, MomentStatus, OutInflight};
use crate::types::{Publish, QoS, TopicFilter, TopicName};
use crate::Result;

/// Callbacks of one client connection.
pub trait ClientHandler: Send + Sync + 'static {
    fn connect_successful(&self) {}

    fn connect_error(&self, _reason: ConnectAckReason) {}

    fn message_arrived(&self, publish: Publish);

    /// `clean` is set when the close was requested through [`MqttClient::disconnect`].
    fn disconnected(&self, _clean: bool) {}
}

enum Command {
    Publish(Publish),
    Subscribe(Vec<(TopicFilter, QoS)>, oneshot::Sender<Vec<SubscribeReturnCode>>),
    Unsubscribe(Vec<TopicFilter>, oneshot::Sender<()>),
    Disconnect,
}

#[derive(Clone)]
pub struct MqttClient {
    tx: mpsc::UnboundedSender<Command>,
}

impl MqttClient {
    /// Performs the CONNECT exchange on `sink` and spawns the connection task.
    ///
    /// A refused CONNACK is reported to `handler` and returned as an error.
    pub async fn connect<Io: Socket>(
        mut sink: MqttStream<Io>,
        connect: Connect,
        handler: Arc<dyn ClientHandler>,
    ) -> Result<MqttClient> {
        let keep_alive = connect.keep_alive;
        let bridge = connect.protocol.no_echo() && sink.cfg.bridge_suffix;
        sink.send_connect(connect).await?;

        match sink.recv(sink.cfg.handshake_timeout).await? {
            Some(Packet::ConnectAck(ConnectAck { return_code: ConnectAckReason::ConnectionAccepted, .. })) => {}
            Some(Packet::ConnectAck(ConnectAck { return_code, .. })) => {
                handler.connect_error(return_code);
                let _ = sink.close().await;
                return Err(anyhow!("connection refused, {}", return_code.reason()));
            }
            Some(p) => return Err(MqttError::UnexpectedPacket(p.packet_type()).into()),
            None => return Err(MqttError::Closed.into()),
        }

        if bridge {
            sink.set_bridge(true);
        }
        handler.connect_successful();

        let (tx, rx) = mpsc::unbounded_channel();
        let state = ClientState {
            handler,
            out_inflight: OutInflight::new(),
            in_inflight: InInflight::default(),
            pending_subs: BTreeMap::new(),
            pending_unsubs: BTreeMap::new(),
            last_write: Instant::now(),
        };
        tokio::spawn(state.run(sink, rx, keep_alive));
        Ok(MqttClient { tx })
    }

    pub fn publish<T>(&self, topic: T, payload: Bytes, qos: QoS, retain: bool) -> Result<()>
    where
        TopicName: From<T>,
    {
        self.send(Command::Publish(Publish::new(topic, payload, qos, retain)))
    }

    /// Resolves with the granted codes once SUBACK arrives.
    pub async fn subscribe(&self, topic_filters: Vec<(TopicFilter, QoS)>) -> Result<Vec<SubscribeReturnCode>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Subscribe(topic_filters, tx))?;
        rx.await.map_err(|_| anyhow!("connection closed"))
    }

    pub async fn unsubscribe(&self, topic_filters: Vec<TopicFilter>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Unsubscribe(topic_filters, tx))?;
        rx.await.map_err(|_| anyhow!("connection closed"))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    #[inline]
    fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).map_err(|_| anyhow!("connection closed"))
    }
}

struct ClientState {
    handler: Arc<dyn ClientHandler>,
    out_inflight: OutInflight,
    in_inflight: InInflight,
    pending_subs: BTreeMap<NonZeroU16, oneshot::Sender<Vec<SubscribeReturnCode>>>,
    pending_unsubs: BTreeMap<NonZeroU16, oneshot::Sender<()>>,
    last_write: Instant,
}

impl ClientState {
    async fn run<Io: Socket>(mut self, mut sink: MqttStream<Io>, mut rx: mpsc::UnboundedReceiver<Command>, keep_alive: u16) {
        let ping_interval = (keep_alive > 0).then(|| Duration::from_secs(keep_alive as u64));
        let ping_delay = tokio::time::sleep(ping_interval.unwrap_or(Duration::MAX));
        tokio::pin!(ping_delay);

        let clean = loop {
            if let Some(interval) = ping_interval {
                ping_delay.as_mut().reset(self.last_write + interval);
            }
            tokio::select! {
                _ = &mut ping_delay, if ping_interval.is_some() => {
                    if let Err(e) = self.write(&mut sink, Packet::PingRequest).await {
                        log::debug!("ping failed, {e}");
                        break false;
                    }
                }
                cmd = rx.recv() => match cmd {
                    Some(Command::Disconnect) | None => {
                        if let Err(e) = sink.send_disconnect().await {
                            log::debug!("send DISCONNECT failed, {e}");
                        }
                        break true;
                    }
                    Some(cmd) => {
                        if let Err(e) = self.on_command(&mut sink, cmd).await {
                            log::debug!("client write failed, {e}");
                            break false;
                        }
                    }
                },
                packet = sink.next() => match packet {
                    Some(Ok(packet)) => {
                        if let Err(e) = self.on_packet(&mut sink, packet).await {
                            log::debug!("client connection error, {e}");
                            break false;
                        }
                    }
                    Some(Err(e)) => {
                        log::debug!("client read failed, {e}");
                        break false;
                    }
                    None => break false,
                }
            }
        };

        let _ = sink.close().await;
        self.handler.disconnected(clean);
    }

    async fn on_command<Io: Socket>(&mut self, sink: &mut MqttStream<Io>, cmd: Command) -> Result<()> {
        match cmd {
            Command::Publish(mut p) => {
                match p.qos {
                    QoS::AtMostOnce => {}
                    QoS::AtLeastOnce => {
                        let packet_id = self.out_inflight.next_id();
                        p.packet_id = Some(packet_id);
                        self.out_inflight.push(packet_id, MomentStatus::UnAck, p.clone());
                    }
                    QoS::ExactlyOnce => {
                        let packet_id = self.out_inflight.next_id();
                        p.packet_id = Some(packet_id);
                        self.out_inflight.push(packet_id, MomentStatus::UnReceived, p.clone());
                    }
                }
                self.write(sink, Packet::Publish(p)).await
            }
            Command::Subscribe(topic_filters, tx) => {
                let packet_id = self.out_inflight.next_id();
                self.pending_subs.insert(packet_id, tx);
                self.write(sink, Packet::Subscribe { packet_id, topic_filters }).await
            }
            Command::Unsubscribe(topic_filters, tx) => {
                let packet_id = self.out_inflight.next_id();
                self.pending_unsubs.insert(packet_id, tx);
                self.write(sink, Packet::Unsubscribe { packet_id, topic_filters }).await
            }
            Command::Disconnect => Ok(()),
        }
    }

    async fn on_packet<Io: Socket>(&mut self, sink: &mut MqttStream<Io>, packet: Packet) -> Result<()> {
        match packet {
            Packet::Publish(p) => match p.qos {
                QoS::AtMostOnce => self.handler.message_arrived(p),
                QoS::AtLeastOnce => {
                    let packet_id = p.packet_id.ok_or_else(|| anyhow!("QoS 1 PUBLISH without packet id"))?;
                    self.handler.message_arrived(p);
                    self.write(sink, Packet::PublishAck { packet_id }).await?;
                }
                QoS::ExactlyOnce => {
                    let packet_id = p.packet_id.ok_or_else(|| anyhow!("QoS 2 PUBLISH without packet id"))?;
                    self.in_inflight.hold(packet_id, p);
                    self.write(sink, Packet::PublishReceived { packet_id }).await?;
                }
            },
            Packet::PublishRelease { packet_id } => {
                if let Some(p) = self.in_inflight.release(packet_id) {
                    self.handler.message_arrived(p);
                }
                self.write(sink, Packet::PublishComplete { packet_id }).await?;
            }
            Packet::PublishAck { packet_id } => {
                self.out_inflight.remove(packet_id, MomentStatus::UnAck);
            }
            Packet::PublishReceived { packet_id } => {
                if self.out_inflight.update_status(packet_id, MomentStatus::UnReceived, MomentStatus::UnComplete) {
                    self.write(sink, Packet::PublishRelease { packet_id }).await?;
                }
            }
            Packet::PublishComplete { packet_id } => {
                self.out_inflight.remove(packet_id, MomentStatus::UnComplete);
            }
            Packet::SubscribeAck { packet_id, status } => {
                if let Some(tx) = self.pending_subs.remove(&packet_id) {
                    let _ = tx.send(status);
                }
            }
            Packet::UnsubscribeAck { packet_id } => {
                if let Some(tx) = self.pending_unsubs.remove(&packet_id) {
                    let _ = tx.send(());
                }
            }
            Packet::PingResponse => {}
            other => return Err(MqttError::UnexpectedPacket(other.packet_type()).into()),
        }
        Ok(())
    }

    #[inline]
    async fn write<Io: Socket>(&mut self, sink: &mut MqttStream<Io>, packet: Packet) -> Result<()> {
        sink.send(packet).await?;
        self.last_write = Instant::now();
        Ok(())
    }
}
