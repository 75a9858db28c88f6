use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use fabmq_codec::error::DecodeError;
use fabmq_codec::v3::{ConnectAckReason, Packet, SubscribeReturnCode};
use fabmq_net::{MqttError, MqttStream, Socket};
use fabmq_utils::timestamp_millis;

use crate::broker::Broker;
use crate::inflight::{InInflight, MomentStatus, OutInflight};
use crate::session::Session;
use crate::topic::Topic;
use crate::types::{ClientId, ConnId, HashMap, Message, Publish, QoS, Reason, Rx, Source, TopicFilter, TopicName};
use crate::{Error, Result};

/// v3.1 client identifiers are limited to 23 characters.
pub const MAX_CLIENT_ID_LEN_V31: usize = 23;

/// Serves one accepted transport until it closes.
pub async fn process<Io: Socket>(broker: Broker, mut sink: MqttStream<Io>) -> Result<()> {
    let state = match handshake(&broker, &mut sink).await {
        Ok(state) => state,
        Err((ack_code, e)) => {
            if let Some(ack_code) = ack_code {
                log::info!("{} connection refused, {}, {e}", sink.remote_addr, ack_code.reason());
                if let Err(e) = sink.send_connect_ack(ack_code, false).await {
                    log::debug!("{} send CONNACK failed, {e}", sink.remote_addr);
                }
            } else {
                log::debug!("{} handshake failed, {e}", sink.remote_addr);
            }
            let _ = sink.close().await;
            return Err(e);
        }
    };
    state.run(sink).await
}

async fn handshake<Io: Socket>(
    broker: &Broker,
    sink: &mut MqttStream<Io>,
) -> std::result::Result<SessionState, (Option<ConnectAckReason>, Error)> {
    let mut c = match sink.recv_connect(sink.cfg.handshake_timeout).await {
        Ok(c) => c,
        Err(e) => {
            let version_mismatch =
                e.downcast_ref::<MqttError>().map(|e| e.is_version_mismatch()).unwrap_or_default();
            return Err((version_mismatch.then_some(ConnectAckReason::IdentifierRejected), e));
        }
    };

    log::debug!(
        "{} new connection, protocol: {}, client_id: {:?}, clean_session: {}, keep_alive: {}",
        sink.remote_addr,
        c.protocol,
        c.client_id,
        c.clean_session,
        c.keep_alive
    );

    let mut generated = false;
    if c.protocol.is_v31() {
        if !(1..=MAX_CLIENT_ID_LEN_V31).contains(&c.client_id.chars().count()) {
            return Err((Some(ConnectAckReason::IdentifierRejected), MqttError::IdentifierRejected.into()));
        }
    } else if c.client_id.is_empty() {
        if !c.clean_session && !c.protocol.is_legacy_bridge() {
            return Err((Some(ConnectAckReason::IdentifierRejected), MqttError::IdentifierRejected.into()));
        }
        c.client_id = ClientId::from(Uuid::new_v4().as_simple().to_string());
        generated = true;
    }

    if let (Some(username), Some(password)) = (c.username.as_ref(), c.password.as_ref()) {
        if !broker.authorizer.authorize(username, password).await {
            return Err((
                Some(ConnectAckReason::BadUserNameOrPassword),
                MqttError::BadUserNameOrPassword.into(),
            ));
        }
    }

    let no_echo = c.protocol.no_echo();
    if no_echo && sink.cfg.bridge_suffix {
        sink.set_bridge(true);
    }

    let conn_id = broker.next_conn_id();
    let (tx, rx) = mpsc::unbounded_channel();
    let (session, session_present) =
        broker.bind_session(&c.client_id, c.clean_session, conn_id, tx, no_echo).await;
    session.set_will(conn_id, c.last_will.take());

    Ok(SessionState {
        broker: broker.clone(),
        client_id: c.client_id.clone(),
        conn_id,
        session,
        session_present,
        keep_alive: c.keep_alive,
        no_echo,
        archive: !generated,
        rx,
        out_inflight: OutInflight::new(),
        in_inflight: InInflight::default(),
    })
}

/// Per-connection protocol state.
struct SessionState {
    broker: Broker,
    client_id: ClientId,
    conn_id: ConnId,
    session: Arc<Session>,
    session_present: bool,
    keep_alive: u16,
    no_echo: bool,
    /// park the session in the disconnected map on close
    archive: bool,
    rx: Rx,
    out_inflight: OutInflight,
    in_inflight: InInflight,
}

impl SessionState {
    async fn run<Io: Socket>(mut self, mut sink: MqttStream<Io>) -> Result<()> {
        self.broker.stats.connections.inc();
        let reason = match self.connected(&mut sink).await {
            Ok(()) => self.run_loop(&mut sink).await,
            Err(e) => Reason::Error(e),
        };
        self.broker.stats.connections.dec();
        log::info!("{} connection {} closed, reason: {}", self.client_id, self.conn_id, reason);

        match reason {
            // the will already fired and the newer connection owns the session
            Reason::Kicked => self.broker.unbind_session(&self.client_id, self.conn_id, &self.session, false),
            _ => {
                self.broker.unbind_session(&self.client_id, self.conn_id, &self.session, self.archive);
                if reason.is_graceful() {
                    let _ = self.session.take_will(self.conn_id);
                } else {
                    self.fire_will();
                }
            }
        }

        if let Err(e) = sink.close().await {
            log::debug!("{} close failed, {e}", self.client_id);
        }
        match reason {
            Reason::Error(e) => Err(e),
            _ => Ok(()),
        }
    }

    /// CONNACK, then the offline queue and the retained messages of existing subscriptions.
    async fn connected<Io: Socket>(&mut self, sink: &mut MqttStream<Io>) -> Result<()> {
        sink.send_connect_ack(ConnectAckReason::ConnectionAccepted, self.session_present).await?;

        let queued = self.session.queue_len();
        let offlines = self.session.drain_queue(timestamp_millis());
        self.broker.stats.offline_messages.decs(queued as isize);
        if !offlines.is_empty() {
            log::debug!("{} replaying {} offline messages", self.client_id, offlines.len());
        }
        for mut p in offlines {
            if let Some(qos) = self.session.max_qos(&p.topic) {
                p.qos = qos;
                self.deliver(sink, p).await?;
            }
        }

        let subs = self.session.subscriptions();
        self.replay_retained(sink, &subs).await
    }

    async fn run_loop<Io: Socket>(&mut self, sink: &mut MqttStream<Io>) -> Reason {
        let keep_alive = if self.keep_alive == 0 || self.no_echo {
            None
        } else {
            Some(Duration::from_secs_f32(self.keep_alive as f32 * sink.cfg.keepalive_backoff))
        };
        let keep_alive_delay = tokio::time::sleep(keep_alive.unwrap_or(Duration::MAX));
        tokio::pin!(keep_alive_delay);

        loop {
            tokio::select! {
                _ = &mut keep_alive_delay, if keep_alive.is_some() => {
                    log::debug!("{} keepalive timeout", self.client_id);
                    return Reason::KeepaliveTimeout;
                }
                msg = self.rx.recv() => match msg {
                    Some(Message::Forward(p)) => {
                        if let Err(e) = self.deliver(sink, p).await {
                            return Reason::Error(e);
                        }
                    }
                    Some(Message::Kick(ack)) => {
                        self.fire_will();
                        let _ = ack.send(());
                        return Reason::Kicked;
                    }
                    None => return Reason::Error(anyhow!("message channel closed")),
                },
                packet = sink.next() => {
                    if let Some(keep_alive) = keep_alive {
                        keep_alive_delay.as_mut().reset(Instant::now() + keep_alive);
                    }
                    match packet {
                        Some(Ok(packet)) => match self.process_packet(sink, packet).await {
                            Ok(Some(reason)) => return reason,
                            Ok(None) => {}
                            Err(e) => return Reason::Error(e),
                        },
                        Some(Err(e)) => return Reason::Error(e),
                        None => return Reason::RemoteClose,
                    }
                }
            }
        }
    }

    async fn process_packet<Io: Socket>(&mut self, sink: &mut MqttStream<Io>, packet: Packet) -> Result<Option<Reason>> {
        match packet {
            Packet::Publish(p) => self.on_publish(sink, p).await?,
            Packet::PublishAck { packet_id } => {
                if self.out_inflight.remove(packet_id, MomentStatus::UnAck).is_none() {
                    log::debug!("{} PUBACK for unknown packet id {}", self.client_id, packet_id);
                }
            }
            Packet::PublishReceived { packet_id } => {
                if self.out_inflight.update_status(packet_id, MomentStatus::UnReceived, MomentStatus::UnComplete) {
                    sink.send_publish_release(packet_id).await?;
                } else {
                    log::debug!("{} PUBREC for unknown packet id {}", self.client_id, packet_id);
                }
            }
            Packet::PublishRelease { packet_id } => {
                if let Some(p) = self.in_inflight.release(packet_id) {
                    self.forward(p)?;
                }
                sink.send_publish_complete(packet_id).await?;
            }
            Packet::PublishComplete { packet_id } => {
                if self.out_inflight.remove(packet_id, MomentStatus::UnComplete).is_none() {
                    log::debug!("{} PUBCOMP for unknown packet id {}", self.client_id, packet_id);
                }
            }
            Packet::Subscribe { packet_id, topic_filters } => {
                let mut status = Vec::with_capacity(topic_filters.len());
                for (filter, qos) in topic_filters.iter() {
                    self.session.subscribe(filter.clone(), *qos);
                    status.push(SubscribeReturnCode::Success(*qos));
                }
                log::debug!("{} subscribed {:?}", self.client_id, topic_filters);
                sink.send_subscribe_ack(packet_id, status).await?;
                self.replay_retained(sink, &topic_filters).await?;
            }
            Packet::Unsubscribe { packet_id, topic_filters } => {
                for filter in topic_filters.iter() {
                    self.session.unsubscribe(filter);
                }
                sink.send_unsubscribe_ack(packet_id).await?;
            }
            Packet::PingRequest => sink.send_ping_response().await?,
            Packet::Disconnect => return Ok(Some(Reason::Disconnect)),
            other => return Err(MqttError::UnexpectedPacket(other.packet_type()).into()),
        }
        Ok(None)
    }

    async fn on_publish<Io: Socket>(&mut self, sink: &mut MqttStream<Io>, p: Publish) -> Result<()> {
        match p.qos {
            QoS::AtMostOnce => self.forward(p),
            QoS::AtLeastOnce => {
                let packet_id = p.packet_id.ok_or(MqttError::Decode(DecodeError::MalformedPacket))?;
                sink.send_publish_ack(packet_id).await?;
                self.forward(p)
            }
            QoS::ExactlyOnce => {
                let packet_id = p.packet_id.ok_or(MqttError::Decode(DecodeError::MalformedPacket))?;
                self.in_inflight.hold(packet_id, p);
                sink.send_publish_received(packet_id).await
            }
        }
    }

    /// Hands an inbound message to the router.
    #[inline]
    fn forward(&self, mut p: Publish) -> Result<()> {
        p.dup = false;
        p.packet_id = None;
        self.broker.enqueue(Source::Connection(self.conn_id), p)
    }

    /// Sends `p` at its current QoS, tracking it until acknowledged.
    async fn deliver<Io: Socket>(&mut self, sink: &mut MqttStream<Io>, mut p: Publish) -> Result<()> {
        if p.is_expired(timestamp_millis()) {
            log::debug!("{} message expired before delivery, topic: {}", self.client_id, p.topic);
            return Ok(());
        }
        p.dup = false;
        match p.qos {
            QoS::AtMostOnce => p.packet_id = None,
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
        sink.send_publish(p).await
    }

    /// Delivers the retained messages matching `filters`, each topic once, flagged retained.
    async fn replay_retained<Io: Socket>(
        &mut self,
        sink: &mut MqttStream<Io>,
        filters: &[(TopicFilter, QoS)],
    ) -> Result<()> {
        let now = timestamp_millis();
        let mut retaineds: HashMap<TopicName, Publish> = HashMap::default();
        for (filter, _) in filters {
            for p in self.broker.retain.matches(&Topic::from(&filter[..]), now) {
                retaineds.entry(p.topic.clone()).or_insert(p);
            }
        }
        for (_, mut p) in retaineds {
            let Some(qos) = self.session.max_qos(&p.topic) else { continue };
            p.qos = qos;
            p.retain = true;
            self.deliver(sink, p).await?;
        }
        Ok(())
    }

    #[inline]
    fn fire_will(&self) {
        if let Some(will) = self.session.take_will(self.conn_id) {
            log::debug!("{} publishing will, topic: {}", self.client_id, will.topic);
            if let Err(e) = self.broker.enqueue(Source::Connection(self.conn_id), will.to_publish()) {
                log::warn!("{} will dropped, {e}", self.client_id);
            }
        }
    }
}
