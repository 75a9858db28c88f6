//! Routing core.
//!
//! Connections and the API hand messages to two single-consumer workers, one
//! for ordinary publishes and one for broadcasts, so neither kind of traffic can
//! starve the other and a decode loop never waits on fan-out.
//!
//! For one publish the worker, in order: drops it if expired, pushes
//! cluster-wide topics to the bus (stamped with this node as origin), updates
//! the retained store, then delivers to internal subscribers, to connected
//! sessions at their highest matching QoS and, for non-retained messages, to
//! the offline queues of disconnected sessions.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use fabmq_codec::{decode_bridged, encode_bridged};
use fabmq_conf::Mqtt;
use fabmq_utils::timestamp_millis;

use crate::auth::{AllowAll, Authorizer};
use crate::cluster::{BusHandler, ClusterBus};
use crate::retain::RetainStore;
use crate::session::Session;
use crate::stats::Stats;
use crate::topic::{is_cluster_wide, Topic};
use crate::types::{
    ClientId, ConnId, Message, NodeId, Publish, QoS, Source, TimestampMillis, TopicFilter, TopicName, Tx,
    CLUSTER_CHANNEL,
};
use crate::Result;

pub type Callback = Arc<dyn Fn(&Publish) -> anyhow::Result<()> + Send + Sync>;

/// A non-protocol consumer of routed messages.
#[derive(Clone)]
pub enum Subscriber {
    /// Named channel hand-off
    Endpoint(String, mpsc::UnboundedSender<Publish>),
    Callback(Callback),
}

impl Subscriber {
    pub fn endpoint<N: Into<String>>(name: N) -> (Self, mpsc::UnboundedReceiver<Publish>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Subscriber::Endpoint(name.into(), tx), rx)
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&Publish) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Subscriber::Callback(Arc::new(f))
    }

    /// Endpoints are identified by name, callbacks by identity.
    #[inline]
    fn same(&self, other: &Subscriber) -> bool {
        match (self, other) {
            (Subscriber::Endpoint(a, _), Subscriber::Endpoint(b, _)) => a == b,
            (Subscriber::Callback(a), Subscriber::Callback(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    #[inline]
    fn deliver(&self, p: Publish) -> anyhow::Result<()> {
        match self {
            Subscriber::Endpoint(name, tx) => tx.send(p).map_err(|_| anyhow!("endpoint {} is closed", name)),
            Subscriber::Callback(f) => f(&p),
        }
    }
}

struct Internal {
    filter: TopicFilter,
    topic: Topic,
    subscriber: Subscriber,
}

pub(crate) struct Connected {
    pub(crate) conn_id: ConnId,
    pub(crate) tx: Tx,
    pub(crate) session: Arc<Session>,
    pub(crate) no_echo: bool,
}

pub struct BrokerBuilder {
    node_id: NodeId,
    settings: Mqtt,
    authorizer: Arc<dyn Authorizer>,
    bus: Option<Arc<dyn ClusterBus>>,
}

impl BrokerBuilder {
    pub fn new(node_id: NodeId) -> Self {
        Self { node_id, settings: Mqtt::default(), authorizer: Arc::new(AllowAll), bus: None }
    }

    pub fn settings(mut self, settings: Mqtt) -> Self {
        self.settings = settings;
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn cluster_bus(mut self, bus: Arc<dyn ClusterBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Starts the workers, the retained sweeps and, with a bus, the bus handler and node announce.
    pub async fn build(self) -> Result<Broker> {
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(BrokerInner {
            node_id: self.node_id,
            retain: RetainStore::new(self.settings.max_retained),
            settings: self.settings,
            authorizer: self.authorizer,
            bus: self.bus,
            connected: DashMap::default(),
            disconnected: DashMap::default(),
            internals: RwLock::new(Vec::new()),
            stats: Stats::default(),
            publish_tx,
            broadcast_tx,
            conn_ids: AtomicU64::new(1),
            started: timestamp_millis(),
        });
        let broker = Broker { inner };
        broker.start(publish_rx, broadcast_rx).await?;
        log::info!("broker {} started", broker.node_id);
        Ok(broker)
    }
}

#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Deref for Broker {
    type Target = BrokerInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl Broker {
    async fn start(
        &self,
        mut publish_rx: mpsc::UnboundedReceiver<(Source, Publish)>,
        mut broadcast_rx: mpsc::UnboundedReceiver<Publish>,
    ) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some((source, p)) = publish_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.route(source, p).await;
            }
            log::debug!("publish worker exit");
        });

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(p) = broadcast_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.route_broadcast(p);
            }
            log::debug!("broadcast worker exit");
        });

        spawn_sweep(Arc::downgrade(&self.inner), self.settings.retain_sweep_interval, false);
        spawn_sweep(Arc::downgrade(&self.inner), self.settings.retain_cluster_sweep_interval, true);

        if let Some(bus) = self.bus.as_ref() {
            let weak = Arc::downgrade(&self.inner);
            let handler: BusHandler = Arc::new(move |data: Bytes| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_cluster_message(data);
                }
            });
            bus.subscribe(CLUSTER_CHANNEL, handler).await?;

            if !self.settings.announce_interval.is_zero() {
                spawn_announce(Arc::downgrade(&self.inner), self.settings.announce_interval);
            }
        }
        Ok(())
    }
}

pub struct BrokerInner {
    pub node_id: NodeId,
    pub settings: Mqtt,
    pub authorizer: Arc<dyn Authorizer>,
    bus: Option<Arc<dyn ClusterBus>>,
    pub(crate) connected: DashMap<ClientId, Connected>,
    pub(crate) disconnected: DashMap<ClientId, Arc<Session>>,
    internals: RwLock<Vec<Internal>>,
    pub retain: RetainStore,
    pub stats: Stats,
    publish_tx: mpsc::UnboundedSender<(Source, Publish)>,
    broadcast_tx: mpsc::UnboundedSender<Publish>,
    conn_ids: AtomicU64,
    started: TimestampMillis,
}

impl BrokerInner {
    /// Full pipeline: retained update, fan-out and offline queueing.
    /// With `ttl` the message expires `ttl` from now.
    pub fn publish<T>(&self, topic: T, payload: Bytes, qos: QoS, retain: bool, ttl: Option<Duration>) -> Result<()>
    where
        TopicName: From<T>,
    {
        let mut p = Publish::new(topic, payload, qos, retain);
        if let Some(ttl) = ttl {
            p.expiry = timestamp_millis() + ttl.as_millis() as TimestampMillis;
        }
        self.enqueue(Source::Api, p)
    }

    /// Fan-out only. `filter` selects subscriptions without wildcards; each
    /// receives the message at QoS 0 under its own topic. Never stored or queued.
    pub fn broadcast<T>(&self, filter: T, payload: Bytes, qos: QoS, retain: bool) -> Result<()>
    where
        TopicName: From<T>,
    {
        let p = Publish::new(filter, payload, qos, retain);
        self.broadcast_tx.send(p).map_err(|_| anyhow!("broadcast worker is closed"))
    }

    #[inline]
    pub(crate) fn enqueue(&self, source: Source, p: Publish) -> Result<()> {
        self.publish_tx.send((source, p)).map_err(|_| anyhow!("publish worker is closed"))
    }

    /// Registers an internal subscriber; subscribing the same one to the same filter twice is a no-op.
    pub fn subscribe(&self, filter: &str, subscriber: Subscriber) {
        let mut internals = self.internals.write();
        if internals.iter().any(|i| i.filter == filter && i.subscriber.same(&subscriber)) {
            return;
        }
        internals.push(Internal { filter: TopicFilter::from(filter), topic: Topic::from(filter), subscriber });
    }

    pub fn unsubscribe(&self, filter: &str, subscriber: &Subscriber) -> bool {
        let mut internals = self.internals.write();
        let before = internals.len();
        internals.retain(|i| !(i.filter == filter && i.subscriber.same(subscriber)));
        before != internals.len()
    }

    /// Current retained message for `topic`.
    #[inline]
    pub fn peek(&self, topic: &str) -> Option<Publish> {
        self.retain.get(topic, timestamp_millis())
    }

    /// Drops every node-local retained message.
    #[inline]
    pub fn purge(&self) {
        self.retain.purge();
    }

    #[inline]
    pub fn is_connected(&self, client_id: &str) -> bool {
        self.connected.contains_key(client_id)
    }

    /// Session of a connected or disconnected client.
    #[inline]
    pub fn session(&self, client_id: &str) -> Option<Arc<Session>> {
        self.connected
            .get(client_id)
            .map(|c| c.session.clone())
            .or_else(|| self.disconnected.get(client_id).map(|s| s.value().clone()))
    }

    #[inline]
    pub fn connected_len(&self) -> usize {
        self.connected.len()
    }

    #[inline]
    pub fn disconnected_len(&self) -> usize {
        self.disconnected.len()
    }

    pub fn stats(&self) -> serde_json::Value {
        json!({
            "node": self.node_id.to_string(),
            "uptime": timestamp_millis() - self.started,
            "connected": self.connected.len(),
            "disconnected": self.disconnected.len(),
            "retained": {
                "local": self.retain.local_len(),
                "cluster": self.retain.cluster_len(),
            },
            "counters": self.stats.to_json(),
        })
    }

    #[inline]
    pub(crate) fn next_conn_id(&self) -> ConnId {
        self.conn_ids.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers a new connection for `client_id`, evicting a live one first.
    /// Returns the session and whether it was resumed.
    pub(crate) async fn bind_session(
        &self,
        client_id: &ClientId,
        clean_session: bool,
        conn_id: ConnId,
        tx: Tx,
        no_echo: bool,
    ) -> (Arc<Session>, bool) {
        let old = self.connected.get(client_id).map(|c| (c.conn_id, c.tx.clone(), c.session.clone()));
        let prior = if let Some((old_conn_id, old_tx, old_session)) = old {
            log::info!("{} is already connected on connection {}, kicking it", client_id, old_conn_id);
            let (ack_tx, ack_rx) = oneshot::channel();
            if old_tx.send(Message::Kick(ack_tx)).is_ok() {
                match tokio::time::timeout(self.settings.kick_timeout, ack_rx).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => log::debug!("{} connection {} closed before kick ack", client_id, old_conn_id),
                    Err(_) => log::warn!("{} kick of connection {} timed out", client_id, old_conn_id),
                }
            }
            self.connected.remove_if(client_id, |_, c| c.conn_id == old_conn_id);
            // it may have parked its session before the kick arrived
            if self.disconnected.remove(client_id).is_some() {
                self.stats.sessions.dec();
            }
            Some(old_session)
        } else {
            self.disconnected.remove(client_id).map(|(_, s)| {
                self.stats.sessions.dec();
                s
            })
        };

        let (session, present) = match prior {
            Some(s) if !clean_session => (s, true),
            prior => {
                if let Some(s) = prior {
                    self.stats.offline_messages.decs(s.queue_len() as isize);
                }
                (Arc::new(Session::new(client_id.clone(), self.settings.max_offline_queue)), false)
            }
        };
        self.connected.insert(client_id.clone(), Connected { conn_id, tx, session: session.clone(), no_echo });
        (session, present)
    }

    /// Drops the live entry of `conn_id`, parking the session when `archive` is set.
    /// A connection that was already replaced leaves the newer entry alone.
    pub(crate) fn unbind_session(&self, client_id: &ClientId, conn_id: ConnId, session: &Arc<Session>, archive: bool) {
        let removed = self.connected.remove_if(client_id, |_, c| c.conn_id == conn_id).is_some();
        if removed && archive && self.disconnected.insert(client_id.clone(), session.clone()).is_none() {
            self.stats.sessions.inc();
        }
    }

    fn on_cluster_message(&self, data: Bytes) {
        match decode_bridged(&data) {
            Ok(p) if p.origin == Some(self.node_id) => {
                log::trace!("drop own cluster message, topic: {}", p.topic);
            }
            Ok(p) => {
                if let Err(e) = self.enqueue(Source::Cluster, p) {
                    log::warn!("cluster message dropped, {e}");
                }
            }
            Err(e) => log::warn!("malformed cluster message, {e:?}"),
        }
    }

    async fn route(&self, source: Source, mut p: Publish) {
        let now = timestamp_millis();
        if p.is_expired(now) {
            log::debug!("message expired before routing, topic: {}", p.topic);
            self.stats.expired.inc();
            return;
        }

        if p.origin.is_none() && is_cluster_wide(&p.topic) {
            if let Some(bus) = self.bus.as_ref() {
                p.origin = Some(self.node_id);
                match encode_bridged(&p) {
                    Ok(data) => {
                        if let Err(e) = bus.publish(CLUSTER_CHANNEL, data).await {
                            log::warn!("cluster publish failed, topic: {}, {e}", p.topic);
                        }
                    }
                    Err(e) => log::warn!("cluster encode failed, topic: {}, {e:?}", p.topic),
                }
            }
        }

        self.stats.publishes.inc();
        if p.retain {
            self.retain.set(&p);
        }
        self.deliver_internal(&p);
        self.deliver_connected(source, &p);
        if !p.retain {
            self.deliver_disconnected(&p);
        }
    }

    /// The broadcast topic is a filter over concrete subscriptions.
    fn route_broadcast(&self, p: Publish) {
        self.stats.broadcasts.inc();
        let filter = Topic::from(&p.topic[..]);

        let targets = self
            .internals
            .read()
            .iter()
            .filter(|i| !i.topic.has_wildcard() && filter.matches_str(&i.filter))
            .map(|i| (i.filter.clone(), i.subscriber.clone()))
            .collect::<Vec<_>>();
        for (topic, s) in targets {
            self.deliver_to_internal(s, broadcast_copy(&p, topic));
        }

        for entry in self.connected.iter() {
            let c = entry.value();
            for topic in c.session.exact_matches(&filter) {
                if c.tx.send(Message::Forward(broadcast_copy(&p, topic))).is_err() {
                    log::debug!("{} connection {} is closed, broadcast dropped", entry.key(), c.conn_id);
                    break;
                }
            }
        }
    }

    fn deliver_internal(&self, p: &Publish) {
        let targets = self
            .internals
            .read()
            .iter()
            .filter(|i| i.topic.matches_str(&p.topic))
            .map(|i| i.subscriber.clone())
            .collect::<Vec<_>>();
        for s in targets {
            let mut out = p.clone();
            out.qos = QoS::ExactlyOnce;
            self.deliver_to_internal(s, out);
        }
    }

    fn deliver_to_internal(&self, s: Subscriber, p: Publish) {
        let topic = p.topic.clone();
        if let Err(e) = s.deliver(p) {
            self.stats.internal_errors.inc();
            log::warn!("internal subscriber failed, topic: {}, {e}", topic);
        }
    }

    fn deliver_connected(&self, source: Source, p: &Publish) {
        for entry in self.connected.iter() {
            let c = entry.value();
            if c.no_echo && source == Source::Connection(c.conn_id) {
                continue;
            }
            let Some(qos) = c.session.max_qos(&p.topic) else { continue };
            let mut out = p.clone();
            out.qos = qos;
            out.dup = false;
            out.packet_id = None;
            if c.tx.send(Message::Forward(out)).is_err() {
                log::debug!("{} connection {} is closed, message dropped", entry.key(), c.conn_id);
            }
        }
    }

    fn deliver_disconnected(&self, p: &Publish) {
        for entry in self.disconnected.iter() {
            let s = entry.value();
            let Some(qos) = s.max_qos(&p.topic) else { continue };
            let mut out = p.clone();
            out.qos = qos;
            out.dup = false;
            out.packet_id = None;
            self.stats.offline_messages.inc();
            if let Some(dropped) = s.enqueue(out) {
                self.stats.offline_messages.dec();
                self.stats.offline_dropped.inc();
                log::warn!("{} offline queue is full, oldest message dropped, topic: {}", s.id, dropped.topic);
            }
        }
    }

    fn announcement(&self) -> serde_json::Value {
        json!({
            "node": self.node_id.to_string(),
            "uptime": timestamp_millis() - self.started,
            "connections": self.connected.len(),
            "sessions": self.disconnected.len(),
            "retained": self.retain.local_len() + self.retain.cluster_len(),
        })
    }
}

#[inline]
fn broadcast_copy(p: &Publish, topic: TopicName) -> Publish {
    let mut out = p.clone();
    out.topic = topic;
    out.qos = QoS::AtMostOnce;
    out.dup = false;
    out.packet_id = None;
    out
}

fn spawn_sweep(weak: Weak<BrokerInner>, interval: Duration, cluster: bool) {
    if interval.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            let now = timestamp_millis();
            let removed = if cluster {
                inner.retain.remove_expired_cluster(now)
            } else {
                inner.retain.remove_expired_local(now)
            };
            if removed > 0 {
                log::debug!("removed {} expired retained messages, cluster: {}", removed, cluster);
            }
        }
    });
}

fn spawn_announce(weak: Weak<BrokerInner>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            let topic = format!("$SYS/brokers/{}/|announce", inner.node_id);
            let payload = Bytes::from(inner.announcement().to_string());
            let ttl = inner.settings.announce_ttl;
            if let Err(e) = inner.publish(topic, payload, QoS::ExactlyOnce, false, Some(ttl)) {
                log::warn!("node announce failed, {e}");
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalBus;

    async fn broker() -> Broker {
        BrokerBuilder::new(NodeId::new_v4()).build().await.unwrap()
    }

    /// Waits until everything published before it has been routed.
    async fn settle(broker: &Broker) {
        let (s, mut rx) = Subscriber::endpoint("settle");
        broker.subscribe("$settle", s.clone());
        broker.publish("$settle", Bytes::new(), QoS::AtMostOnce, false, None).unwrap();
        rx.recv().await.unwrap();
        broker.unsubscribe("$settle", &s);
    }

    #[tokio::test]
    async fn test_retained_round_trip() {
        let broker = broker().await;
        broker.publish("x", Bytes::from_static(b"P"), QoS::AtMostOnce, true, None).unwrap();
        settle(&broker).await;
        assert_eq!(broker.peek("x").map(|p| p.payload), Some(Bytes::from_static(b"P")));

        broker.publish("x", Bytes::new(), QoS::AtMostOnce, true, None).unwrap();
        settle(&broker).await;
        assert!(broker.peek("x").is_none());
    }

    #[tokio::test]
    async fn test_purge_keeps_cluster_entries() {
        let broker = broker().await;
        broker.publish("a", Bytes::from_static(b"1"), QoS::AtMostOnce, true, None).unwrap();
        broker.publish("|g/a", Bytes::from_static(b"2"), QoS::AtMostOnce, true, None).unwrap();
        settle(&broker).await;
        broker.purge();
        assert!(broker.peek("a").is_none());
        assert!(broker.peek("|g/a").is_some());
    }

    #[tokio::test]
    async fn test_ttl() {
        let broker = broker().await;
        broker.publish("t", Bytes::from_static(b"1"), QoS::AtMostOnce, true, Some(Duration::from_millis(300))).unwrap();
        settle(&broker).await;
        assert!(broker.peek("t").is_some());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(broker.peek("t").is_none());
    }

    #[tokio::test]
    async fn test_internal_subscribers() {
        let broker = broker().await;
        let (ep, mut rx) = Subscriber::endpoint("ep");
        broker.subscribe("a/+", ep.clone());
        broker.subscribe("a/+", ep.clone());
        let failing = Subscriber::callback(|_p| Err(anyhow!("boom")));
        broker.subscribe("a/#", failing.clone());

        broker.publish("a/b", Bytes::from_static(b"1"), QoS::AtMostOnce, false, None).unwrap();
        let p = rx.recv().await.unwrap();
        assert_eq!(p.topic, "a/b");
        assert_eq!(p.qos, QoS::ExactlyOnce);
        settle(&broker).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.stats.internal_errors.count(), 1);

        assert!(broker.unsubscribe("a/+", &ep));
        assert!(broker.unsubscribe("a/#", &failing));
        assert!(!broker.unsubscribe("a/#", &failing));
    }

    #[tokio::test]
    async fn test_broadcast() {
        let broker = broker().await;
        let (ab, mut ab_rx) = Subscriber::endpoint("ab");
        let (ac, mut ac_rx) = Subscriber::endpoint("ac");
        let (wild, mut wild_rx) = Subscriber::endpoint("wild");
        let (other, mut other_rx) = Subscriber::endpoint("other");
        broker.subscribe("a/b", ab);
        broker.subscribe("a/c", ac);
        broker.subscribe("a/+", wild);
        broker.subscribe("x/y", other);

        broker.broadcast("a/+", Bytes::from_static(b"1"), QoS::ExactlyOnce, true).unwrap();
        let p = ab_rx.recv().await.unwrap();
        assert_eq!(p.topic, "a/b");
        assert_eq!(p.qos, QoS::AtMostOnce);
        assert!(p.retain);
        assert_eq!(p.payload, Bytes::from_static(b"1"));
        assert_eq!(ac_rx.recv().await.unwrap().topic, "a/c");

        broker.broadcast("x/y", Bytes::from_static(b"2"), QoS::AtMostOnce, false).unwrap();
        assert_eq!(other_rx.recv().await.unwrap().topic, "x/y");
        assert!(wild_rx.try_recv().is_err());
        assert!(ab_rx.try_recv().is_err());

        settle(&broker).await;
        assert!(broker.peek("a/b").is_none());
        assert!(broker.peek("a/+").is_none());
        assert_eq!(broker.stats.broadcasts.count(), 2);
    }

    #[tokio::test]
    async fn test_offline_queue() {
        let broker = broker().await;
        let session = Arc::new(Session::new("c1".into(), 2));
        session.subscribe("a/#".into(), QoS::AtLeastOnce);
        broker.disconnected.insert("c1".into(), session.clone());

        broker.publish("a/b", Bytes::from_static(b"1"), QoS::AtMostOnce, false, None).unwrap();
        broker.publish("a/r", Bytes::from_static(b"r"), QoS::AtMostOnce, true, None).unwrap();
        broker.publish("b", Bytes::from_static(b"x"), QoS::AtMostOnce, false, None).unwrap();
        settle(&broker).await;
        assert_eq!(session.queue_len(), 1);

        broker.publish("a/c", Bytes::from_static(b"2"), QoS::AtMostOnce, false, None).unwrap();
        broker.publish("a/d", Bytes::from_static(b"3"), QoS::AtMostOnce, false, None).unwrap();
        settle(&broker).await;
        let queued = session.drain_queue(timestamp_millis());
        assert_eq!(queued.iter().map(|p| p.topic.to_string()).collect::<Vec<_>>(), vec!["a/c", "a/d"]);
        assert_eq!(queued[0].qos, QoS::AtLeastOnce);
        assert_eq!(broker.stats.offline_dropped.count(), 1);
    }

    #[tokio::test]
    async fn test_expired_not_routed() {
        let broker = broker().await;
        let (ep, mut rx) = Subscriber::endpoint("ep");
        broker.subscribe("#", ep);
        let mut p = Publish::new("old", Bytes::from_static(b"1"), QoS::AtMostOnce, false);
        p.expiry = 1;
        broker.enqueue(Source::Api, p).unwrap();
        broker.publish("new", Bytes::from_static(b"2"), QoS::AtMostOnce, false, None).unwrap();
        assert_eq!(rx.recv().await.unwrap().topic, "new");
        assert_eq!(broker.stats.expired.count(), 1);
    }

    #[tokio::test]
    async fn test_cluster_fan_out() {
        let bus = Arc::new(LocalBus::default());
        let a = BrokerBuilder::new(NodeId::new_v4()).cluster_bus(bus.clone()).build().await.unwrap();
        let b = BrokerBuilder::new(NodeId::new_v4()).cluster_bus(bus.clone()).build().await.unwrap();
        let (ea, mut rx_a) = Subscriber::endpoint("a");
        let (eb, mut rx_b) = Subscriber::endpoint("b");
        a.subscribe("|g/#", ea);
        b.subscribe("|g/#", eb);

        a.publish("|g/t", Bytes::from_static(b"hello"), QoS::AtLeastOnce, true, None).unwrap();

        let got = rx_b.recv().await.unwrap();
        assert_eq!(got.payload, Bytes::from_static(b"hello"));
        assert_eq!(got.origin, Some(a.node_id));
        assert_eq!(rx_a.recv().await.unwrap().origin, Some(a.node_id));

        // the copy echoed back to `a` by the bus must not be delivered again
        tokio::time::sleep(Duration::from_millis(100)).await;
        settle(&a).await;
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());

        settle(&b).await;
        assert!(b.peek("|g/t").is_some());
        assert!(a.peek("|g/t").is_some());
    }

    #[tokio::test]
    async fn test_own_origin_suppressed() {
        let bus = Arc::new(LocalBus::default());
        let a = BrokerBuilder::new(NodeId::new_v4()).cluster_bus(bus.clone()).build().await.unwrap();
        let (ea, mut rx_a) = Subscriber::endpoint("a");
        a.subscribe("|g/#", ea);

        let mut own = Publish::new("|g/own", Bytes::from_static(b"1"), QoS::AtMostOnce, false);
        own.origin = Some(a.node_id);
        bus.publish(CLUSTER_CHANNEL, encode_bridged(&own).unwrap()).await.unwrap();

        let mut foreign = Publish::new("|g/foreign", Bytes::from_static(b"2"), QoS::AtMostOnce, false);
        foreign.origin = Some(NodeId::new_v4());
        bus.publish(CLUSTER_CHANNEL, encode_bridged(&foreign).unwrap()).await.unwrap();

        assert_eq!(rx_a.recv().await.unwrap().topic, "|g/foreign");
        settle(&a).await;
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stats() {
        let broker = broker().await;
        broker.publish("a", Bytes::from_static(b"1"), QoS::AtMostOnce, true, None).unwrap();
        settle(&broker).await;
        let stats = broker.stats();
        assert_eq!(stats["retained"]["local"], 1);
        assert_eq!(stats["connected"], 0);
        assert!(stats["counters"]["publishes"].as_i64().unwrap() >= 1);
    }
}
