use std::collections::VecDeque;

use parking_lot::{Mutex, RwLock};

use crate::topic::Topic;
use crate::types::{ClientId, ConnId, HashMap, LastWill, Publish, QoS, TimestampMillis, TopicFilter};

#[derive(Debug, Clone)]
pub struct Subscription {
    pub topic: Topic,
    pub qos: QoS,
}

/// Client state that outlives a single connection: subscriptions, the offline
/// queue and the will.
///
/// Shared between the owning connection and the routing worker.
#[derive(Debug)]
pub struct Session {
    pub id: ClientId,
    subs: RwLock<HashMap<TopicFilter, Subscription>>,
    queue: Mutex<VecDeque<Publish>>,
    /// will and the connection that registered it
    will: RwLock<Option<(ConnId, LastWill)>>,
    max_queue: usize,
}

impl Session {
    #[inline]
    pub fn new(id: ClientId, max_queue: usize) -> Self {
        Self {
            id,
            subs: RwLock::new(HashMap::default()),
            queue: Mutex::new(VecDeque::new()),
            will: RwLock::new(None),
            max_queue,
        }
    }

    /// Adds or replaces the subscription for `filter`. Returns the previous QoS.
    #[inline]
    pub fn subscribe(&self, filter: TopicFilter, qos: QoS) -> Option<QoS> {
        let topic = Topic::from(&filter[..]);
        self.subs.write().insert(filter, Subscription { topic, qos }).map(|s| s.qos)
    }

    #[inline]
    pub fn unsubscribe(&self, filter: &str) -> bool {
        self.subs.write().remove(filter).is_some()
    }

    /// Highest QoS among the subscriptions matching `topic`.
    #[inline]
    pub fn max_qos(&self, topic: &str) -> Option<QoS> {
        self.subs.read().values().filter(|s| s.topic.matches_str(topic)).map(|s| s.qos).max()
    }

    /// Wildcard-free subscriptions selected by `filter`.
    #[inline]
    pub fn exact_matches(&self, filter: &Topic) -> Vec<TopicFilter> {
        self.subs
            .read()
            .iter()
            .filter(|(f, s)| !s.topic.has_wildcard() && filter.matches_str(f))
            .map(|(f, _)| f.clone())
            .collect()
    }

    #[inline]
    pub fn subscriptions(&self) -> Vec<(TopicFilter, QoS)> {
        self.subs.read().iter().map(|(f, s)| (f.clone(), s.qos)).collect()
    }

    #[inline]
    pub fn subscriptions_len(&self) -> usize {
        self.subs.read().len()
    }

    #[inline]
    pub fn set_will(&self, conn_id: ConnId, will: Option<LastWill>) {
        *self.will.write() = will.map(|w| (conn_id, w));
    }

    /// Takes the will if `conn_id` registered it. A newer connection's will is left alone.
    #[inline]
    pub fn take_will(&self, conn_id: ConnId) -> Option<LastWill> {
        let mut will = self.will.write();
        if matches!(will.as_ref(), Some((owner, _)) if *owner == conn_id) {
            will.take().map(|(_, w)| w)
        } else {
            None
        }
    }

    /// Appends to the offline queue. When the queue is full the oldest entry is
    /// dropped and returned.
    #[inline]
    pub fn enqueue(&self, p: Publish) -> Option<Publish> {
        let mut queue = self.queue.lock();
        let dropped = if self.max_queue > 0 && queue.len() >= self.max_queue { queue.pop_front() } else { None };
        queue.push_back(p);
        dropped
    }

    /// Empties the offline queue, discarding entries expired at `now`.
    #[inline]
    pub fn drain_queue(&self, now: TimestampMillis) -> Vec<Publish> {
        let queue = std::mem::take(&mut *self.queue.lock());
        queue.into_iter().filter(|p| !p.is_expired(now)).collect()
    }

    #[inline]
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }
}
