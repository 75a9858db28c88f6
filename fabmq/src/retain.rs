//! Retained messages, one map for node-local topics and one for cluster-wide
//! topics. Keys are normalized topic names, so `a//b` and `a/b` share an entry.

use dashmap::DashMap;

use crate::topic::{is_cluster_wide, Topic};
use crate::types::{Publish, TimestampMillis, TopicName};

pub struct RetainStore {
    local: DashMap<TopicName, Publish>,
    cluster: DashMap<TopicName, Publish>,
    max: usize,
}

impl RetainStore {
    /// `max` caps the number of topics per map, 0 is unbounded.
    #[inline]
    pub fn new(max: usize) -> Self {
        Self { local: DashMap::default(), cluster: DashMap::default(), max }
    }

    #[inline]
    fn map(&self, topic: &str) -> &DashMap<TopicName, Publish> {
        if is_cluster_wide(topic) {
            &self.cluster
        } else {
            &self.local
        }
    }

    #[inline]
    fn key(topic: &str) -> TopicName {
        TopicName::from(Topic::from(topic).to_string())
    }

    /// Stores `p` as the retained value of its topic, or deletes it when the payload is empty.
    /// Returns false when a new topic is refused because the map is full.
    pub fn set(&self, p: &Publish) -> bool {
        let map = self.map(&p.topic);
        let key = Self::key(&p.topic);
        if p.payload.is_empty() {
            map.remove(&key);
            return true;
        }
        if self.max > 0 && map.len() >= self.max && !map.contains_key(&key) {
            log::warn!("retained message store is full ({}), topic {} is not retained", self.max, p.topic);
            return false;
        }
        map.insert(key, p.clone());
        true
    }

    /// Retained value for `topic`, if present and not expired at `now`.
    #[inline]
    pub fn get(&self, topic: &str, now: TimestampMillis) -> Option<Publish> {
        self.map(topic).get(&Self::key(topic)).map(|p| p.value().clone()).filter(|p| !p.is_expired(now))
    }

    /// Non-expired retained messages whose topic matches `filter`, from both maps.
    pub fn matches(&self, filter: &Topic, now: TimestampMillis) -> Vec<Publish> {
        self.local
            .iter()
            .chain(self.cluster.iter())
            .filter(|e| !e.value().is_expired(now) && filter.matches_str(e.key()))
            .map(|e| e.value().clone())
            .collect()
    }

    #[inline]
    pub fn remove_expired_local(&self, now: TimestampMillis) -> usize {
        Self::remove_expired(&self.local, now)
    }

    #[inline]
    pub fn remove_expired_cluster(&self, now: TimestampMillis) -> usize {
        Self::remove_expired(&self.cluster, now)
    }

    fn remove_expired(map: &DashMap<TopicName, Publish>, now: TimestampMillis) -> usize {
        let before = map.len();
        map.retain(|_, p| !p.is_expired(now));
        before.saturating_sub(map.len())
    }

    /// Clears the node-local map; cluster-wide entries are untouched.
    #[inline]
    pub fn purge(&self) {
        self.local.clear();
    }

    #[inline]
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    #[inline]
    pub fn cluster_len(&self) -> usize {
        self.cluster.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use fabmq_codec::QoS;

    fn retained(topic: &str, payload: &'static [u8]) -> Publish {
        Publish::new(topic, Bytes::from_static(payload), QoS::AtMostOnce, true)
    }

    #[test]
    fn test_set_and_delete() {
        let store = RetainStore::new(0);
        assert!(store.set(&retained("x", b"P")));
        assert_eq!(store.get("x", 0).map(|p| p.payload), Some(Bytes::from_static(b"P")));
        assert_eq!(store.get("/x/", 0).map(|p| p.payload), Some(Bytes::from_static(b"P")));
        assert!(store.set(&retained("x", b"")));
        assert!(store.get("x", 0).is_none());
        assert_eq!(store.local_len(), 0);
    }

    #[test]
    fn test_cluster_and_local_maps() {
        let store = RetainStore::new(0);
        store.set(&retained("|g/a", b"1"));
        store.set(&retained("a/b", b"2"));
        assert_eq!(store.cluster_len(), 1);
        assert_eq!(store.local_len(), 1);

        store.purge();
        assert_eq!(store.local_len(), 0);
        assert!(store.get("|g/a", 0).is_some());
        assert_eq!(store.matches(&Topic::from("#"), 0).len(), 1);
    }

    #[test]
    fn test_expiry() {
        let store = RetainStore::new(0);
        let mut p = retained("a/b", b"1");
        p.expiry = 100;
        store.set(&p);
        let mut c = retained("b/|c", b"2");
        c.expiry = 100;
        store.set(&c);

        assert!(store.get("a/b", 100).is_some());
        assert!(store.get("a/b", 101).is_none());
        assert!(store.matches(&Topic::from("a/+"), 101).is_empty());
        assert_eq!(store.remove_expired_local(101), 1);
        assert_eq!(store.cluster_len(), 1);
        assert_eq!(store.remove_expired_cluster(101), 1);
        assert_eq!(store.cluster_len(), 0);
    }

    #[test]
    fn test_cap() {
        let store = RetainStore::new(1);
        assert!(store.set(&retained("a", b"1")));
        assert!(!store.set(&retained("b", b"1")));
        assert!(store.set(&retained("a", b"2")));
        assert!(store.set(&retained("|b", b"1")));
        assert_eq!(store.get("a", 0).map(|p| p.payload), Some(Bytes::from_static(b"2")));
    }
}
