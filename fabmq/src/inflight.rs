//! Per-connection QoS 1/2 bookkeeping.
//!
//! Outbound messages wait for PUBACK (QoS 1) or walk PUBREC -> PUBREL -> PUBCOMP
//! (QoS 2). Inbound QoS 2 messages are held until PUBREL releases them. Nothing
//! is retransmitted on timeout.

use std::collections::BTreeMap;
use std::num::NonZeroU16;

use crate::types::{Publish, TimestampMillis};
use fabmq_utils::timestamp_millis;

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum MomentStatus {
    /// QoS 1, waiting for PUBACK
    UnAck,
    /// QoS 2, waiting for PUBREC
    UnReceived,
    /// QoS 2, PUBREL sent, waiting for PUBCOMP
    UnComplete,
}

#[derive(Debug, Clone)]
pub struct OutInflightMessage {
    pub publish: Publish,
    pub status: MomentStatus,
    pub update_time: TimestampMillis,
}

#[derive(Debug)]
pub struct OutInflight {
    next: u16,
    queues: BTreeMap<NonZeroU16, OutInflightMessage>,
}

impl Default for OutInflight {
    fn default() -> Self {
        Self::new()
    }
}

impl OutInflight {
    #[inline]
    pub fn new() -> Self {
        Self { next: 1, queues: BTreeMap::new() }
    }

    /// Next packet id, wrapping from 65535 to 1 and skipping ids still in flight.
    #[inline]
    pub fn next_id(&mut self) -> NonZeroU16 {
        for _ in 0..u16::MAX {
            let id = self.bump();
            if !self.queues.contains_key(&id) {
                return id;
            }
        }
        self.bump()
    }

    #[inline]
    fn bump(&mut self) -> NonZeroU16 {
        let id = NonZeroU16::new(self.next).unwrap_or(NonZeroU16::MIN);
        self.next = if self.next == u16::MAX { 1 } else { self.next + 1 };
        id
    }

    #[inline]
    pub fn push(&mut self, id: NonZeroU16, status: MomentStatus, publish: Publish) {
        self.queues.insert(id, OutInflightMessage { publish, status, update_time: timestamp_millis() });
    }

    /// Moves `id` from `from` to `to`; false when it is unknown or in another state.
    #[inline]
    pub fn update_status(&mut self, id: NonZeroU16, from: MomentStatus, to: MomentStatus) -> bool {
        match self.queues.get_mut(&id) {
            Some(m) if m.status == from => {
                m.status = to;
                m.update_time = timestamp_millis();
                true
            }
            _ => false,
        }
    }

    /// Completes `id` if it is waiting in `status`.
    #[inline]
    pub fn remove(&mut self, id: NonZeroU16, status: MomentStatus) -> Option<OutInflightMessage> {
        if self.queues.get(&id).map(|m| m.status == status).unwrap_or(false) {
            self.queues.remove(&id)
        } else {
            None
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

/// Inbound QoS 2 messages awaiting PUBREL.
#[derive(Debug, Default)]
pub struct InInflight {
    queues: BTreeMap<NonZeroU16, Publish>,
}

impl InInflight {
    /// Holds `publish`; a re-sent PUBLISH with the same id replaces the held copy.
    #[inline]
    pub fn hold(&mut self, id: NonZeroU16, publish: Publish) {
        self.queues.insert(id, publish);
    }

    #[inline]
    pub fn release(&mut self, id: NonZeroU16) -> Option<Publish> {
        self.queues.remove(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
