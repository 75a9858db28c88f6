//! Opaque inter-node byte channels.
//!
//! The broker only needs fire-and-forget publish and a per-channel handler. A
//! publish reaches every subscriber of the channel, including the publishing
//! node itself; loop suppression is the broker's job.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::Result;

pub type BusHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

#[async_trait]
pub trait ClusterBus: Sync + Send {
    async fn publish(&self, channel: &str, data: Bytes) -> Result<()>;

    async fn subscribe(&self, channel: &str, handler: BusHandler) -> Result<()>;
}

/// In-process bus; clones share one channel, so several brokers in one process form a cluster.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<(String, Bytes)>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl ClusterBus for LocalBus {
    async fn publish(&self, channel: &str, data: Bytes) -> Result<()> {
        // no receivers yet is not an error for a broadcast medium
        let _ = self.tx.send((channel.to_owned(), data));
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: BusHandler) -> Result<()> {
        let mut rx = self.tx.subscribe();
        let channel = channel.to_owned();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok((ch, data)) => {
                        if ch == channel {
                            handler(data);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("cluster bus channel {} lagged, {} messages skipped", channel, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_local_bus() {
        let bus = LocalBus::default();
        let got = Arc::new(Mutex::new(Vec::new()));
        let got1 = got.clone();
        bus.subscribe("c1", Arc::new(move |d| got1.lock().push(d))).await.unwrap();

        bus.clone().publish("c1", Bytes::from_static(b"a")).await.unwrap();
        bus.publish("c2", Bytes::from_static(b"b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*got.lock(), vec![Bytes::from_static(b"a")]);
    }
}
