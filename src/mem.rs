//! In-process gossip mesh.
//!
//! [`MemNet`] is a topic-name-keyed message bus over tokio broadcast
//! channels. Hosts created from the same net see each other's publishes,
//! including their own (loopback), which matches how a real gossip router
//! delivers a host's messages back to its local subscriptions.
//!
//! This exists for tests and demos; it performs no signing, no peer
//! verification, and no mesh management.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use libp2p_identity::PeerId;
use tokio::sync::broadcast;
use tracing::debug;

use crate::gossip::{GossipError, GossipHost, Subscription, Topic, TopicMessage, TopicSender};

/// Buffered messages per topic before slow subscribers start lagging.
const TOPIC_BUFFER: usize = 64;

/// An in-process mesh connecting every host created from it.
#[derive(Clone, Default)]
pub struct MemNet {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<TopicMessage>>>>,
}

impl MemNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host with the given peer id on this mesh.
    pub fn host(&self, id: PeerId) -> MemHost {
        MemHost {
            net: self.clone(),
            id,
        }
    }

    fn channel(&self, name: &str) -> broadcast::Sender<TopicMessage> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(name.to_owned())
            .or_insert_with(|| broadcast::channel(TOPIC_BUFFER).0)
            .clone()
    }
}

/// A peer attached to a [`MemNet`].
pub struct MemHost {
    net: MemNet,
    id: PeerId,
}

#[async_trait]
impl GossipHost for MemHost {
    fn id(&self) -> PeerId {
        self.id
    }

    async fn join(&self, name: &str) -> Result<Arc<dyn Topic>, GossipError> {
        Ok(Arc::new(MemTopic {
            name: name.to_owned(),
            host_id: self.id,
            tx: self.net.channel(name),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemTopic {
    name: String,
    host_id: PeerId,
    tx: broadcast::Sender<TopicMessage>,
    closed: AtomicBool,
}

#[async_trait]
impl Topic for MemTopic {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self) -> Result<Box<dyn Subscription>, GossipError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GossipError::TopicClosed);
        }
        Ok(Box::new(MemSubscription {
            rx: self.tx.subscribe(),
            cancelled: false,
        }))
    }

    fn sender(&self) -> Arc<dyn TopicSender> {
        Arc::new(MemSender {
            from: self.host_id,
            tx: self.tx.clone(),
        })
    }

    async fn close(&self) -> Result<(), GossipError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct MemSubscription {
    rx: broadcast::Receiver<TopicMessage>,
    cancelled: bool,
}

#[async_trait]
impl Subscription for MemSubscription {
    async fn next(&mut self) -> Result<TopicMessage, GossipError> {
        loop {
            if self.cancelled {
                return Err(GossipError::SubscriptionCancelled);
            }
            match self.rx.recv().await {
                Ok(msg) => return Ok(msg),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "memnet subscription lagged, skipping");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(GossipError::TopicClosed);
                }
            }
        }
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}

struct MemSender {
    from: PeerId,
    tx: broadcast::Sender<TopicMessage>,
}

#[async_trait]
impl TopicSender for MemSender {
    async fn send(&self, data: Vec<u8>) -> Result<(), GossipError> {
        // A publish with no subscribers is not an error.
        let _ = self.tx.send(TopicMessage {
            from: self.from.to_bytes(),
            data,
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), GossipError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers_including_self() {
        let net = MemNet::new();
        let id_a = PeerId::random();
        let id_b = PeerId::random();

        let topic_a = net.host(id_a).join("t").await.unwrap();
        let topic_b = net.host(id_b).join("t").await.unwrap();

        let mut sub_a = topic_a.subscribe().unwrap();
        let mut sub_b = topic_b.subscribe().unwrap();

        topic_a.sender().send(b"hello".to_vec()).await.unwrap();

        for sub in [&mut sub_a, &mut sub_b] {
            let msg = sub.next().await.unwrap();
            assert_eq!(msg.from, id_a.to_bytes());
            assert_eq!(msg.data, b"hello");
        }
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_delivering() {
        let net = MemNet::new();
        let topic = net.host(PeerId::random()).join("t").await.unwrap();
        let mut sub = topic.subscribe().unwrap();

        topic.sender().send(b"before".to_vec()).await.unwrap();
        sub.cancel();

        // Buffered or not, a cancelled subscription only reports cancellation.
        assert_eq!(
            sub.next().await.unwrap_err(),
            GossipError::SubscriptionCancelled
        );
        assert_eq!(
            sub.next().await.unwrap_err(),
            GossipError::SubscriptionCancelled
        );
    }

    #[tokio::test]
    async fn subscribe_after_close_fails() {
        let net = MemNet::new();
        let topic = net.host(PeerId::random()).join("t").await.unwrap();
        topic.close().await.unwrap();
        assert!(matches!(
            topic.subscribe().map(|_| ()),
            Err(GossipError::TopicClosed)
        ));
    }
}
