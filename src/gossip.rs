//! Gossip transport contracts.
//!
//! The receiver does not speak to a network itself. It consumes a topic
//! subscription and publishes through a topic-bound sender, both reached
//! through the traits below. Mesh formation, message signing, and peer id
//! verification belong to whatever implements them.
//!
//! Traits are defined apart from implementations so the receiver depends
//! only on the contracts. [`crate::mem`] provides an in-process
//! implementation for tests and demos.

use std::sync::Arc;

use async_trait::async_trait;
use libp2p_identity::PeerId;

/// A raw message delivered from a gossip topic.
///
/// `from` holds the binary peer id of the peer that signed and forwarded
/// the message. The transport verifies it; the receiver only decodes it.
#[derive(Clone, Debug)]
pub struct TopicMessage {
    /// Binary peer id of the forwarding peer.
    pub from: Vec<u8>,
    /// Opaque message payload.
    pub data: Vec<u8>,
}

/// A peer host that can join gossip topics.
#[async_trait]
pub trait GossipHost: Send + Sync {
    /// This host's peer id.
    fn id(&self) -> PeerId;

    /// Join the named topic, creating it in the underlying router if
    /// needed. The returned handle owns the membership.
    async fn join(&self, name: &str) -> Result<Arc<dyn Topic>, GossipError>;
}

/// A joined gossip topic.
#[async_trait]
pub trait Topic: Send + Sync {
    /// The topic's string identifier.
    fn name(&self) -> &str;

    /// Open a subscription delivering every message published on the
    /// topic, including this host's own.
    fn subscribe(&self) -> Result<Box<dyn Subscription>, GossipError>;

    /// A sender bound to this topic. Sent messages carry this host's
    /// peer id in their `from` field.
    fn sender(&self) -> Arc<dyn TopicSender>;

    /// Leave the topic and release the transport resources behind it.
    async fn close(&self) -> Result<(), GossipError>;
}

/// A single subscription on a topic.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. After [`cancel`], returns
    /// [`GossipError::SubscriptionCancelled`].
    ///
    /// [`cancel`]: Subscription::cancel
    async fn next(&mut self) -> Result<TopicMessage, GossipError>;

    /// Cancel the subscription, waking a pending [`next`] call.
    ///
    /// [`next`]: Subscription::next
    fn cancel(&mut self);
}

/// A publisher bound to a single topic.
#[async_trait]
pub trait TopicSender: Send + Sync {
    /// Publish `data` on the bound topic.
    async fn send(&self, data: Vec<u8>) -> Result<(), GossipError>;

    /// Release sender-owned transport resources. Never closes the topic.
    async fn close(&self) -> Result<(), GossipError>;
}

/// Errors surfaced by gossip transport implementations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GossipError {
    /// The subscription was cancelled. This is the normal result of
    /// shutting down and is never treated as a fault.
    SubscriptionCancelled,
    /// The topic is closed.
    TopicClosed,
    /// Any other transport-level failure.
    Transport(String),
}

impl std::fmt::Display for GossipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SubscriptionCancelled => write!(f, "subscription cancelled"),
            Self::TopicClosed => write!(f, "topic is closed"),
            Self::Transport(msg) => write!(f, "gossip transport: {msg}"),
        }
    }
}

impl std::error::Error for GossipError {}
