//! # cidcast - Gossip Announcement Receiver
//!
//! Publishers in a content-indexing mesh broadcast short announcements
//! saying that a new CID is available and where to fetch it. This crate
//! implements the receiving side: a concurrent [`Receiver`] that merges
//! a gossip topic subscription and a direct call-in API into one
//! deduplicated, filtered stream of [`Announce`] values, handed to a
//! downstream synchronizer one at a time.
//!
//! ## Quick Start
//!
//! ```ignore
//! let receiver = Receiver::new(Some(host), "/indexer/announce", ReceiverOptions {
//!     filter_ips: true,
//!     resend: true,
//!     ..ReceiverOptions::default()
//! }).await?;
//!
//! while let Ok(amsg) = receiver.next().await {
//!     println!("{} is available from {}", amsg.cid, amsg.peer_id);
//! }
//! ```
//!
//! ## Behavior
//!
//! - Announcements are deduplicated by CID through a bounded LRU set;
//!   [`Receiver::uncache_cid`] re-admits a CID after a failed fetch.
//! - An optional peer-allow predicate and public-address filter run
//!   before delivery.
//! - Direct announcements can be republished onto the gossip topic with
//!   the original publisher preserved, and a receiver drops its own
//!   relays when they echo back.
//! - Announcements are hints, not commitments: there is no persistence,
//!   no delivery guarantee, and no upstream back-pressure signalling.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `receiver` | [`Receiver`]: lifecycle, watcher, admission pipeline |
//! | `message` | CBOR wire format of announce messages |
//! | `gossip` | transport contracts (host, topic, subscription, sender) |
//! | `mem` | in-process gossip mesh for tests and demos |
//! | `addr` | multiaddr classification helpers |

pub mod addr;
pub mod gossip;
pub mod mem;
pub mod message;

mod dedup;
mod receiver;

pub use receiver::{
    Announce, AllowPeerFn, Receiver, ReceiverError, ReceiverOptions, DEFAULT_CACHE_SIZE,
};

// Domain types of the announce API, re-exported for consumers.
pub use cid::Cid;
pub use libp2p_identity::PeerId;
pub use multiaddr::Multiaddr;
