//! Announcement receiver.
//!
//! A [`Receiver`] multiplexes two ingress paths into one ordered stream:
//! a gossip topic subscription consumed by a background watcher task, and
//! the [`direct`] call-in API. Both paths run through a single admission
//! pipeline (peer allow check, LRU dedup by CID, optional address
//! filtering) before the announcement is handed to a [`next`] caller
//! through a capacity-1 rendezvous channel.
//!
//! A direct announcement can also be republished onto the gossip topic
//! so that other receivers on the mesh learn about it. Republished
//! messages carry the original publisher in `OrigPeer`; a receiver that
//! sees its own relay come back drops it.
//!
//! The rendezvous channel is deliberate back-pressure: a consumer that
//! stops calling [`next`] without closing the receiver will stall both
//! ingress paths.
//!
//! [`direct`]: Receiver::direct
//! [`next`]: Receiver::next

use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use cid::Cid;
use libp2p_identity::PeerId;
use multiaddr::Multiaddr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::addr;
use crate::dedup::CidLru;
use crate::gossip::{GossipError, GossipHost, Subscription, Topic, TopicSender};
use crate::message::AnnounceMessage;

/// Default capacity of the announce dedup cache.
pub const DEFAULT_CACHE_SIZE: usize = 64;

/// Decides whether announcements originating from a peer are admitted.
/// Returning false drops the announcement silently.
pub type AllowPeerFn = Arc<dyn Fn(&PeerId) -> bool + Send + Sync>;

/// An announcement that new content is available.
#[derive(Clone, Debug)]
pub struct Announce {
    /// The announced content identifier.
    pub cid: Cid,
    /// The peer hosting the announced content.
    pub peer_id: PeerId,
    /// Network locations where the content can be fetched. May be empty;
    /// consumers can fall back to their peer store.
    pub addrs: Vec<Multiaddr>,
}

/// Configuration for [`Receiver::new`].
#[derive(Clone)]
pub struct ReceiverOptions {
    /// Admission predicate over the announcement's origin peer. `None`
    /// admits every peer.
    pub allow_peer: Option<AllowPeerFn>,
    /// Strip non-public addresses from accepted announcements.
    pub filter_ips: bool,
    /// Republish direct announcements onto the gossip topic. Forced off
    /// when the receiver has no topic to publish on.
    pub resend: bool,
    /// Use this already-joined topic instead of joining one. The
    /// receiver does not close a pre-supplied topic.
    pub topic: Option<Arc<dyn Topic>>,
    /// Capacity of the dedup cache.
    pub cache_size: usize,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            allow_peer: None,
            filter_ips: false,
            resend: false,
            topic: None,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// Errors returned by [`Receiver`] operations.
#[derive(Debug)]
pub enum ReceiverError {
    /// The receiver is closed.
    Closed,
    /// Construction options are inconsistent.
    Config(String),
    /// The gossip topic could not be joined.
    JoinTopic(GossipError),
    /// The topic subscription could not be opened.
    Subscribe(GossipError),
    /// Closing the receiver-owned topic failed.
    CloseTopic(GossipError),
    /// Closing the topic sender failed.
    CloseSender(GossipError),
}

impl std::fmt::Display for ReceiverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "receiver is closed"),
            Self::Config(msg) => write!(f, "invalid receiver options: {msg}"),
            Self::JoinTopic(err) => write!(f, "cannot join gossip topic: {err}"),
            Self::Subscribe(err) => write!(f, "cannot subscribe to gossip topic: {err}"),
            Self::CloseTopic(err) => write!(f, "failed to close gossip topic: {err}"),
            Self::CloseSender(err) => write!(f, "failed to close topic sender: {err}"),
        }
    }
}

impl std::error::Error for ReceiverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Closed | Self::Config(_) => None,
            Self::JoinTopic(err)
            | Self::Subscribe(err)
            | Self::CloseTopic(err)
            | Self::CloseSender(err) => Some(err),
        }
    }
}

/// Why the admission check refused an announcement.
enum CheckFailure {
    Closed,
    NotAllowed,
    AlreadySeen,
}

impl std::fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "receiver closed"),
            Self::NotAllowed => write!(f, "message source not allowed"),
            Self::AlreadySeen => write!(f, "announcement for already seen CID"),
        }
    }
}

/// State guarded by the receiver's single lock.
struct State {
    closed: bool,
    cache: CidLru,
    watch_handle: Option<JoinHandle<()>>,
}

struct Shared {
    host_id: Option<PeerId>,
    allow_peer: Option<AllowPeerFn>,
    filter_ips: bool,
    resend: bool,
    /// True when the receiver joined the topic itself and must close it.
    owns_topic: bool,

    topic: Option<Arc<dyn Topic>>,
    sender: Option<Arc<dyn TopicSender>>,

    state: Mutex<State>,
    /// Cancelled exactly once at close to wake `next` callers and any
    /// pipeline stage blocked on the output channel.
    done: CancellationToken,
    /// Scope of the background watcher task.
    cancel_watch: CancellationToken,

    out_tx: mpsc::Sender<Announce>,
    out_rx: tokio::sync::Mutex<mpsc::Receiver<Announce>>,
}

/// Receives announcements from a gossip topic and via [`direct`] calls.
///
/// Cheap to clone; clones share one pipeline and one lifecycle.
///
/// [`direct`]: Receiver::direct
#[derive(Clone)]
pub struct Receiver {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver").finish_non_exhaustive()
    }
}

impl Receiver {
    /// Create a receiver.
    ///
    /// When `opts.topic` is not set and both `host` and `topic_name` are
    /// given, joins the named gossip topic and owns it (it is closed
    /// again by [`close`]). Whenever a topic is available a subscription
    /// and a topic-bound sender are opened; without one, only [`direct`]
    /// is usable and `resend` is forced off. The background watcher runs
    /// when the receiver has both a host and a subscription.
    ///
    /// [`close`]: Receiver::close
    /// [`direct`]: Receiver::direct
    pub async fn new(
        host: Option<Arc<dyn GossipHost>>,
        topic_name: &str,
        opts: ReceiverOptions,
    ) -> Result<Self, ReceiverError> {
        if let Some(topic) = &opts.topic {
            if !topic_name.is_empty() && topic.name() != topic_name {
                return Err(ReceiverError::Config(format!(
                    "pre-supplied topic {:?} does not match requested topic {:?}",
                    topic.name(),
                    topic_name
                )));
            }
        }

        let mut owns_topic = false;
        let mut topic = opts.topic;
        if topic.is_none() && !topic_name.is_empty() {
            if let Some(host) = &host {
                let joined = host
                    .join(topic_name)
                    .await
                    .map_err(ReceiverError::JoinTopic)?;
                info!(topic = topic_name, host = %host.id(), "joined gossip topic");
                owns_topic = true;
                topic = Some(joined);
            }
        }

        let mut resend = opts.resend;
        let mut sender = None;
        let mut sub = None;
        match &topic {
            Some(topic) => {
                match topic.subscribe() {
                    Ok(s) => sub = Some(s),
                    Err(err) => {
                        // Release a topic this constructor joined.
                        if owns_topic {
                            if let Err(close_err) = topic.close().await {
                                error!(error = %close_err, "failed to close topic after subscribe failure");
                            }
                        }
                        return Err(ReceiverError::Subscribe(err));
                    }
                }
                sender = Some(topic.sender());
            }
            None => {
                // Cannot republish without an outbound path.
                resend = false;
            }
        }

        let (out_tx, out_rx) = mpsc::channel(1);

        let shared = Arc::new(Shared {
            host_id: host.as_ref().map(|h| h.id()),
            allow_peer: opts.allow_peer,
            filter_ips: opts.filter_ips,
            resend,
            owns_topic,
            topic,
            sender,
            state: Mutex::new(State {
                closed: false,
                cache: CidLru::new(opts.cache_size),
                watch_handle: None,
            }),
            done: CancellationToken::new(),
            cancel_watch: CancellationToken::new(),
            out_tx,
            out_rx: tokio::sync::Mutex::new(out_rx),
        });

        match (shared.host_id.is_some(), sub) {
            (true, Some(sub)) => {
                let handle = tokio::spawn(watch(shared.clone(), sub));
                shared.state.lock().unwrap().watch_handle = Some(handle);
            }
            // A hostless receiver has no watcher to consume this.
            (false, Some(mut sub)) => sub.cancel(),
            _ => {}
        }

        Ok(Self { shared })
    }

    /// Wait for the next announcement that passed admission.
    ///
    /// Returns [`ReceiverError::Closed`] once the receiver is closed.
    /// Cancel-safe; wrap in [`tokio::time::timeout`] for a deadline.
    /// Concurrent callers each receive a distinct announcement, with no
    /// ordering guarantee between them.
    pub async fn next(&self) -> Result<Announce, ReceiverError> {
        let mut out = self.shared.out_rx.lock().await;
        tokio::select! {
            amsg = out.recv() => amsg.ok_or(ReceiverError::Closed),
            _ = self.shared.done.cancelled() => Err(ReceiverError::Closed),
        }
    }

    /// Inject an announcement received outside the gossip topic.
    ///
    /// The announcement runs through the same admission pipeline as
    /// gossip messages. With the `resend` option it is republished onto
    /// the topic with this origin recorded in `OrigPeer`, before local
    /// delivery; a republish failure is logged and does not block
    /// delivery. Blocks until a [`next`] caller accepts the announcement
    /// or the receiver closes.
    ///
    /// [`next`]: Receiver::next
    pub async fn direct(
        &self,
        cid: Cid,
        peer_id: PeerId,
        addrs: Vec<Multiaddr>,
    ) -> Result<(), ReceiverError> {
        info!(peer = %peer_id, ?addrs, "handling direct announce");
        let amsg = Announce {
            cid,
            peer_id,
            addrs,
        };
        self.shared.handle_announce(amsg, self.shared.resend).await
    }

    /// Shut the receiver down.
    ///
    /// Wakes every blocked [`next`] and [`direct`] caller, drains the
    /// watcher, then closes the topic if this receiver joined it, or
    /// otherwise the topic sender. Idempotent: later calls return `Ok`.
    ///
    /// [`next`]: Receiver::next
    /// [`direct`]: Receiver::direct
    pub async fn close(&self) -> Result<(), ReceiverError> {
        let shared = &self.shared;
        let watch_handle = {
            let mut state = shared.state.lock().unwrap();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.watch_handle.take()
        };

        // Wake next callers and channel-blocked pipeline stages first;
        // the watcher may be one of them. Holding the state lock here
        // would deadlock with the admission pipeline.
        shared.done.cancel();

        shared.cancel_watch.cancel();
        if let Some(handle) = watch_handle {
            if let Err(err) = handle.await {
                error!(error = %err, "announce watcher task failed");
            }
        }

        if shared.owns_topic {
            if let Some(topic) = &shared.topic {
                topic.close().await.map_err(ReceiverError::CloseTopic)?;
            }
        } else if let Some(sender) = &shared.sender {
            sender.close().await.map_err(ReceiverError::CloseSender)?;
        }

        Ok(())
    }

    /// Forget a CID so its next announcement is admitted again.
    ///
    /// Meant for consumers that failed to process an announcement and
    /// want the re-announcement to come through.
    pub fn uncache_cid(&self, cid: &Cid) {
        let mut state = self.shared.state.lock().unwrap();
        state.cache.remove(&cid.to_string());
    }

    /// Name of the gossip topic, or `None` when the receiver has none.
    pub fn topic_name(&self) -> Option<&str> {
        self.shared.topic.as_deref().map(|topic| topic.name())
    }
}

impl Shared {
    /// Run one announcement through admission, filtering, optional
    /// republish, and delivery. Used by both the watcher and `direct`.
    ///
    /// Admission drops are logged and reported as success; only closure
    /// escapes as an error.
    async fn handle_announce(
        &self,
        mut amsg: Announce,
        resend: bool,
    ) -> Result<(), ReceiverError> {
        match self.announce_check(&amsg) {
            Ok(()) => {}
            Err(CheckFailure::Closed) => return Err(ReceiverError::Closed),
            Err(reason) => {
                info!(peer = %amsg.peer_id, %reason, "ignored announcement");
                return Ok(());
            }
        }

        if self.filter_ips {
            // An empty result is still delivered; consumers may find
            // addresses for the peer in their peer store.
            amsg.addrs = addr::filter_public(&amsg.addrs);
        }

        if resend {
            match self.republish(&amsg).await {
                Ok(()) => {
                    info!(cid = %amsg.cid, origin = %amsg.peer_id,
                        "republished direct announce on gossip topic");
                }
                Err(err) => error!(error = %err, "cannot republish announce message"),
            }
        }

        tokio::select! {
            res = self.out_tx.send(amsg) => res.map_err(|_| ReceiverError::Closed),
            _ = self.done.cancelled() => Err(ReceiverError::Closed),
        }
    }

    fn announce_check(&self, amsg: &Announce) -> Result<(), CheckFailure> {
        if let Some(allow_peer) = &self.allow_peer {
            if !allow_peer(&amsg.peer_id) {
                return Err(CheckFailure::NotAllowed);
            }
        }

        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(CheckFailure::Closed);
        }
        if state.cache.update(&amsg.cid.to_string()) {
            return Err(CheckFailure::AlreadySeen);
        }
        Ok(())
    }

    /// Rewrap a direct announcement as a gossip message carrying the
    /// original publisher and publish it on the topic.
    async fn republish(&self, amsg: &Announce) -> anyhow::Result<()> {
        let sender = self
            .sender
            .as_ref()
            .context("receiver has no topic sender")?;
        let mut msg = AnnounceMessage::new(amsg.cid);
        msg.orig_peer = amsg.peer_id.to_base58();
        msg.set_addrs(&amsg.addrs);
        sender.send(msg.encode()?).await?;
        Ok(())
    }

    /// Replace a faulted subscription with a fresh one on the same
    /// topic. Returns false when the receiver is closed or the topic
    /// refuses, in which case the watcher exits.
    fn restart_subscription(&self, sub: &mut Box<dyn Subscription>) -> bool {
        let Some(topic) = self.topic.as_ref() else {
            return false;
        };
        let state = self.state.lock().unwrap();
        if state.closed {
            return false;
        }
        sub.cancel();
        match topic.subscribe() {
            Ok(fresh) => {
                *sub = fresh;
                true
            }
            Err(err) => {
                error!(error = %err, topic = topic.name(), "cannot restart subscription");
                false
            }
        }
    }
}

/// Background consumer of the gossip subscription.
///
/// Decodes each message, resolves the effective origin peer, and feeds
/// the result to the admission pipeline. Transient read faults trigger a
/// re-subscribe; cancellation and closure end the loop.
async fn watch(shared: Arc<Shared>, mut sub: Box<dyn Subscription>) {
    loop {
        let msg = tokio::select! {
            _ = shared.cancel_watch.cancelled() => break,
            res = sub.next() => match res {
                Ok(msg) => msg,
                Err(GossipError::SubscriptionCancelled) => break,
                Err(err) => {
                    error!(error = %err, "error reading from gossip topic");
                    if shared.restart_subscription(&mut sub) {
                        continue;
                    }
                    break;
                }
            },
        };

        let src_peer = match PeerId::from_bytes(&msg.from) {
            Ok(peer) => peer,
            Err(_) => continue,
        };

        let m = match AnnounceMessage::decode(&msg.data) {
            Ok(m) => m,
            Err(err) => {
                error!(error = %err, "could not decode gossip announce message");
                continue;
            }
        };

        let addrs = if m.has_addrs() {
            match m.addrs() {
                Ok(addrs) => addrs,
                Err(err) => {
                    error!(error = %err, "could not decode gossip announce message");
                    continue;
                }
            }
        } else {
            Vec::new()
        };

        // A message with OrigPeer set is a relay of a direct announce.
        let origin = if m.orig_peer.is_empty() {
            info!(peer = %src_peer, ?addrs, "handling gossip announce");
            src_peer
        } else {
            if Some(src_peer) == shared.host_id {
                debug!("ignored republished announce from self");
                continue;
            }
            let origin = match m.orig_peer.parse::<PeerId>() {
                Ok(origin) => origin,
                Err(err) => {
                    error!(error = %err, "cannot read peer id from republished announce");
                    continue;
                }
            };
            if Some(origin) == shared.host_id {
                debug!("ignored announce originating from self");
                continue;
            }
            info!(origin = %origin, relay = %src_peer, ?addrs,
                "handling republished gossip announce");
            origin
        };

        let amsg = Announce {
            cid: m.cid,
            peer_id: origin,
            addrs,
        };
        match shared.handle_announce(amsg, false).await {
            Ok(()) => {}
            Err(ReceiverError::Closed) => break,
            Err(err) => error!(error = %err, "cannot process announce message"),
        }
    }

    sub.cancel();
    debug!("announce watcher stopped");
}
