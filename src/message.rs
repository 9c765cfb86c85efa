//! Announce message wire format.
//!
//! Messages on the announce topic are CBOR maps with string keys. Three
//! fields matter to a receiver: the announced CID, the publisher's
//! addresses in binary multiaddr form, and — for relayed announcements —
//! the textual peer id of the original publisher. An opaque `ExtraData`
//! payload is carried through for publishers that want to attach one.
//!
//! Decoders must ignore unknown keys so the format can grow, and
//! encoders must omit optional fields that are empty. Decoding is
//! size-bounded before any parsing happens.

use cid::Cid;
use multiaddr::Multiaddr;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// Maximum accepted size of an encoded announce message.
///
/// Announcements are a CID plus a handful of addresses; anything near
/// this limit is garbage or abuse and is rejected before decoding.
pub const MAX_ANNOUNCE_SIZE: usize = 1024 * 1024;

/// A gossip announce message in its wire shape.
///
/// `addrs` holds binary-encoded multiaddrs; use [`set_addrs`] and
/// [`addrs`] to convert to and from [`Multiaddr`] values.
///
/// [`set_addrs`]: AnnounceMessage::set_addrs
/// [`addrs`]: AnnounceMessage::addrs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnnounceMessage {
    /// The announced content identifier, in binary form.
    #[serde(rename = "Cid", with = "cid_bytes")]
    pub cid: Cid,

    /// Binary multiaddrs of the publisher. Absent when empty.
    #[serde(
        rename = "Addrs",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    addrs: Vec<ByteBuf>,

    /// Textual peer id of the original publisher. Set only on relayed
    /// announcements; absent means first hop.
    #[serde(
        rename = "OrigPeer",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub orig_peer: String,

    /// Opaque publisher payload, carried through unchanged.
    #[serde(
        rename = "ExtraData",
        default,
        skip_serializing_if = "bytes_empty"
    )]
    pub extra_data: ByteBuf,
}

fn bytes_empty(buf: &ByteBuf) -> bool {
    buf.is_empty()
}

impl AnnounceMessage {
    /// Create a first-hop message for `cid` with no addresses.
    pub fn new(cid: Cid) -> Self {
        Self {
            cid,
            addrs: Vec::new(),
            orig_peer: String::new(),
            extra_data: ByteBuf::new(),
        }
    }

    /// Replace the message addresses with the binary form of `addrs`.
    pub fn set_addrs(&mut self, addrs: &[Multiaddr]) {
        self.addrs = addrs
            .iter()
            .map(|a| ByteBuf::from(a.to_vec()))
            .collect();
    }

    /// Decode the message addresses into [`Multiaddr`] values.
    ///
    /// Fails on the first address that is not a valid binary multiaddr.
    pub fn addrs(&self) -> Result<Vec<Multiaddr>, MessageError> {
        self.addrs
            .iter()
            .map(|b| Multiaddr::try_from(b.to_vec()).map_err(MessageError::Addr))
            .collect()
    }

    /// True when the message carries at least one address.
    pub fn has_addrs(&self) -> bool {
        !self.addrs.is_empty()
    }

    /// Encode to CBOR.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        serde_cbor::to_vec(self).map_err(MessageError::Codec)
    }

    /// Decode from CBOR, rejecting inputs over [`MAX_ANNOUNCE_SIZE`].
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() > MAX_ANNOUNCE_SIZE {
            return Err(MessageError::TooLarge(data.len()));
        }
        serde_cbor::from_slice(data).map_err(MessageError::Codec)
    }
}

/// Errors from encoding or decoding announce messages.
#[derive(Debug)]
pub enum MessageError {
    /// Encoded message exceeds [`MAX_ANNOUNCE_SIZE`].
    TooLarge(usize),
    /// CBOR encode/decode failure.
    Codec(serde_cbor::Error),
    /// An address field is not a valid binary multiaddr.
    Addr(multiaddr::Error),
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLarge(size) => {
                write!(f, "announce message of {size} bytes exceeds {MAX_ANNOUNCE_SIZE}")
            }
            Self::Codec(err) => write!(f, "announce message codec: {err}"),
            Self::Addr(err) => write!(f, "announce message address: {err}"),
        }
    }
}

impl std::error::Error for MessageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TooLarge(_) => None,
            Self::Codec(err) => Some(err),
            Self::Addr(err) => Some(err),
        }
    }
}

mod cid_bytes {
    use cid::Cid;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_bytes::ByteBuf;

    pub fn serialize<S: Serializer>(cid: &Cid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&cid.to_bytes())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Cid, D::Error> {
        let buf = ByteBuf::deserialize(deserializer)?;
        Cid::try_from(buf.as_slice()).map_err(D::Error::custom)
    }
}
