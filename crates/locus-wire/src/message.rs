//! Directory protocol messages.
//!
//! Every directory message travels as one frame:
//!
//! ```text
//! [type:u8][success:u8][location1:str][location2:str][name:str]
//! ```
//!
//! where each `str` is a big-endian `u16` byte length followed by that many
//! bytes of UTF-8. An absent location is written as the literal `"null"`.
//! Lease and deregistration messages (types 5, 6, 9 and 10) append a fifth
//! string carrying the lease key, again `"null"` when absent; all other
//! types are exactly the five fields above.

use crate::error::{WireError, WireResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use locus_types::{ChannelLocation, LeaseKey, NodeId};

/// Written in place of an absent location or key.
pub const NULL_SENTINEL: &str = "null";

/// Longest string a frame field can hold.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Message types, with their on-wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Logon = 1,
    LogonReply = 2,
    RegisterRequest = 3,
    ResolveRequest = 4,
    LeaseRequest = 5,
    DeregisterRequest = 6,
    RegisterReply = 7,
    ResolveReply = 8,
    LeaseReply = 9,
    DeregisterReply = 10,
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Logon),
            2 => Some(Self::LogonReply),
            3 => Some(Self::RegisterRequest),
            4 => Some(Self::ResolveRequest),
            5 => Some(Self::LeaseRequest),
            6 => Some(Self::DeregisterRequest),
            7 => Some(Self::RegisterReply),
            8 => Some(Self::ResolveReply),
            9 => Some(Self::LeaseReply),
            10 => Some(Self::DeregisterReply),
            _ => None,
        }
    }

    /// Whether frames of this type carry the trailing lease-key field.
    pub fn carries_key(self) -> bool {
        matches!(
            self,
            Self::LeaseRequest | Self::DeregisterRequest | Self::LeaseReply | Self::DeregisterReply
        )
    }

    /// The reply type answering this request type.
    pub fn reply_kind(self) -> Option<Self> {
        match self {
            Self::Logon => Some(Self::LogonReply),
            Self::RegisterRequest => Some(Self::RegisterReply),
            Self::ResolveRequest => Some(Self::ResolveReply),
            Self::LeaseRequest => Some(Self::LeaseReply),
            Self::DeregisterRequest => Some(Self::DeregisterReply),
            _ => None,
        }
    }
}

/// One directory protocol message.
///
/// `location1` is the requester's reply location on requests and the
/// resolved location on a resolve reply; `location2` is the location being
/// registered or leased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryMessage {
    pub kind: MessageKind,
    pub success: bool,
    pub location1: Option<ChannelLocation>,
    pub location2: Option<ChannelLocation>,
    pub name: String,
    pub key: Option<LeaseKey>,
}

impl DirectoryMessage {
    /// An empty, unsuccessful message of the given type.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            success: false,
            location1: None,
            location2: None,
            name: String::new(),
            key: None,
        }
    }

    pub fn logon(reply_to: ChannelLocation) -> Self {
        Self {
            location1: Some(reply_to),
            ..Self::new(MessageKind::Logon)
        }
    }

    pub fn register(reply_to: ChannelLocation, name: &str, location: ChannelLocation) -> Self {
        Self {
            location1: Some(reply_to),
            location2: Some(location),
            name: name.to_string(),
            ..Self::new(MessageKind::RegisterRequest)
        }
    }

    pub fn resolve(reply_to: ChannelLocation, name: &str) -> Self {
        Self {
            location1: Some(reply_to),
            name: name.to_string(),
            ..Self::new(MessageKind::ResolveRequest)
        }
    }

    /// Lease `name`. With a location the name is rebound to it; without one
    /// the name is reserved and its current binding withdrawn.
    pub fn lease(
        reply_to: ChannelLocation,
        name: &str,
        location: Option<ChannelLocation>,
        key: Option<LeaseKey>,
    ) -> Self {
        Self {
            location1: Some(reply_to),
            location2: location,
            name: name.to_string(),
            key,
            ..Self::new(MessageKind::LeaseRequest)
        }
    }

    pub fn deregister(reply_to: ChannelLocation, name: &str, key: Option<LeaseKey>) -> Self {
        Self {
            location1: Some(reply_to),
            name: name.to_string(),
            key,
            ..Self::new(MessageKind::DeregisterRequest)
        }
    }

    /// A reply of type `kind` with the given outcome.
    pub fn reply(kind: MessageKind, success: bool) -> Self {
        Self {
            success,
            ..Self::new(kind)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_location(mut self, location: ChannelLocation) -> Self {
        self.location1 = Some(location);
        self
    }

    pub fn with_key(mut self, key: LeaseKey) -> Self {
        self.key = Some(key);
        self
    }

    /// The node that sent a request, taken from its reply location.
    pub fn requester(&self) -> Option<&NodeId> {
        self.location1.as_ref().map(ChannelLocation::node)
    }
}

/// Encode a message into a single frame.
pub fn encode_message(msg: &DirectoryMessage) -> WireResult<Bytes> {
    let mut buf = BytesMut::with_capacity(128 + msg.name.len());
    buf.put_u8(msg.kind as u8);
    buf.put_u8(u8::from(msg.success));
    put_location(&mut buf, msg.location1.as_ref())?;
    put_location(&mut buf, msg.location2.as_ref())?;
    put_str(&mut buf, &msg.name)?;
    if msg.kind.carries_key() {
        put_str(&mut buf, msg.key.as_ref().map_or(NULL_SENTINEL, LeaseKey::as_str))?;
    }
    Ok(buf.freeze())
}

/// Decode a frame produced by [`encode_message`]. Trailing bytes are ignored.
pub fn decode_message(mut frame: &[u8]) -> WireResult<DirectoryMessage> {
    let buf = &mut frame;
    ensure(buf, 2)?;
    let raw_kind = buf.get_u8();
    let kind = MessageKind::from_u8(raw_kind).ok_or(WireError::UnknownMessageType(raw_kind))?;
    let success = buf.get_u8() != 0;
    let location1 = get_location(buf)?;
    let location2 = get_location(buf)?;
    let name = get_str(buf)?;
    let key = if kind.carries_key() {
        Some(get_str(buf)?)
            .filter(|k| k != NULL_SENTINEL)
            .map(LeaseKey::from_wire)
    } else {
        None
    };
    Ok(DirectoryMessage {
        kind,
        success,
        location1,
        location2,
        name,
        key,
    })
}

fn ensure(buf: &&[u8], len: usize) -> WireResult<()> {
    if buf.remaining() < len {
        return Err(WireError::Truncated {
            needed: len - buf.remaining(),
        });
    }
    Ok(())
}

fn put_str(buf: &mut BytesMut, s: &str) -> WireResult<()> {
    if s.len() > MAX_STRING_LEN {
        return Err(WireError::StringTooLong {
            len: s.len(),
            max: MAX_STRING_LEN,
        });
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn put_location(buf: &mut BytesMut, location: Option<&ChannelLocation>) -> WireResult<()> {
    match location {
        Some(loc) => put_str(buf, &loc.to_string()),
        None => put_str(buf, NULL_SENTINEL),
    }
}

fn get_str(buf: &mut &[u8]) -> WireResult<String> {
    ensure(buf, 2)?;
    let len = buf.get_u16() as usize;
    ensure(buf, len)?;
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|_| WireError::InvalidUtf8)?
        .to_string();
    buf.advance(len);
    Ok(s)
}

fn get_location(buf: &mut &[u8]) -> WireResult<Option<ChannelLocation>> {
    let raw = get_str(buf)?;
    if raw == NULL_SENTINEL {
        return Ok(None);
    }
    raw.parse::<ChannelLocation>()
        .map(Some)
        .map_err(|e| WireError::InvalidLocation(e.to_string()))
}
