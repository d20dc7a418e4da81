//! Domain identifiers (strongly-typed IDs).
//!
//! All identifiers are ULIDs wrapped in `Id<T>`, where `T` is a zero-sized
//! marker type. The marker keeps an `EnvelopeId` from being passed where a
//! `MessageHandle` is expected, without any runtime cost.
//!
//! ## ULID
//! - time-sortable: the timestamp is in the high bits
//! - can be generated on any node without coordination
//! - 128-bit, same size as a UUID

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for each ID kind.
///
/// Provides the prefix used by `Display` (`"env-"`, `"msg-"`, ...).
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ID type.
///
/// Serializes as the bare ULID string; the prefix is display-only.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Accepts both the prefixed display form and a bare ULID.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

// ========================================
// Markers
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnvelopeKind {}

impl IdMarker for EnvelopeKind {
    fn prefix() -> &'static str {
        "env-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {}

impl IdMarker for MessageKind {
    fn prefix() -> &'static str {
        "msg-"
    }
}

// ========================================
// Aliases
// ========================================

/// Identifier of an envelope (one scheduled, addressed message).
pub type EnvelopeId = Id<EnvelopeKind>;

/// Handle of one queued copy of an envelope.
///
/// The same envelope can be queued more than once (at-least-once dispatch),
/// and every copy gets its own handle.
pub type MessageHandle = Id<MessageKind>;
