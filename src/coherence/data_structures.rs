//! Core data structures for the snooping coherence protocols
//!
//! This module defines the line states shared by every protocol variant,
//! the identity of a private cache on the bus, and the address type used to
//! key per-line automata.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Line address as seen on the bus (already block-aligned by the caller)
pub type Address = u64;

/// Identity of a private cache on the shared bus
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct CacheId(pub u8);

impl CacheId {
    /// Raw module index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache {}", self.0)
    }
}

impl From<u8> for CacheId {
    fn from(id: u8) -> Self {
        CacheId(id)
    }
}

/// Line state enumeration with atomic representation
///
/// The first six variants are stable states; the remaining five exist only
/// while the line's own bus request is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LineState {
    /// Invalid - no valid copy
    Invalid = 0,
    /// Shared - clean, read-only, other copies may exist
    Shared = 1,
    /// Exclusive - clean, only copy in the system
    Exclusive = 2,
    /// Owned - dirty, other read-only copies may exist, this cache answers
    Owned = 3,
    /// Forward - clean, other copies may exist, this cache answers
    Forward = 4,
    /// Modified - dirty, only copy in the system
    Modified = 5,
    /// GETS issued from I, waiting for DATA
    InvalidToShared = 6,
    /// GETM issued from I (or preempted upgrade), waiting for DATA
    InvalidToModified = 7,
    /// Upgrade GETM issued from S, waiting for DATA
    SharedToModified = 8,
    /// Upgrade GETM issued from O, waiting for DATA
    OwnedToModified = 9,
    /// Upgrade GETM issued from F, waiting for DATA
    ForwardToModified = 10,
}

impl LineState {
    /// Every state known to the engine, in discriminant order
    pub const ALL: [LineState; 11] = [
        LineState::Invalid,
        LineState::Shared,
        LineState::Exclusive,
        LineState::Owned,
        LineState::Forward,
        LineState::Modified,
        LineState::InvalidToShared,
        LineState::InvalidToModified,
        LineState::SharedToModified,
        LineState::OwnedToModified,
        LineState::ForwardToModified,
    ];

    /// Convert u8 to LineState
    ///
    /// Unlike the stored discriminant this is fallible: an unknown raw value
    /// means the line storage was corrupted.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Short protocol name used in dumps and diagnostics
    pub fn short_name(&self) -> &'static str {
        match self {
            LineState::Invalid => "I",
            LineState::Shared => "S",
            LineState::Exclusive => "E",
            LineState::Owned => "O",
            LineState::Forward => "F",
            LineState::Modified => "M",
            LineState::InvalidToShared => "IS",
            LineState::InvalidToModified => "IM",
            LineState::SharedToModified => "SM",
            LineState::OwnedToModified => "OM",
            LineState::ForwardToModified => "FM",
        }
    }

    /// Check if a bus request is outstanding for this line
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LineState::InvalidToShared
                | LineState::InvalidToModified
                | LineState::SharedToModified
                | LineState::OwnedToModified
                | LineState::ForwardToModified
        )
    }

    /// Check if state is valid (holds readable data)
    pub fn is_valid(&self) -> bool {
        matches!(
            self,
            LineState::Shared
                | LineState::Exclusive
                | LineState::Owned
                | LineState::Forward
                | LineState::Modified
        )
    }

    /// Check if this cache is the designated responder for the line
    ///
    /// At most one cache per address may be in one of these states.
    pub fn is_owner(&self) -> bool {
        matches!(
            self,
            LineState::Exclusive | LineState::Owned | LineState::Forward | LineState::Modified
        )
    }

    /// Check if a local STORE completes without bus traffic
    pub fn can_write(&self) -> bool {
        matches!(self, LineState::Exclusive | LineState::Modified)
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}
