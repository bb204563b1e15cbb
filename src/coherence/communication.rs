//! Request values, the bus port consumed by engines, and coherence errors
//!
//! Processor accesses and snooped bus transactions share one `Request`
//! value; the `BusPort` trait is the wire-level interface an engine drives
//! when a transition fires.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coherence::data_structures::{Address, CacheId, LineState};

/// Event kinds seen by a line automaton
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    /// Processor read
    Load,
    /// Processor write
    Store,
    /// Bus request for a shared copy
    Gets,
    /// Bus request for a modifiable copy
    Getm,
    /// Bus data response
    Data,
}

impl RequestKind {
    /// Check if the event originates at the local processor
    pub fn is_processor(&self) -> bool {
        matches!(self, RequestKind::Load | RequestKind::Store)
    }

    /// Check if the event is observed on the bus
    pub fn is_bus(&self) -> bool {
        !self.is_processor()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Load => "LOAD",
            RequestKind::Store => "STORE",
            RequestKind::Gets => "GETS",
            RequestKind::Getm => "GETM",
            RequestKind::Data => "DATA",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable event delivered to exactly one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub kind: RequestKind,
    pub address: Address,
    /// Cache that originated the request (for DATA, the cache it answers)
    pub src_id: CacheId,
}

impl Request {
    pub fn new(kind: RequestKind, address: Address, src_id: CacheId) -> Self {
        Self {
            kind,
            address,
            src_id,
        }
    }

    pub fn load(address: Address, src_id: CacheId) -> Self {
        Self::new(RequestKind::Load, address, src_id)
    }

    pub fn store(address: Address, src_id: CacheId) -> Self {
        Self::new(RequestKind::Store, address, src_id)
    }

    pub fn gets(address: Address, src_id: CacheId) -> Self {
        Self::new(RequestKind::Gets, address, src_id)
    }

    pub fn getm(address: Address, src_id: CacheId) -> Self {
        Self::new(RequestKind::Getm, address, src_id)
    }

    pub fn data(address: Address, src_id: CacheId) -> Self {
        Self::new(RequestKind::Data, address, src_id)
    }
}

/// Wire-level interface between one cache's engines and the shared bus
///
/// Implementations own arbitration and delivery; engines only call these
/// hooks while handling a transition and never block on them.
pub trait BusPort {
    /// Identity of the cache this port belongs to
    fn self_identity(&self) -> CacheId;

    /// Broadcast GETS for `address`; resolved later by a DATA event
    fn issue_share_request(&self, address: Address);

    /// Broadcast GETM for `address`; resolved later by a DATA event
    fn issue_modify_request(&self, address: Address);

    /// Complete the local processor's pending access
    fn supply_to_processor(&self, address: Address);

    /// Answer a snooped transaction with this cache's copy
    fn supply_on_bus(&self, address: Address, destination: CacheId);

    fn assert_shared_line(&self);

    fn shared_line_was_asserted(&self) -> bool;
}

/// Coherence operation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoherenceError {
    /// No transition is defined for (state, event) in the active protocol
    ProtocolViolation {
        cache_id: CacheId,
        address: Address,
        protocol: &'static str,
        state: LineState,
        kind: RequestKind,
    },
    /// Engine already reported a violation and refuses further events
    EngineHalted { cache_id: CacheId, address: Address },
    /// Stored state is not part of the protocol's legal state set
    UnsupportedState {
        cache_id: CacheId,
        address: Address,
        protocol: &'static str,
        raw_state: u8,
    },
    /// More than one cache holds an owner state for the address
    ExclusivityViolated {
        address: Address,
        holders: Vec<(CacheId, LineState)>,
    },
    /// Line has an outstanding request and cannot be evicted
    LineBusy {
        cache_id: CacheId,
        address: Address,
        state: LineState,
    },
    /// No cache with this identity is attached to the bus
    UnknownCache(CacheId),
}

impl CoherenceError {
    /// Check if the error desynchronizes the modeled memory system
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CoherenceError::LineBusy { .. } | CoherenceError::UnknownCache(_))
    }
}

impl fmt::Display for CoherenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoherenceError::ProtocolViolation {
                cache_id,
                address,
                protocol,
                state,
                kind,
            } => write!(
                f,
                "{} protocol violation on {} line {:#x}: state {} shouldn't see {}",
                protocol, cache_id, address, state, kind
            ),
            CoherenceError::EngineHalted { cache_id, address } => write!(
                f,
                "{} line {:#x} halted after a protocol violation",
                cache_id, address
            ),
            CoherenceError::UnsupportedState {
                cache_id,
                address,
                protocol,
                raw_state,
            } => write!(
                f,
                "invalid cache state {} for {} protocol on {} line {:#x}",
                raw_state, protocol, cache_id, address
            ),
            CoherenceError::ExclusivityViolated { address, holders } => {
                write!(f, "single-writer invariant violated for line {:#x}:", address)?;
                for (cache_id, state) in holders {
                    write!(f, " {}={}", cache_id, state)?;
                }
                Ok(())
            }
            CoherenceError::LineBusy {
                cache_id,
                address,
                state,
            } => write!(
                f,
                "{} line {:#x} is {} with a request outstanding",
                cache_id, address, state
            ),
            CoherenceError::UnknownCache(cache_id) => {
                write!(f, "{} is not attached to the bus", cache_id)
            }
        }
    }
}

impl std::error::Error for CoherenceError {}

/// Result type for coherence operations
pub type CoherenceResult<T> = Result<T, CoherenceError>;
