//! Per-cache line registry
//!
//! Maps addresses to their `CoherenceEngine` and routes processor requests
//! and snooped transactions to the right line. Lines are created Invalid on
//! first reference.

use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use crate::coherence::communication::{
    BusPort, CoherenceError, CoherenceResult, Request, RequestKind,
};
use crate::coherence::data_structures::{Address, CacheId, LineState};
use crate::coherence::protocol::ProtocolVariant;
use crate::coherence::state_management::CoherenceEngine;
use crate::coherence::statistics::{CoherenceStatistics, CoherenceStatisticsSnapshot};

/// Line registry owned by one private cache
#[derive(Debug)]
pub struct LineRegistry {
    cache_id: CacheId,
    variant: ProtocolVariant,
    /// Line automata keyed by address
    lines: SkipMap<Address, Arc<CoherenceEngine>>,
    /// Counters shared by every line of this cache
    stats: Arc<CoherenceStatistics>,
}

impl LineRegistry {
    pub fn new(cache_id: CacheId, variant: ProtocolVariant) -> Self {
        Self {
            cache_id,
            variant,
            lines: SkipMap::new(),
            stats: Arc::new(CoherenceStatistics::new()),
        }
    }

    pub fn cache_id(&self) -> CacheId {
        self.cache_id
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    /// Locate or create the engine for `address`
    pub fn get_entry(&self, address: Address) -> Arc<CoherenceEngine> {
        if let Some(entry) = self.lines.get(&address) {
            return entry.value().clone();
        }
        log::debug!("{} allocating line {:#x}", self.cache_id, address);
        self.lines
            .get_or_insert_with(address, || {
                Arc::new(CoherenceEngine::new(
                    self.cache_id,
                    address,
                    self.variant,
                    self.stats.clone(),
                ))
            })
            .value()
            .clone()
    }

    /// State of `address` without allocating a line (untracked lines are I)
    pub fn peek_state(&self, address: Address) -> LineState {
        self.lines
            .get(&address)
            .map(|entry| entry.value().state())
            .unwrap_or(LineState::Invalid)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.lines.contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Drop the line for `address`, returning its last state
    ///
    /// Lines with an outstanding request cannot be evicted; the DATA response
    /// would otherwise land on a fresh Invalid line.
    pub fn evict(&self, address: Address) -> CoherenceResult<Option<LineState>> {
        let Some(entry) = self.lines.get(&address) else {
            return Ok(None);
        };
        let state = entry.value().state();
        if state.is_transient() {
            return Err(CoherenceError::LineBusy {
                cache_id: self.cache_id,
                address,
                state,
            });
        }
        self.lines.remove(&address);
        log::debug!("{} evicted line {:#x} in {}", self.cache_id, address, state);
        Ok(Some(state))
    }

    /// Route a LOAD/STORE to its line
    pub fn dispatch_cache_request<P: BusPort + ?Sized>(
        &self,
        request: &Request,
        port: &P,
    ) -> CoherenceResult<()> {
        self.get_entry(request.address)
            .on_cache_request(request, port)
    }

    /// Route a snooped GETS/GETM/DATA to its line
    ///
    /// An untracked line is I, and I ignores GETS and GETM, so those snoops
    /// return without allocating. DATA always reaches an engine.
    pub fn dispatch_snoop_request<P: BusPort + ?Sized>(
        &self,
        request: &Request,
        port: &P,
    ) -> CoherenceResult<()> {
        if request.kind != RequestKind::Data && !self.contains(request.address) {
            return Ok(());
        }
        self.get_entry(request.address)
            .on_snoop_request(request, port)
    }

    /// Current state of every tracked line, in address order
    pub fn snapshot(&self) -> Vec<(Address, LineState)> {
        self.lines
            .iter()
            .map(|entry| (*entry.key(), entry.value().state()))
            .collect()
    }

    /// Diagnostic dump of every tracked line
    pub fn dump(&self) -> Vec<String> {
        self.lines.iter().map(|entry| entry.value().dump()).collect()
    }

    pub fn statistics(&self) -> CoherenceStatisticsSnapshot {
        self.stats.get_snapshot()
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }
}
