//! Core coherence statistics tracking
//!
//! Counters written as side effects of transitions. Aggregation and
//! reporting belong to the surrounding simulator.

use crossbeam_utils::CachePadded;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of coherence statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoherenceStatisticsSnapshot {
    pub cache_misses: u64,
    pub coherence_misses: u64,
    pub silent_upgrades: u64,
    pub total_transitions: u64,
    pub bus_requests: u64,
    pub bus_supplies: u64,
    pub processor_supplies: u64,
    pub shared_line_assertions: u64,
    pub protocol_violations: u64,
}

/// Coherence statistics tracking
#[derive(Debug)]
pub struct CoherenceStatistics {
    /// Cache-side requests that went to the bus
    pub cache_misses: CachePadded<AtomicU64>,
    /// Upgrades from S, O or F (subset of cache misses)
    pub coherence_misses: CachePadded<AtomicU64>,
    /// E -> M stores with no bus traffic
    pub silent_upgrades: CachePadded<AtomicU64>,
    /// Transitions that changed the line state
    pub total_transitions: CachePadded<AtomicU64>,
    /// GETS/GETM issued
    pub bus_requests: CachePadded<AtomicU64>,
    /// Data supplied to another cache
    pub bus_supplies: CachePadded<AtomicU64>,
    /// Data delivered to the local processor
    pub processor_supplies: CachePadded<AtomicU64>,
    pub shared_line_assertions: CachePadded<AtomicU64>,
    pub protocol_violations: CachePadded<AtomicU64>,
}

impl Default for CoherenceStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl CoherenceStatistics {
    pub fn new() -> Self {
        Self {
            cache_misses: CachePadded::new(AtomicU64::new(0)),
            coherence_misses: CachePadded::new(AtomicU64::new(0)),
            silent_upgrades: CachePadded::new(AtomicU64::new(0)),
            total_transitions: CachePadded::new(AtomicU64::new(0)),
            bus_requests: CachePadded::new(AtomicU64::new(0)),
            bus_supplies: CachePadded::new(AtomicU64::new(0)),
            processor_supplies: CachePadded::new(AtomicU64::new(0)),
            shared_line_assertions: CachePadded::new(AtomicU64::new(0)),
            protocol_violations: CachePadded::new(AtomicU64::new(0)),
        }
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coherence_miss(&self) {
        self.coherence_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_silent_upgrade(&self) {
        self.silent_upgrades.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a state-changing transition
    pub fn record_transition(&self) {
        self.total_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bus_request(&self) {
        self.bus_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bus_supply(&self) {
        self.bus_supplies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processor_supply(&self) {
        self.processor_supplies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shared_line_assertion(&self) {
        self.shared_line_assertions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a protocol violation
    pub fn record_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get statistics snapshot
    pub fn get_snapshot(&self) -> CoherenceStatisticsSnapshot {
        CoherenceStatisticsSnapshot {
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            coherence_misses: self.coherence_misses.load(Ordering::Relaxed),
            silent_upgrades: self.silent_upgrades.load(Ordering::Relaxed),
            total_transitions: self.total_transitions.load(Ordering::Relaxed),
            bus_requests: self.bus_requests.load(Ordering::Relaxed),
            bus_supplies: self.bus_supplies.load(Ordering::Relaxed),
            processor_supplies: self.processor_supplies.load(Ordering::Relaxed),
            shared_line_assertions: self.shared_line_assertions.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        for counter in [
            &self.cache_misses,
            &self.coherence_misses,
            &self.silent_upgrades,
            &self.total_transitions,
            &self.bus_requests,
            &self.bus_supplies,
            &self.processor_supplies,
            &self.shared_line_assertions,
            &self.protocol_violations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        log::debug!("Coherence statistics reset");
    }
}

impl CoherenceStatisticsSnapshot {
    /// Misses caused by a first reference rather than an upgrade
    pub fn cold_misses(&self) -> u64 {
        self.cache_misses.saturating_sub(self.coherence_misses)
    }

    /// Fraction of write upgrades that avoided the bus
    pub fn silent_upgrade_ratio(&self) -> f64 {
        let upgrades = self.silent_upgrades + self.coherence_misses;
        if upgrades == 0 {
            0.0
        } else {
            self.silent_upgrades as f64 / upgrades as f64
        }
    }

    /// Element-wise sum, for aggregating per-cache snapshots
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            cache_misses: self.cache_misses + other.cache_misses,
            coherence_misses: self.coherence_misses + other.coherence_misses,
            silent_upgrades: self.silent_upgrades + other.silent_upgrades,
            total_transitions: self.total_transitions + other.total_transitions,
            bus_requests: self.bus_requests + other.bus_requests,
            bus_supplies: self.bus_supplies + other.bus_supplies,
            processor_supplies: self.processor_supplies + other.processor_supplies,
            shared_line_assertions: self.shared_line_assertions + other.shared_line_assertions,
            protocol_violations: self.protocol_violations + other.protocol_violations,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
