//! Snoopsim - snooping bus cache coherence engine
//!
//! Per-line coherence automata for the MSI, MESI, MOESI, MOESIF and MOSI
//! protocols, including the transient states a line passes through while
//! its own bus request is outstanding and the races that resolve them.
//!
//! # Features
//!
//! - **Table-driven protocols**: one static transition table per variant
//! - **Atomic line state**: engines are shared across threads behind `Arc`
//! - **Race handling**: IS, IM, SM, OM and FM pending states
//! - **Simulated bus**: totally ordered GETS/GETM broadcast with a shared line
//! - **Invariant checks**: single-writer verification after every transaction

pub mod coherence;
pub mod config;

pub use coherence::{
    Address, BusEvent, BusPort, CacheId, CoherenceEngine, CoherenceError, CoherenceResult,
    CoherenceStatistics, CoherenceStatisticsSnapshot, LineRegistry, LineState, ProtocolVariant,
    Request, RequestKind, SnoopBus,
};
pub use config::{ConfigError, SimulatorConfig};
