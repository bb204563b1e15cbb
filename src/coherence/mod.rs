//! Snooping cache coherence
//!
//! Each cache line is driven by a `CoherenceEngine` whose transitions come
//! from the static table of the selected `ProtocolVariant`. Engines talk to
//! the interconnect only through the `BusPort` trait; `SnoopBus` is the
//! in-process implementation used for simulation.

pub mod bus;
pub mod communication;
pub mod data_structures;
pub mod protocol;
pub mod registry;
pub mod state_management;
pub mod statistics;

pub use bus::{BusEvent, BusTransaction, DEFAULT_EVENT_LOG_CAPACITY, SharedLine, SnoopBus};
pub use communication::{BusPort, CoherenceError, CoherenceResult, Request, RequestKind};
pub use data_structures::{Address, CacheId, LineState};
pub use protocol::{Action, ProtocolDefinition, ProtocolVariant, SnoopContext, Transition};
pub use registry::LineRegistry;
pub use state_management::CoherenceEngine;
pub use statistics::{CoherenceStatistics, CoherenceStatisticsSnapshot};
