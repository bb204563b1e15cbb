//! Statistics counters written by the coherence engines

pub mod core_statistics;

pub use core_statistics::{CoherenceStatistics, CoherenceStatisticsSnapshot};
