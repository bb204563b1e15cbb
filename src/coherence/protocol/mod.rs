//! Protocol definitions for the five snooping variants
//!
//! Each variant is a static `ProtocolDefinition`: its legal stable and
//! transient state sets plus a cache-side and a snoop-side transition table.
//! The engine is generic over the definition and never branches on the
//! variant itself.

pub mod mesi;
pub mod moesi;
pub mod moesif;
pub mod mosi;
pub mod msi;
pub mod rules;

use std::fmt;
use std::str::FromStr;

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

use crate::coherence::communication::RequestKind;
use crate::coherence::data_structures::LineState;

/// Supported protocol variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVariant {
    Msi,
    #[default]
    Mesi,
    Moesi,
    Moesif,
    Mosi,
}

impl ProtocolVariant {
    pub const ALL: [ProtocolVariant; 5] = [
        ProtocolVariant::Msi,
        ProtocolVariant::Mesi,
        ProtocolVariant::Moesi,
        ProtocolVariant::Moesif,
        ProtocolVariant::Mosi,
    ];

    /// Static definition backing this variant
    pub fn definition(self) -> &'static ProtocolDefinition {
        match self {
            ProtocolVariant::Msi => &msi::DEFINITION,
            ProtocolVariant::Mesi => &mesi::DEFINITION,
            ProtocolVariant::Moesi => &moesi::DEFINITION,
            ProtocolVariant::Moesif => &moesif::DEFINITION,
            ProtocolVariant::Mosi => &mosi::DEFINITION,
        }
    }

    pub fn name(self) -> &'static str {
        self.definition().name
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProtocolVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "msi" => Ok(ProtocolVariant::Msi),
            "mesi" => Ok(ProtocolVariant::Mesi),
            "moesi" => Ok(ProtocolVariant::Moesi),
            "moesif" => Ok(ProtocolVariant::Moesif),
            "mosi" => Ok(ProtocolVariant::Mosi),
            other => Err(format!("unknown coherence protocol '{}'", other)),
        }
    }
}

/// Side effect requested by a transition, applied in order by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    IssueGets,
    IssueGetm,
    SupplyToProcessor,
    /// Supply data to the snooped request's originator
    SupplyOnBus,
    AssertSharedLine,
    CountCacheMiss,
    CountCoherenceMiss,
    CountSilentUpgrade,
}

/// Upper bound on actions fired by a single transition
pub const MAX_ACTIONS: usize = 4;

/// Outcome of a table lookup: the next state and the actions to fire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: LineState,
    pub actions: ArrayVec<Action, MAX_ACTIONS>,
}

impl Transition {
    /// Transition into `next`
    pub fn to(next: LineState) -> Self {
        Self {
            next,
            actions: ArrayVec::new(),
        }
    }

    /// Remain in `state`
    pub fn stay(state: LineState) -> Self {
        Self::to(state)
    }

    /// Append an action
    pub fn then(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn fires(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }

    /// True when neither the state nor any wire-level signal changes
    pub fn is_silent(&self, from: LineState) -> bool {
        self.next == from && self.actions.is_empty()
    }
}

/// Snoop-time facts a table may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnoopContext {
    /// Request was issued by this cache
    pub from_self: bool,
    /// Shared line as observed at lookup time
    pub shared_line: bool,
}

pub type CacheTable = fn(LineState, RequestKind) -> Option<Transition>;
pub type SnoopTable = fn(LineState, RequestKind, SnoopContext) -> Option<Transition>;

/// Static configuration of one protocol variant
pub struct ProtocolDefinition {
    pub variant: ProtocolVariant,
    pub name: &'static str,
    pub stable_states: &'static [LineState],
    pub transient_states: &'static [LineState],
    pub cache_table: CacheTable,
    pub snoop_table: SnoopTable,
}

impl ProtocolDefinition {
    /// Check if `state` belongs to this variant
    pub fn is_legal(&self, state: LineState) -> bool {
        self.stable_states.contains(&state) || self.transient_states.contains(&state)
    }

    /// Look up a processor-side transition
    ///
    /// Returns `None` for transient states and for states outside the
    /// variant, both of which are protocol violations.
    pub fn cache_transition(&self, state: LineState, kind: RequestKind) -> Option<Transition> {
        if !kind.is_processor() || !self.is_legal(state) || state.is_transient() {
            return None;
        }
        (self.cache_table)(state, kind)
    }

    /// Look up a snoop-side transition
    pub fn snoop_transition(
        &self,
        state: LineState,
        kind: RequestKind,
        context: SnoopContext,
    ) -> Option<Transition> {
        if !kind.is_bus() || !self.is_legal(state) {
            return None;
        }
        (self.snoop_table)(state, kind, context)
    }
}

impl fmt::Debug for ProtocolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolDefinition")
            .field("name", &self.name)
            .field("stable_states", &self.stable_states)
            .field("transient_states", &self.transient_states)
            .finish()
    }
}
