//! MOESI: MESI plus an owned-dirty-shared state
//!
//! A Modified line serving a reader keeps its dirty copy in O and goes on
//! answering later requests instead of writing back.

use super::{ProtocolDefinition, ProtocolVariant, SnoopContext, Transition, rules};
use crate::coherence::communication::RequestKind;
use crate::coherence::data_structures::LineState;

const STABLE: &[LineState] = &[
    LineState::Invalid,
    LineState::Shared,
    LineState::Exclusive,
    LineState::Owned,
    LineState::Modified,
];

const TRANSIENT: &[LineState] = &[
    LineState::InvalidToShared,
    LineState::InvalidToModified,
    LineState::SharedToModified,
    LineState::OwnedToModified,
];

pub static DEFINITION: ProtocolDefinition = ProtocolDefinition {
    variant: ProtocolVariant::Moesi,
    name: "MOESI",
    stable_states: STABLE,
    transient_states: TRANSIENT,
    cache_table: cache_transition,
    snoop_table: snoop_transition,
};

pub fn cache_transition(state: LineState, kind: RequestKind) -> Option<Transition> {
    match state {
        LineState::Invalid => rules::invalid_on_cache(kind),
        LineState::Shared => {
            rules::read_only_on_cache(LineState::Shared, LineState::SharedToModified, kind)
        }
        LineState::Exclusive => rules::exclusive_on_cache(kind),
        LineState::Owned => {
            rules::read_only_on_cache(LineState::Owned, LineState::OwnedToModified, kind)
        }
        LineState::Modified => rules::modified_on_cache(kind),
        // processor stalls while a request is outstanding
        LineState::InvalidToShared
        | LineState::InvalidToModified
        | LineState::SharedToModified
        | LineState::OwnedToModified
        | LineState::ForwardToModified => None,
        // not part of this protocol
        LineState::Forward => None,
    }
}

pub fn snoop_transition(
    state: LineState,
    kind: RequestKind,
    context: SnoopContext,
) -> Option<Transition> {
    match state {
        LineState::Invalid => rules::invalid_on_snoop(kind),
        LineState::Shared => rules::shared_on_snoop(kind),
        LineState::Exclusive => {
            rules::supplier_on_snoop(LineState::Exclusive, LineState::Shared, kind)
        }
        LineState::Owned => rules::supplier_on_snoop(LineState::Owned, LineState::Owned, kind),
        LineState::Modified => {
            rules::supplier_on_snoop(LineState::Modified, LineState::Owned, kind)
        }
        LineState::InvalidToShared => {
            rules::invalid_to_shared_on_snoop(LineState::Exclusive, kind, context)
        }
        LineState::InvalidToModified => rules::invalid_to_modified_on_snoop(kind),
        LineState::SharedToModified => rules::shared_to_modified_on_snoop(kind, context),
        LineState::OwnedToModified => rules::owned_to_modified_on_snoop(kind),
        // not part of this protocol
        LineState::Forward
        | LineState::ForwardToModified => None,
    }
}
