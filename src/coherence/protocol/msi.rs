//! MSI: the baseline invalidation protocol
//!
//! No clean-exclusive state, so every fill from a GETS lands in S, and a
//! Modified line serving a reader must fall back to S.

use super::{ProtocolDefinition, ProtocolVariant, SnoopContext, Transition, rules};
use crate::coherence::communication::RequestKind;
use crate::coherence::data_structures::LineState;

const STABLE: &[LineState] = &[LineState::Invalid, LineState::Shared, LineState::Modified];

const TRANSIENT: &[LineState] = &[
    LineState::InvalidToShared,
    LineState::InvalidToModified,
    LineState::SharedToModified,
];

pub static DEFINITION: ProtocolDefinition = ProtocolDefinition {
    variant: ProtocolVariant::Msi,
    name: "MSI",
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
        LineState::Modified => rules::modified_on_cache(kind),
        // processor stalls while a request is outstanding
        LineState::InvalidToShared
        | LineState::InvalidToModified
        | LineState::SharedToModified
        | LineState::OwnedToModified
        | LineState::ForwardToModified => None,
        // not part of this protocol
        LineState::Exclusive
        | LineState::Owned
        | LineState::Forward => None,
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
        LineState::Modified => {
            rules::supplier_on_snoop(LineState::Modified, LineState::Shared, kind)
        }
        LineState::InvalidToShared => {
            rules::invalid_to_shared_on_snoop(LineState::Shared, kind, context)
        }
        LineState::InvalidToModified => rules::invalid_to_modified_on_snoop(kind),
        LineState::SharedToModified => rules::shared_to_modified_on_snoop(kind, context),
        // not part of this protocol
        LineState::Exclusive
        | LineState::Owned
        | LineState::Forward
        | LineState::OwnedToModified
        | LineState::ForwardToModified => None,
    }
}
