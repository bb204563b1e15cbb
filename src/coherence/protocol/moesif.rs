//! MOESIF: MOESI plus a forward-clean-shared state
//!
//! F is the clean counterpart of O: one sharer is designated to answer
//! readers so memory is not consulted. An Exclusive line serving a reader
//! becomes that forwarder.

use super::{ProtocolDefinition, ProtocolVariant, SnoopContext, Transition, rules};
use crate::coherence::communication::RequestKind;
use crate::coherence::data_structures::LineState;

const STABLE: &[LineState] = &[
    LineState::Invalid,
    LineState::Shared,
    LineState::Exclusive,
    LineState::Owned,
    LineState::Forward,
    LineState::Modified,
];

const TRANSIENT: &[LineState] = &[
    LineState::InvalidToShared,
    LineState::InvalidToModified,
    LineState::SharedToModified,
    LineState::OwnedToModified,
    LineState::ForwardToModified,
];

pub static DEFINITION: ProtocolDefinition = ProtocolDefinition {
    variant: ProtocolVariant::Moesif,
    name: "MOESIF",
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
        LineState::Forward => {
            rules::read_only_on_cache(LineState::Forward, LineState::ForwardToModified, kind)
        }
        LineState::Modified => rules::modified_on_cache(kind),
        // processor stalls while a request is outstanding
        LineState::InvalidToShared
        | LineState::InvalidToModified
        | LineState::SharedToModified
        | LineState::OwnedToModified
        | LineState::ForwardToModified => None,
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
            rules::supplier_on_snoop(LineState::Exclusive, LineState::Forward, kind)
        }
        LineState::Owned => rules::supplier_on_snoop(LineState::Owned, LineState::Owned, kind),
        LineState::Forward => {
            rules::supplier_on_snoop(LineState::Forward, LineState::Forward, kind)
        }
        LineState::Modified => {
            rules::supplier_on_snoop(LineState::Modified, LineState::Owned, kind)
        }
        LineState::InvalidToShared => {
            rules::invalid_to_shared_on_snoop(LineState::Exclusive, kind, context)
        }
        LineState::InvalidToModified => rules::invalid_to_modified_on_snoop(kind),
        LineState::SharedToModified => rules::shared_to_modified_on_snoop(kind, context),
        LineState::OwnedToModified => rules::owned_to_modified_on_snoop(kind),
        LineState::ForwardToModified => rules::forward_to_modified_on_snoop(kind, context),
    }
}
