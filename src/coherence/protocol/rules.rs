//! Transition rows shared across protocol variants
//!
//! A row covers one state for every event kind. Variant tables pick rows per
//! state and supply the few variant-specific parameters (downgrade targets,
//! whether a clean-exclusive fill is available).

use super::{Action, SnoopContext, Transition};
use crate::coherence::communication::RequestKind;
use crate::coherence::data_structures::LineState;

// Cache-side rows

pub fn invalid_on_cache(kind: RequestKind) -> Option<Transition> {
    match kind {
        RequestKind::Load => Some(
            Transition::to(LineState::InvalidToShared)
                .then(Action::IssueGets)
                .then(Action::CountCacheMiss),
        ),
        RequestKind::Store => Some(
            Transition::to(LineState::InvalidToModified)
                .then(Action::IssueGetm)
                .then(Action::CountCacheMiss),
        ),
        _ => None,
    }
}

/// Row for a read-only state whose STORE needs an upgrade GETM into `pending`
pub fn read_only_on_cache(
    state: LineState,
    pending: LineState,
    kind: RequestKind,
) -> Option<Transition> {
    match kind {
        RequestKind::Load => Some(read_hit(state)),
        RequestKind::Store => Some(
            Transition::to(pending)
                .then(Action::IssueGetm)
                .then(Action::CountCacheMiss)
                .then(Action::CountCoherenceMiss),
        ),
        _ => None,
    }
}

pub fn exclusive_on_cache(kind: RequestKind) -> Option<Transition> {
    match kind {
        RequestKind::Load => Some(read_hit(LineState::Exclusive)),
        // silent upgrade, no bus traffic
        RequestKind::Store => Some(
            Transition::to(LineState::Modified)
                .then(Action::SupplyToProcessor)
                .then(Action::CountSilentUpgrade),
        ),
        _ => None,
    }
}

pub fn modified_on_cache(kind: RequestKind) -> Option<Transition> {
    match kind {
        RequestKind::Load | RequestKind::Store => Some(read_hit(LineState::Modified)),
        _ => None,
    }
}

fn read_hit(state: LineState) -> Transition {
    Transition::stay(state).then(Action::SupplyToProcessor)
}

// Snoop-side rows, stable states

pub fn invalid_on_snoop(kind: RequestKind) -> Option<Transition> {
    match kind {
        RequestKind::Gets | RequestKind::Getm | RequestKind::Data => {
            Some(Transition::stay(LineState::Invalid))
        }
        _ => None,
    }
}

pub fn shared_on_snoop(kind: RequestKind) -> Option<Transition> {
    match kind {
        RequestKind::Gets => Some(Transition::stay(LineState::Shared).then(Action::AssertSharedLine)),
        RequestKind::Getm => Some(Transition::to(LineState::Invalid)),
        RequestKind::Data => Some(Transition::stay(LineState::Shared)),
        _ => None,
    }
}

/// Row for a state that answers snooped requests with its copy
///
/// `on_gets` is where the line settles after serving a reader; GETM always
/// invalidates.
pub fn supplier_on_snoop(
    state: LineState,
    on_gets: LineState,
    kind: RequestKind,
) -> Option<Transition> {
    match kind {
        RequestKind::Gets => Some(
            Transition::to(on_gets)
                .then(Action::AssertSharedLine)
                .then(Action::SupplyOnBus),
        ),
        RequestKind::Getm => Some(
            Transition::to(LineState::Invalid)
                .then(Action::AssertSharedLine)
                .then(Action::SupplyOnBus),
        ),
        RequestKind::Data => Some(Transition::stay(state)),
        _ => None,
    }
}

// Snoop-side rows, transient states

/// IS row; `unshared_fill` is E where the variant has it, otherwise S
pub fn invalid_to_shared_on_snoop(
    unshared_fill: LineState,
    kind: RequestKind,
    context: SnoopContext,
) -> Option<Transition> {
    match kind {
        RequestKind::Gets | RequestKind::Getm => Some(Transition::stay(LineState::InvalidToShared)),
        RequestKind::Data => {
            let next = if context.shared_line {
                LineState::Shared
            } else {
                unshared_fill
            };
            Some(Transition::to(next).then(Action::SupplyToProcessor))
        }
        _ => None,
    }
}

pub fn invalid_to_modified_on_snoop(kind: RequestKind) -> Option<Transition> {
    match kind {
        RequestKind::Gets | RequestKind::Getm => {
            Some(Transition::stay(LineState::InvalidToModified))
        }
        RequestKind::Data => {
            Some(Transition::to(LineState::Modified).then(Action::SupplyToProcessor))
        }
        _ => None,
    }
}

/// SM row
///
/// A GETS asserts the shared line and then takes the same originator check
/// as GETM, so a foreign reader also knocks the upgrade back to IM.
// TODO: confirm whether the GETS fallthrough into the originator check is intended
pub fn shared_to_modified_on_snoop(kind: RequestKind, context: SnoopContext) -> Option<Transition> {
    let preempt = |transition: Transition| {
        if context.from_self {
            transition
        } else {
            Transition {
                next: LineState::InvalidToModified,
                ..transition
            }
        }
    };
    match kind {
        RequestKind::Gets => Some(preempt(
            Transition::stay(LineState::SharedToModified).then(Action::AssertSharedLine),
        )),
        RequestKind::Getm => Some(preempt(Transition::stay(LineState::SharedToModified))),
        RequestKind::Data => {
            Some(Transition::to(LineState::Modified).then(Action::SupplyToProcessor))
        }
        _ => None,
    }
}

/// OM row
///
/// The dirty copy keeps answering while the upgrade is pending. Any GETM
/// hands it over and parks the line in IM, whose DATA path serves the
/// processor; a DATA seen directly in OM does not.
pub fn owned_to_modified_on_snoop(kind: RequestKind) -> Option<Transition> {
    match kind {
        RequestKind::Gets => Some(
            Transition::stay(LineState::OwnedToModified)
                .then(Action::AssertSharedLine)
                .then(Action::SupplyOnBus),
        ),
        RequestKind::Getm => {
            Some(Transition::to(LineState::InvalidToModified).then(Action::SupplyOnBus))
        }
        RequestKind::Data => Some(Transition::to(LineState::Modified)),
        _ => None,
    }
}

/// FM row; only a foreign GETM preempts the upgrade
pub fn forward_to_modified_on_snoop(
    kind: RequestKind,
    context: SnoopContext,
) -> Option<Transition> {
    match kind {
        RequestKind::Gets => Some(
            Transition::stay(LineState::ForwardToModified)
                .then(Action::AssertSharedLine)
                .then(Action::SupplyOnBus),
        ),
        RequestKind::Getm => {
            let next = if context.from_self {
                LineState::ForwardToModified
            } else {
                LineState::InvalidToModified
            };
            Some(Transition::to(next).then(Action::SupplyOnBus))
        }
        RequestKind::Data => {
            Some(Transition::to(LineState::Modified).then(Action::SupplyToProcessor))
        }
        _ => None,
    }
}
