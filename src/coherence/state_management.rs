//! Per-line coherence engine
//!
//! One `CoherenceEngine` exists per (cache, address). It owns the line state
//! and resolves every processor request and snooped transaction against the
//! static table of its protocol variant. Any pair the table does not define
//! halts the engine for good.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crossbeam_utils::CachePadded;

use crate::coherence::communication::{
    BusPort, CoherenceError, CoherenceResult, Request, RequestKind,
};
use crate::coherence::data_structures::{Address, CacheId, LineState};
use crate::coherence::protocol::{
    Action, ProtocolDefinition, ProtocolVariant, SnoopContext, Transition,
};
use crate::coherence::statistics::CoherenceStatistics;

/// Line automaton for a single address in a single cache
#[derive(Debug)]
pub struct CoherenceEngine {
    cache_id: CacheId,
    address: Address,
    definition: &'static ProtocolDefinition,
    /// Current state (atomic so registries can share the engine by reference)
    state: CachePadded<AtomicU8>,
    /// Set once a protocol violation has been reported
    halted: AtomicBool,
    stats: Arc<CoherenceStatistics>,
}

impl CoherenceEngine {
    /// Create an engine for a line on first reference; starts Invalid
    pub fn new(
        cache_id: CacheId,
        address: Address,
        variant: ProtocolVariant,
        stats: Arc<CoherenceStatistics>,
    ) -> Self {
        Self {
            cache_id,
            address,
            definition: variant.definition(),
            state: CachePadded::new(AtomicU8::new(LineState::Invalid as u8)),
            halted: AtomicBool::new(false),
            stats,
        }
    }

    pub fn cache_id(&self) -> CacheId {
        self.cache_id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.definition.variant
    }

    /// Current line state
    ///
    /// Request handling refuses an unrecognized raw value with
    /// `UnsupportedState`; this accessor reports such a line as I.
    pub fn state(&self) -> LineState {
        LineState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(LineState::Invalid)
    }

    /// Short name of the current state, e.g. `"SM"`
    pub fn state_name(&self) -> &'static str {
        self.state().short_name()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Human-readable description of the line for diagnostics
    pub fn dump(&self) -> String {
        let mut out = format!(
            "{} line {:#x} @ {}: {}",
            self.definition.name,
            self.address,
            self.cache_id,
            self.state_name()
        );
        if self.is_halted() {
            out.push_str(" (halted)");
        }
        out
    }

    /// Force the line into `state`
    ///
    /// Used when rebuilding a registry from a snapshot. The state must belong
    /// to this engine's protocol variant.
    pub fn restore_state(&self, state: LineState) -> CoherenceResult<()> {
        if !self.definition.is_legal(state) {
            return Err(CoherenceError::UnsupportedState {
                cache_id: self.cache_id,
                address: self.address,
                protocol: self.definition.name,
                raw_state: state as u8,
            });
        }
        self.state.store(state as u8, Ordering::Release);
        Ok(())
    }

    /// Handle a LOAD or STORE from the local processor
    ///
    /// Must not be called while the line is transient; the registry stalls
    /// the processor until the outstanding DATA arrives.
    pub fn on_cache_request<P: BusPort + ?Sized>(
        &self,
        request: &Request,
        port: &P,
    ) -> CoherenceResult<()> {
        self.ensure_running()?;
        let state = self.checked_state()?;
        match self.definition.cache_transition(state, request.kind) {
            Some(transition) => {
                self.apply(state, transition, request, port);
                Ok(())
            }
            None => Err(self.violation(state, request.kind)),
        }
    }

    /// Handle a GETS, GETM or DATA observed on the bus
    pub fn on_snoop_request<P: BusPort + ?Sized>(
        &self,
        request: &Request,
        port: &P,
    ) -> CoherenceResult<()> {
        self.ensure_running()?;
        let state = self.checked_state()?;
        let context = SnoopContext {
            from_self: request.src_id == port.self_identity(),
            shared_line: request.kind == RequestKind::Data && port.shared_line_was_asserted(),
        };
        match self
            .definition
            .snoop_transition(state, request.kind, context)
        {
            Some(transition) => {
                if !context.from_self
                    && state.is_transient()
                    && transition.next == LineState::InvalidToModified
                    && state != LineState::InvalidToModified
                {
                    log::warn!(
                        "{} line {:#x}: {} preempted by {} from {}",
                        self.cache_id,
                        self.address,
                        state,
                        request.kind,
                        request.src_id
                    );
                }
                self.apply(state, transition, request, port);
                Ok(())
            }
            None => Err(self.violation(state, request.kind)),
        }
    }

    /// Decode the stored state, halting if it is not legal for the variant
    fn checked_state(&self) -> CoherenceResult<LineState> {
        let raw = self.state.load(Ordering::Acquire);
        match LineState::from_u8(raw) {
            Some(state) if self.definition.is_legal(state) => Ok(state),
            _ => {
                self.halted.store(true, Ordering::Release);
                self.stats.record_violation();
                let error = CoherenceError::UnsupportedState {
                    cache_id: self.cache_id,
                    address: self.address,
                    protocol: self.definition.name,
                    raw_state: raw,
                };
                log::error!("{}", error);
                Err(error)
            }
        }
    }

    fn ensure_running(&self) -> CoherenceResult<()> {
        if self.is_halted() {
            return Err(CoherenceError::EngineHalted {
                cache_id: self.cache_id,
                address: self.address,
            });
        }
        Ok(())
    }

    fn apply<P: BusPort + ?Sized>(
        &self,
        from: LineState,
        transition: Transition,
        request: &Request,
        port: &P,
    ) {
        if transition.is_silent(from) {
            return;
        }
        if transition.next != from {
            self.state.store(transition.next as u8, Ordering::Release);
            self.stats.record_transition();
        }
        log::trace!(
            "{} line {:#x}: {} --{}--> {}",
            self.cache_id,
            self.address,
            from,
            request.kind,
            transition.next
        );

        for action in transition.actions {
            match action {
                Action::IssueGets => {
                    port.issue_share_request(self.address);
                    self.stats.record_bus_request();
                }
                Action::IssueGetm => {
                    port.issue_modify_request(self.address);
                    self.stats.record_bus_request();
                }
                Action::SupplyToProcessor => {
                    port.supply_to_processor(self.address);
                    self.stats.record_processor_supply();
                }
                Action::SupplyOnBus => {
                    port.supply_on_bus(self.address, request.src_id);
                    self.stats.record_bus_supply();
                }
                Action::AssertSharedLine => {
                    port.assert_shared_line();
                    self.stats.record_shared_line_assertion();
                }
                Action::CountCacheMiss => self.stats.record_cache_miss(),
                Action::CountCoherenceMiss => self.stats.record_coherence_miss(),
                Action::CountSilentUpgrade => self.stats.record_silent_upgrade(),
            }
        }
    }

    /// Halt the engine and build the fatal error
    fn violation(&self, state: LineState, kind: RequestKind) -> CoherenceError {
        self.halted.store(true, Ordering::Release);
        self.stats.record_violation();
        let error = CoherenceError::ProtocolViolation {
            cache_id: self.cache_id,
            address: self.address,
            protocol: self.definition.name,
            state,
            kind,
        };
        log::error!("{}", error);
        error
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::coherence::statistics::CoherenceStatisticsSnapshot;
    use std::cell::{Cell, RefCell};

    /// Bus port that records every hook call
    #[derive(Debug, Default)]
    pub(crate) struct RecordingPort {
        pub id: CacheId,
        pub shared_line: Cell<bool>,
        pub calls: RefCell<Vec<PortCall>>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum PortCall {
        Gets(Address),
        Getm(Address),
        ToProcessor(Address),
        OnBus(Address, CacheId),
        AssertShared,
    }

    impl RecordingPort {
        pub fn new(id: u8) -> Self {
            Self {
                id: CacheId(id),
                ..Default::default()
            }
        }

        pub fn take(&self) -> Vec<PortCall> {
            self.calls.take()
        }
    }

    impl BusPort for RecordingPort {
        fn self_identity(&self) -> CacheId {
            self.id
        }
        fn issue_share_request(&self, address: Address) {
            self.calls.borrow_mut().push(PortCall::Gets(address));
        }
        fn issue_modify_request(&self, address: Address) {
            self.calls.borrow_mut().push(PortCall::Getm(address));
        }
        fn supply_to_processor(&self, address: Address) {
            self.calls.borrow_mut().push(PortCall::ToProcessor(address));
        }
        fn supply_on_bus(&self, address: Address, destination: CacheId) {
            self.calls
                .borrow_mut()
                .push(PortCall::OnBus(address, destination));
        }
        fn assert_shared_line(&self) {
            self.shared_line.set(true);
            self.calls.borrow_mut().push(PortCall::AssertShared);
        }
        fn shared_line_was_asserted(&self) -> bool {
            self.shared_line.get()
        }
    }

    const ADDR: Address = 0x100;
    const SELF: CacheId = CacheId(0);
    const OTHER: CacheId = CacheId(1);

    fn engine(variant: ProtocolVariant) -> (CoherenceEngine, Arc<CoherenceStatistics>) {
        let stats = Arc::new(CoherenceStatistics::new());
        (CoherenceEngine::new(SELF, ADDR, variant, stats.clone()), stats)
    }

    fn engine_in(variant: ProtocolVariant, state: LineState) -> CoherenceEngine {
        let (engine, _) = engine(variant);
        engine.restore_state(state).unwrap();
        engine
    }

    #[test]
    fn test_round_trip_load_fills_exclusive_then_hits() {
        let port = RecordingPort::new(0);
        let (engine, stats) = engine(ProtocolVariant::Mesi);

        engine.on_cache_request(&Request::load(ADDR, SELF), &port).unwrap();
        assert_eq!(engine.state(), LineState::InvalidToShared);
        assert_eq!(port.take(), vec![PortCall::Gets(ADDR)]);

        engine.on_snoop_request(&Request::gets(ADDR, SELF), &port).unwrap();
        engine.on_snoop_request(&Request::data(ADDR, SELF), &port).unwrap();
        assert_eq!(engine.state(), LineState::Exclusive);
        assert_eq!(port.take(), vec![PortCall::ToProcessor(ADDR)]);

        engine.on_cache_request(&Request::load(ADDR, SELF), &port).unwrap();
        assert_eq!(engine.state(), LineState::Exclusive);
        assert_eq!(port.take(), vec![PortCall::ToProcessor(ADDR)]);

        let snap = stats.get_snapshot();
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.bus_requests, 1);
        assert_eq!(snap.total_transitions, 2);
    }

    #[test]
    fn test_round_trip_without_exclusive_fills_shared() {
        for variant in [ProtocolVariant::Msi, ProtocolVariant::Mosi] {
            let port = RecordingPort::new(0);
            let (engine, _) = engine(variant);
            engine.on_cache_request(&Request::load(ADDR, SELF), &port).unwrap();
            engine.on_snoop_request(&Request::data(ADDR, SELF), &port).unwrap();
            assert_eq!(engine.state(), LineState::Shared, "{}", variant);
        }
    }

    #[test]
    fn test_hits_produce_no_bus_traffic() {
        let hits = [
            (ProtocolVariant::Mesi, LineState::Shared, RequestKind::Load),
            (ProtocolVariant::Mesi, LineState::Exclusive, RequestKind::Load),
            (ProtocolVariant::Moesi, LineState::Owned, RequestKind::Load),
            (ProtocolVariant::Moesif, LineState::Forward, RequestKind::Load),
            (ProtocolVariant::Msi, LineState::Modified, RequestKind::Load),
            (ProtocolVariant::Msi, LineState::Modified, RequestKind::Store),
        ];
        for (variant, state, kind) in hits {
            let port = RecordingPort::new(0);
            let engine = engine_in(variant, state);
            engine
                .on_cache_request(&Request::new(kind, ADDR, SELF), &port)
                .unwrap();
            assert_eq!(engine.state(), state);
            assert_eq!(port.take(), vec![PortCall::ToProcessor(ADDR)]);
        }
    }

    #[test]
    fn test_silent_upgrade_counts_no_miss() {
        for variant in [ProtocolVariant::Mesi, ProtocolVariant::Moesif] {
            let port = RecordingPort::new(0);
            let (engine, stats) = engine(variant);
            engine.restore_state(LineState::Exclusive).unwrap();
            engine.on_cache_request(&Request::store(ADDR, SELF), &port).unwrap();
            assert_eq!(engine.state(), LineState::Modified);
            assert_eq!(port.take(), vec![PortCall::ToProcessor(ADDR)]);
            let snap = stats.get_snapshot();
            assert_eq!(snap.silent_upgrades, 1);
            assert_eq!(snap.cache_misses, 0);
            assert_eq!(snap.bus_requests, 0);
        }
    }

    #[test]
    fn test_shared_store_is_coherence_miss() {
        let port = RecordingPort::new(0);
        let (engine, stats) = engine(ProtocolVariant::Msi);
        engine.restore_state(LineState::Shared).unwrap();
        engine.on_cache_request(&Request::store(ADDR, SELF), &port).unwrap();
        assert_eq!(engine.state(), LineState::SharedToModified);
        assert_eq!(port.take(), vec![PortCall::Getm(ADDR)]);
        let snap = stats.get_snapshot();
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.coherence_misses, 1);
    }

    #[test]
    fn test_modified_snooping_getm_supplies_once_and_invalidates() {
        for variant in ProtocolVariant::ALL {
            let port = RecordingPort::new(0);
            let engine = engine_in(variant, LineState::Modified);
            engine.on_snoop_request(&Request::getm(ADDR, OTHER), &port).unwrap();
            assert_eq!(engine.state(), LineState::Invalid);
            let supplies: Vec<_> = port
                .take()
                .into_iter()
                .filter(|c| matches!(c, PortCall::OnBus(..)))
                .collect();
            assert_eq!(supplies, vec![PortCall::OnBus(ADDR, OTHER)]);
        }
    }

    #[test]
    fn test_shared_to_modified_race_rules() {
        let port = RecordingPort::new(0);
        let engine = engine_in(ProtocolVariant::Mesi, LineState::SharedToModified);

        // own GETM winning arbitration
        engine.on_snoop_request(&Request::getm(ADDR, SELF), &port).unwrap();
        assert_eq!(engine.state(), LineState::SharedToModified);
        assert!(port.take().is_empty());

        // foreign GETM preempts the upgrade
        engine.on_snoop_request(&Request::getm(ADDR, OTHER), &port).unwrap();
        assert_eq!(engine.state(), LineState::InvalidToModified);

        engine.on_snoop_request(&Request::data(ADDR, SELF), &port).unwrap();
        assert_eq!(engine.state(), LineState::Modified);
        assert_eq!(port.take(), vec![PortCall::ToProcessor(ADDR)]);
    }

    #[test]
    fn test_shared_to_modified_foreign_gets_asserts_and_preempts() {
        let port = RecordingPort::new(0);
        let engine = engine_in(ProtocolVariant::Moesi, LineState::SharedToModified);
        engine.on_snoop_request(&Request::gets(ADDR, OTHER), &port).unwrap();
        assert_eq!(port.take(), vec![PortCall::AssertShared]);
        assert_eq!(engine.state(), LineState::InvalidToModified);
    }

    #[test]
    fn test_owned_to_modified_keeps_answering() {
        let port = RecordingPort::new(0);
        let engine = engine_in(ProtocolVariant::Mosi, LineState::OwnedToModified);

        engine.on_snoop_request(&Request::gets(ADDR, OTHER), &port).unwrap();
        assert_eq!(engine.state(), LineState::OwnedToModified);
        assert_eq!(
            port.take(),
            vec![PortCall::AssertShared, PortCall::OnBus(ADDR, OTHER)]
        );

        engine.on_snoop_request(&Request::data(ADDR, SELF), &port).unwrap();
        assert_eq!(engine.state(), LineState::Modified);
        assert!(port.take().is_empty());
    }

    #[test]
    fn test_forward_to_modified_supplies_then_resolves() {
        let port = RecordingPort::new(0);
        let engine = engine_in(ProtocolVariant::Moesif, LineState::ForwardToModified);

        engine.on_snoop_request(&Request::getm(ADDR, SELF), &port).unwrap();
        assert_eq!(engine.state(), LineState::ForwardToModified);
        assert_eq!(port.take(), vec![PortCall::OnBus(ADDR, SELF)]);

        engine.on_snoop_request(&Request::data(ADDR, SELF), &port).unwrap();
        assert_eq!(engine.state(), LineState::Modified);
        assert_eq!(port.take(), vec![PortCall::ToProcessor(ADDR)]);
    }

    #[test]
    fn test_invalid_to_shared_reads_shared_line_on_data() {
        let port = RecordingPort::new(0);
        let engine = engine_in(ProtocolVariant::Moesif, LineState::InvalidToShared);
        port.shared_line.set(true);
        engine.on_snoop_request(&Request::data(ADDR, SELF), &port).unwrap();
        assert_eq!(engine.state(), LineState::Shared);
    }

    #[test]
    fn test_cache_request_while_transient_is_fatal_and_halts() {
        let port = RecordingPort::new(0);
        let (engine, stats) = engine(ProtocolVariant::Mesi);
        engine.restore_state(LineState::InvalidToShared).unwrap();

        let err = engine
            .on_cache_request(&Request::store(ADDR, SELF), &port)
            .unwrap_err();
        assert_eq!(
            err,
            CoherenceError::ProtocolViolation {
                cache_id: SELF,
                address: ADDR,
                protocol: "MESI",
                state: LineState::InvalidToShared,
                kind: RequestKind::Store,
            }
        );
        assert!(engine.is_halted());
        assert_eq!(stats.get_snapshot().protocol_violations, 1);

        // no further mutation, not even for otherwise legal events
        let err = engine
            .on_snoop_request(&Request::data(ADDR, SELF), &port)
            .unwrap_err();
        assert!(matches!(err, CoherenceError::EngineHalted { .. }));
        assert_eq!(engine.state(), LineState::InvalidToShared);
        assert!(port.take().is_empty());
        assert!(engine.dump().ends_with("(halted)"));
    }

    #[test]
    fn test_wrong_side_event_is_fatal() {
        let port = RecordingPort::new(0);
        let engine = engine_in(ProtocolVariant::Msi, LineState::Shared);
        let err = engine
            .on_snoop_request(&Request::load(ADDR, SELF), &port)
            .unwrap_err();
        assert!(matches!(
            err,
            CoherenceError::ProtocolViolation {
                state: LineState::Shared,
                kind: RequestKind::Load,
                ..
            }
        ));
        assert_eq!(engine.state(), LineState::Shared);
    }

    #[test]
    fn test_pending_fill_ignores_foreign_requests() {
        let pending = [LineState::InvalidToShared, LineState::InvalidToModified];
        let foreign = [Request::gets(ADDR, OTHER), Request::getm(ADDR, OTHER)];
        for variant in ProtocolVariant::ALL {
            for state in pending {
                for request in &foreign {
                    let port = RecordingPort::new(0);
                    let (engine, stats) = engine(variant);
                    engine.restore_state(state).unwrap();
                    engine.on_snoop_request(request, &port).unwrap();
                    assert_eq!(engine.state(), state, "{} {} {}", variant, state, request.kind);
                    assert!(port.take().is_empty());
                    assert!(!port.shared_line.get());
                    assert_eq!(stats.get_snapshot(), CoherenceStatisticsSnapshot::default());
                }
            }
        }
    }

    #[test]
    fn test_pending_fill_resolves_after_foreign_getm() {
        let port = RecordingPort::new(0);
        let engine = engine_in(ProtocolVariant::Mesi, LineState::InvalidToShared);
        engine.on_snoop_request(&Request::getm(ADDR, OTHER), &port).unwrap();
        engine.on_snoop_request(&Request::data(ADDR, SELF), &port).unwrap();
        assert_eq!(engine.state(), LineState::Exclusive);
        assert_eq!(port.take(), vec![PortCall::ToProcessor(ADDR)]);

        let engine = engine_in(ProtocolVariant::Msi, LineState::InvalidToModified);
        engine.on_snoop_request(&Request::gets(ADDR, OTHER), &port).unwrap();
        engine.on_snoop_request(&Request::getm(ADDR, OTHER), &port).unwrap();
        engine.on_snoop_request(&Request::data(ADDR, SELF), &port).unwrap();
        assert_eq!(engine.state(), LineState::Modified);
        assert_eq!(port.take(), vec![PortCall::ToProcessor(ADDR)]);
    }

    #[test]
    fn test_corrupt_raw_state_is_rejected_and_halts() {
        let port = RecordingPort::new(0);
        for (variant, raw) in [(ProtocolVariant::Moesi, 200), (ProtocolVariant::Mesi, 4)] {
            let (engine, stats) = engine(variant);
            engine.state.store(raw, Ordering::Release);

            let err = engine
                .on_cache_request(&Request::load(ADDR, SELF), &port)
                .unwrap_err();
            assert_eq!(
                err,
                CoherenceError::UnsupportedState {
                    cache_id: SELF,
                    address: ADDR,
                    protocol: variant.name(),
                    raw_state: raw,
                }
            );
            assert!(engine.is_halted());
            assert_eq!(stats.get_snapshot().protocol_violations, 1);

            let err = engine
                .on_snoop_request(&Request::gets(ADDR, OTHER), &port)
                .unwrap_err();
            assert!(matches!(err, CoherenceError::EngineHalted { .. }));
        }
        assert!(port.take().is_empty());
    }

    #[test]
    fn test_restore_rejects_states_outside_variant() {
        let (engine, _) = engine(ProtocolVariant::Msi);
        let err = engine.restore_state(LineState::Forward).unwrap_err();
        assert!(matches!(
            err,
            CoherenceError::UnsupportedState { protocol: "MSI", .. }
        ));
        assert_eq!(engine.state(), LineState::Invalid);
    }

    #[test]
    fn test_dump_names_protocol_line_and_state() {
        let engine = engine_in(ProtocolVariant::Moesif, LineState::ForwardToModified);
        assert_eq!(engine.dump(), "MOESIF line 0x100 @ cache 0: FM");
        assert_eq!(engine.state_name(), "FM");
    }
}
