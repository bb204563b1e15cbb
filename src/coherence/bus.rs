//! Simulated snooping bus
//!
//! Connects one `LineRegistry` per cache to a single totally-ordered queue of
//! GETS/GETM transactions. Each `step` plays one transaction to completion:
//! the shared line is reset, the request is broadcast to every cache
//! (including the issuer), then DATA is delivered to the issuer.
//!
//! The first fatal error halts the whole bus. Every later request or step
//! returns that error again.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};

use crate::coherence::communication::{
    BusPort, CoherenceError, CoherenceResult, Request, RequestKind,
};
use crate::coherence::data_structures::{Address, CacheId, LineState};
use crate::coherence::protocol::ProtocolVariant;
use crate::coherence::registry::LineRegistry;
use crate::coherence::statistics::CoherenceStatisticsSnapshot;
use crate::config::SimulatorConfig;

/// Bus request waiting for its turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTransaction {
    pub kind: RequestKind,
    pub address: Address,
    pub requester: CacheId,
}

/// Data movement observed while transactions played out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// A cache completed its processor's pending access
    ProcessorSupplied { cache_id: CacheId, address: Address },
    /// A cache answered a snooped request
    CacheSupplied {
        from: CacheId,
        to: CacheId,
        address: Address,
    },
    /// No cache answered; memory provided the data
    MemorySupplied { to: CacheId, address: Address },
}

/// Events retained by `drain_events` before the oldest are discarded
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 1024;

/// Wired-OR shared signal for the transaction in flight
#[derive(Debug, Default)]
pub struct SharedLine {
    asserted: AtomicBool,
}

impl SharedLine {
    pub fn assert(&self) {
        self.asserted.store(true, Ordering::Release);
    }

    pub fn was_asserted(&self) -> bool {
        self.asserted.load(Ordering::Acquire)
    }

    /// Clear before a new transaction begins
    pub fn reset(&self) {
        self.asserted.store(false, Ordering::Release);
    }
}

/// Broadcast bus connecting every private cache
#[derive(Debug)]
pub struct SnoopBus {
    variant: ProtocolVariant,
    caches: Vec<LineRegistry>,
    shared_line: SharedLine,
    check_invariants: bool,
    pending_tx: Sender<BusTransaction>,
    pending_rx: Receiver<BusTransaction>,
    /// Ring of recent events; zero capacity disables recording
    event_log_capacity: usize,
    events_tx: Sender<BusEvent>,
    events_rx: Receiver<BusEvent>,
    dropped_events: AtomicU64,
    /// Cache-to-cache supplies in the current transaction
    supplies_in_flight: AtomicU64,
    completed_transactions: AtomicU64,
    /// First fatal error; set once
    halted: OnceLock<CoherenceError>,
}

/// Bus port handed to the engines of one cache
struct CachePort<'a> {
    bus: &'a SnoopBus,
    cache_id: CacheId,
}

impl CachePort<'_> {
    fn enqueue(&self, kind: RequestKind, address: Address) {
        let transaction = BusTransaction {
            kind,
            address,
            requester: self.cache_id,
        };
        if self.bus.pending_tx.send(transaction).is_err() {
            log::error!("{} could not queue {} for {:#x}", self.cache_id, kind, address);
        }
    }

    fn record(&self, event: BusEvent) {
        let bus = self.bus;
        if bus.event_log_capacity == 0 {
            return;
        }
        let mut event = event;
        loop {
            match bus.events_tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    // discard the oldest entry to make room
                    if bus.events_rx.try_recv().is_ok() {
                        bus.dropped_events.fetch_add(1, Ordering::Relaxed);
                    }
                    event = rejected;
                }
                Err(TrySendError::Disconnected(rejected)) => {
                    log::error!("bus event dropped: {:?}", rejected);
                    return;
                }
            }
        }
    }
}

impl BusPort for CachePort<'_> {
    fn self_identity(&self) -> CacheId {
        self.cache_id
    }

    fn issue_share_request(&self, address: Address) {
        self.enqueue(RequestKind::Gets, address);
    }

    fn issue_modify_request(&self, address: Address) {
        self.enqueue(RequestKind::Getm, address);
    }

    fn supply_to_processor(&self, address: Address) {
        self.record(BusEvent::ProcessorSupplied {
            cache_id: self.cache_id,
            address,
        });
    }

    fn supply_on_bus(&self, address: Address, destination: CacheId) {
        self.bus.supplies_in_flight.fetch_add(1, Ordering::Relaxed);
        self.record(BusEvent::CacheSupplied {
            from: self.cache_id,
            to: destination,
            address,
        });
    }

    fn assert_shared_line(&self) {
        self.bus.shared_line.assert();
    }

    fn shared_line_was_asserted(&self) -> bool {
        self.bus.shared_line.was_asserted()
    }
}

impl SnoopBus {
    pub fn new(variant: ProtocolVariant, num_caches: u8) -> Self {
        let (pending_tx, pending_rx) = unbounded();
        let (events_tx, events_rx) = bounded(DEFAULT_EVENT_LOG_CAPACITY);
        Self {
            variant,
            caches: (0..num_caches)
                .map(|id| LineRegistry::new(CacheId(id), variant))
                .collect(),
            shared_line: SharedLine::default(),
            check_invariants: true,
            pending_tx,
            pending_rx,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            events_tx,
            events_rx,
            dropped_events: AtomicU64::new(0),
            supplies_in_flight: AtomicU64::new(0),
            completed_transactions: AtomicU64::new(0),
            halted: OnceLock::new(),
        }
    }

    pub fn from_config(config: &SimulatorConfig) -> Self {
        let mut bus = Self::new(config.protocol, config.num_caches)
            .with_event_log_capacity(config.event_log_capacity);
        bus.check_invariants = config.check_invariants;
        bus
    }

    /// Keep at most `capacity` undrained events; zero disables recording
    pub fn with_event_log_capacity(mut self, capacity: usize) -> Self {
        let (events_tx, events_rx) = bounded(capacity.max(1));
        self.event_log_capacity = capacity;
        self.events_tx = events_tx;
        self.events_rx = events_rx;
        self
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    pub fn caches(&self) -> &[LineRegistry] {
        &self.caches
    }

    pub fn cache(&self, cache_id: CacheId) -> CoherenceResult<&LineRegistry> {
        self.caches
            .get(cache_id.index())
            .ok_or(CoherenceError::UnknownCache(cache_id))
    }

    fn port(&self, cache_id: CacheId) -> CachePort<'_> {
        CachePort {
            bus: self,
            cache_id,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.get().is_some()
    }

    /// Error that halted the bus, if any
    pub fn halt_reason(&self) -> Option<&CoherenceError> {
        self.halted.get()
    }

    fn ensure_running(&self) -> CoherenceResult<()> {
        match self.halted.get() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    /// Record a fatal error as the reason the bus stopped
    fn halt(&self, error: CoherenceError) -> CoherenceError {
        if error.is_fatal() && self.halted.set(error.clone()).is_ok() {
            log::error!("bus halted: {}", error);
        }
        error
    }

    /// Dispatch a processor access to `cache_id`
    pub fn processor_request(
        &self,
        cache_id: CacheId,
        kind: RequestKind,
        address: Address,
    ) -> CoherenceResult<()> {
        self.ensure_running()?;
        let registry = self.cache(cache_id)?;
        registry
            .dispatch_cache_request(&Request::new(kind, address, cache_id), &self.port(cache_id))
            .map_err(|error| self.halt(error))
    }

    pub fn load(&self, cache_id: CacheId, address: Address) -> CoherenceResult<()> {
        self.processor_request(cache_id, RequestKind::Load, address)
    }

    pub fn store(&self, cache_id: CacheId, address: Address) -> CoherenceResult<()> {
        self.processor_request(cache_id, RequestKind::Store, address)
    }

    /// Transactions queued behind the one in flight
    pub fn pending(&self) -> usize {
        self.pending_rx.len()
    }

    pub fn completed_transactions(&self) -> u64 {
        self.completed_transactions.load(Ordering::Relaxed)
    }

    /// Play the next queued transaction; `Ok(false)` when the bus is idle
    pub fn step(&self) -> CoherenceResult<bool> {
        self.ensure_running()?;
        let Ok(transaction) = self.pending_rx.try_recv() else {
            return Ok(false);
        };
        self.play(transaction)
            .map(|()| true)
            .map_err(|error| self.halt(error))
    }

    fn play(&self, transaction: BusTransaction) -> CoherenceResult<()> {
        let BusTransaction {
            kind,
            address,
            requester,
        } = transaction;

        self.shared_line.reset();
        self.supplies_in_flight.store(0, Ordering::Relaxed);
        log::debug!("bus: {} {:#x} from {}", kind, address, requester);

        let request = Request::new(kind, address, requester);
        for registry in &self.caches {
            registry.dispatch_snoop_request(&request, &self.port(registry.cache_id()))?;
        }

        if self.supplies_in_flight.load(Ordering::Relaxed) == 0 {
            self.port(requester).record(BusEvent::MemorySupplied {
                to: requester,
                address,
            });
        }

        let data = Request::data(address, requester);
        self.cache(requester)?
            .dispatch_snoop_request(&data, &self.port(requester))?;
        self.completed_transactions.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "bus: {} {:#x} complete (shared line {})",
            kind,
            address,
            self.shared_line.was_asserted()
        );

        if self.check_invariants {
            self.check_exclusivity(address)?;
        }
        Ok(())
    }

    /// Drain the queue; returns the number of transactions played
    pub fn run_until_idle(&self) -> CoherenceResult<usize> {
        let mut played = 0;
        while self.step()? {
            played += 1;
        }
        Ok(played)
    }

    /// Take every event recorded since the last call
    pub fn drain_events(&self) -> Vec<BusEvent> {
        self.events_rx.try_iter().collect()
    }

    /// Events discarded because the log was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn state_of(&self, cache_id: CacheId, address: Address) -> CoherenceResult<LineState> {
        Ok(self.cache(cache_id)?.peek_state(address))
    }

    /// Per-cache states for `address`, indexed by cache
    pub fn states(&self, address: Address) -> Vec<LineState> {
        self.caches
            .iter()
            .map(|registry| registry.peek_state(address))
            .collect()
    }

    /// Enforce the single-writer invariant for `address`
    ///
    /// At most one cache may be in M, O, E or F, and an E or M holder
    /// excludes every other valid copy. Lines with a request outstanding are
    /// not yet counted.
    pub fn check_exclusivity(&self, address: Address) -> CoherenceResult<()> {
        let holders: Vec<(CacheId, LineState)> = self
            .caches
            .iter()
            .map(|registry| (registry.cache_id(), registry.peek_state(address)))
            .filter(|(_, state)| state.is_valid())
            .collect();

        let owners = holders.iter().filter(|(_, state)| state.is_owner()).count();
        let exclusive = holders
            .iter()
            .any(|(_, state)| state.can_write());
        if owners > 1 || (exclusive && holders.len() > 1) {
            let error = CoherenceError::ExclusivityViolated { address, holders };
            log::error!("{}", error);
            return Err(error);
        }
        Ok(())
    }

    /// Enforce the invariant for every address any cache tracks
    pub fn check_all(&self) -> CoherenceResult<()> {
        let mut addresses: Vec<Address> = self
            .caches
            .iter()
            .flat_map(|registry| registry.snapshot().into_iter().map(|(address, _)| address))
            .collect();
        addresses.sort_unstable();
        addresses.dedup();
        addresses
            .into_iter()
            .try_for_each(|address| self.check_exclusivity(address))
    }

    /// Zero every cache's counters, e.g. after a warm-up phase
    pub fn reset_statistics(&self) {
        self.caches.iter().for_each(LineRegistry::reset_statistics);
    }

    /// Counters summed over every cache
    pub fn statistics(&self) -> CoherenceStatisticsSnapshot {
        self.caches
            .iter()
            .map(LineRegistry::statistics)
            .fold(CoherenceStatisticsSnapshot::default(), |acc, snap| {
                acc.merge(&snap)
            })
    }
}
