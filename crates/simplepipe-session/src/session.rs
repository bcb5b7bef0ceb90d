use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use simplepipe_frame::{PipeEvent, PipeKey};

use crate::buffer::{DeliveryBuffer, EnqueueOutcome, Reservation};
use crate::compound::CompoundSlots;
use crate::handler::{HandlerTable, PipeCloser, PipeHandler};

/// Timestamps driving the liveness policy.
#[derive(Debug, Clone, Copy)]
pub struct Timers {
    pub last_setup: Instant,
    pub last_live_detected: Instant,
    pub last_pipe_notified: Option<Instant>,
    pub last_pipe_data_received: Option<Instant>,
}

impl Timers {
    fn new(now: Instant) -> Self {
        Self {
            last_setup: now,
            last_live_detected: now,
            last_pipe_notified: None,
            last_pipe_data_received: None,
        }
    }

    /// Last confirmed traffic, or the setup time if there was none.
    pub fn last_traffic(&self) -> Instant {
        self.last_pipe_data_received.unwrap_or(self.last_setup)
    }
}

/// One end of a push channel.
///
/// A session is live while it is alive, not destroyed and registered under a
/// key. Sequences only move forward.
pub struct PipeSession {
    key: RwLock<Option<PipeKey>>,
    alive: AtomicBool,
    destroyed: AtomicBool,
    lost: AtomicBool,
    managed: bool,
    pipe_sequence: AtomicU64,
    notify_sequence: AtomicU64,
    last_hash: AtomicU64,
    request_counter: AtomicU64,
    failed_retries: AtomicU32,
    timers: Mutex<Timers>,
    buffer: Mutex<Option<DeliveryBuffer>>,
    data_ready: Condvar,
    handler: Arc<dyn PipeHandler>,
    handlers: HandlerTable,
    closer: Option<Arc<dyn PipeCloser>>,
    wait_closing: Option<Duration>,
    slots: Option<Mutex<CompoundSlots>>,
    pub(crate) destroy_scheduled: AtomicBool,
    pub(crate) closing_invoked: AtomicBool,
    pub(crate) monitored: AtomicBool,
}

impl PipeSession {
    pub fn new(handler: Arc<dyn PipeHandler>) -> Self {
        let now = Instant::now();
        Self {
            key: RwLock::new(None),
            alive: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            managed: true,
            pipe_sequence: AtomicU64::new(1),
            notify_sequence: AtomicU64::new(1),
            last_hash: AtomicU64::new(0),
            request_counter: AtomicU64::new(0),
            failed_retries: AtomicU32::new(0),
            timers: Mutex::new(Timers::new(now)),
            buffer: Mutex::new(None),
            data_ready: Condvar::new(),
            handler,
            handlers: HandlerTable::new(),
            closer: None,
            wait_closing: None,
            slots: None,
            destroy_scheduled: AtomicBool::new(false),
            closing_invoked: AtomicBool::new(false),
            monitored: AtomicBool::new(false),
        }
    }

    /// A session fanning out over `capacity` constituent sessions.
    pub fn compound(handler: Arc<dyn PipeHandler>, capacity: usize) -> Self {
        let mut session = Self::new(handler);
        session.slots = Some(Mutex::new(CompoundSlots::new(capacity, Instant::now())));
        session
    }

    pub fn with_handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_closer(mut self, closer: Arc<dyn PipeCloser>) -> Self {
        self.closer = Some(closer);
        self
    }

    /// Override the process-wide closing-wait for this session.
    pub fn with_wait_closing(mut self, wait: Duration) -> Self {
        self.wait_closing = Some(wait);
        self
    }

    /// Keep this session out of the shared sweep; it gets a private monitor.
    pub fn unmanaged(mut self) -> Self {
        self.managed = false;
        self
    }

    pub fn key(&self) -> Option<PipeKey> {
        *self.key.read()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn is_live(&self) -> bool {
        self.is_alive() && !self.is_destroyed() && self.key.read().is_some()
    }

    pub fn is_managed(&self) -> bool {
        self.managed
    }

    pub fn is_compound(&self) -> bool {
        self.slots.is_some()
    }

    pub fn pipe_sequence(&self) -> u64 {
        self.pipe_sequence.load(Ordering::Acquire)
    }

    pub fn notify_sequence(&self) -> u64 {
        self.notify_sequence.load(Ordering::Acquire)
    }

    pub fn last_hash(&self) -> u64 {
        self.last_hash.load(Ordering::Acquire)
    }

    /// Raise the pipe sequence to at least `sequence`; returns the new value.
    pub fn raise_pipe_sequence(&self, sequence: u64) -> u64 {
        self.pipe_sequence
            .fetch_max(sequence, Ordering::AcqRel)
            .max(sequence)
    }

    /// Record that the peer has observed everything up to `sequence`.
    pub fn raise_notify_sequence(&self, sequence: u64) -> u64 {
        self.notify_sequence
            .fetch_max(sequence, Ordering::AcqRel)
            .max(sequence)
    }

    /// Whether the peer has not yet observed the latest sequence.
    pub fn has_unacknowledged(&self) -> bool {
        self.pipe_sequence() != self.notify_sequence()
    }

    pub fn next_request_counter(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn query_failed_retries(&self) -> u32 {
        self.failed_retries.load(Ordering::Acquire)
    }

    /// Count a failed delivery attempt; returns the new count.
    pub fn record_failure(&self) -> u32 {
        self.failed_retries.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn reset_failures(&self) {
        self.failed_retries.store(0, Ordering::Release);
    }

    /// Confirmed traffic from or to the peer.
    pub fn record_traffic(&self, now: Instant) {
        self.reset_failures();
        self.timers.lock().last_pipe_data_received = Some(now);
    }

    pub fn timers(&self) -> Timers {
        *self.timers.lock()
    }

    pub fn touch_live(&self, now: Instant) {
        self.timers.lock().last_live_detected = now;
    }

    pub fn mark_notified(&self, now: Instant) {
        self.timers.lock().last_pipe_notified = Some(now);
    }

    pub fn wait_closing_or(&self, default: Duration) -> Duration {
        self.wait_closing.unwrap_or(default)
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.lock().is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.lock().as_ref().map_or(0, DeliveryBuffer::pending_len)
    }

    /// Pending items accepted by `filter`.
    pub fn clone_pending(&self, filter: impl Fn(&dyn PipeEvent) -> bool) -> Vec<Arc<dyn PipeEvent>> {
        self.buffer
            .lock()
            .as_ref()
            .map(|buffer| buffer.clone_pending(filter))
            .unwrap_or_default()
    }

    /// Block until data is pending, the session dies, or `timeout` elapses.
    /// Returns false on timeout.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        let mut guard = self.buffer.lock();
        if self.ready(&guard) {
            return true;
        }
        let result = self.data_ready.wait_for(&mut guard, timeout);
        !result.timed_out() || self.ready(&guard)
    }

    /// Hand an event to the typed handler table, then to the handler fallback.
    pub fn deal(&self, event: &Arc<dyn PipeEvent>) -> bool {
        if let Some(handled) = self.handlers.dispatch(self, event.as_ref()) {
            return handled;
        }
        let handled = self.handler.deal(self, event);
        if !handled {
            tracing::debug!(key = ?self.key(), tag = event.tag(), "unhandled pipe event");
        }
        handled
    }

    pub fn handler(&self) -> &dyn PipeHandler {
        self.handler.as_ref()
    }

    pub fn closer(&self) -> Option<&Arc<dyn PipeCloser>> {
        self.closer.as_ref()
    }

    /// Slot table of a compound session.
    pub fn slots(&self) -> Option<MutexGuard<'_, CompoundSlots>> {
        self.slots.as_ref().map(|slots| slots.lock())
    }

    /// The session whose buffer receives and delivers this pipe's data: the
    /// active slot of a compound session, otherwise the session itself.
    pub fn delivery_target(self: &Arc<Self>) -> Arc<PipeSession> {
        self.slots()
            .and_then(|slots| slots.active().cloned())
            .unwrap_or_else(|| Arc::clone(self))
    }

    /// Set the key only if the session has none yet.
    pub(crate) fn claim_key(&self, key: PipeKey) -> bool {
        let mut slot = self.key.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(key);
        true
    }

    pub(crate) fn set_key(&self, key: PipeKey) {
        *self.key.write() = Some(key);
    }

    pub(crate) fn take_key(&self) -> Option<PipeKey> {
        self.key.write().take()
    }

    pub(crate) fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    /// Returns true for the first caller only.
    pub(crate) fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn mark_lost(&self) -> bool {
        !self.lost.swap(true, Ordering::AcqRel)
    }

    /// Accept `hash` if it is strictly greater than the last one seen.
    pub(crate) fn accept_hash(&self, hash: u64) -> bool {
        self.last_hash
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                (hash > last).then_some(hash)
            })
            .is_ok()
    }

    pub(crate) fn mark_setup(&self, now: Instant) {
        let mut timers = self.timers.lock();
        timers.last_setup = now;
        timers.last_live_detected = now;
    }

    pub(crate) fn init_buffer(&self) {
        self.buffer.lock().get_or_insert_with(DeliveryBuffer::new);
    }

    /// Returns `None` if the session has no buffer.
    pub(crate) fn enqueue(
        &self,
        items: &[Arc<dyn PipeEvent>],
        threshold: usize,
    ) -> Option<EnqueueOutcome> {
        let mut guard = self.buffer.lock();
        let buffer = guard.as_mut()?;
        let outcome = buffer.enqueue(items, threshold);
        if outcome.changed() {
            self.pipe_sequence.fetch_add(1, Ordering::AcqRel);
            self.data_ready.notify_all();
        }
        Some(outcome)
    }

    pub(crate) fn append_raw(&self, items: Vec<Arc<dyn PipeEvent>>) -> Option<usize> {
        let mut guard = self.buffer.lock();
        let buffer = guard.as_mut()?;
        let appended = buffer.append_raw(items);
        if appended > 0 {
            self.pipe_sequence.fetch_add(1, Ordering::AcqRel);
            self.data_ready.notify_all();
        }
        Some(appended)
    }

    /// Reserve items together with the pipe sequence they bring the peer up
    /// to. Returns `None` if the session has no buffer, `Some(None)` if
    /// nothing can be sent right now.
    pub(crate) fn reserve(&self, limit: usize) -> Option<Option<(Reservation, u64)>> {
        let mut guard = self.buffer.lock();
        let buffer = guard.as_mut()?;
        Some(
            buffer
                .reserve(limit)
                .map(|reservation| (reservation, self.pipe_sequence())),
        )
    }

    pub(crate) fn finish_send(&self, reservation: &Reservation, delivered: bool) {
        let mut guard = self.buffer.lock();
        if let Some(buffer) = guard.as_mut() {
            buffer.finish(reservation, delivered);
            if buffer.deliverable_len() > 0 {
                self.data_ready.notify_all();
            }
        }
    }

    /// Move unreserved pending items out of the buffer.
    pub(crate) fn take_open(&self) -> Vec<Arc<dyn PipeEvent>> {
        self.buffer
            .lock()
            .as_mut()
            .map(DeliveryBuffer::take_open)
            .unwrap_or_default()
    }

    /// Drop the buffer and wake every waiter.
    pub(crate) fn release_buffer(&self) {
        let mut guard = self.buffer.lock();
        if let Some(mut buffer) = guard.take() {
            buffer.clear();
        }
        self.data_ready.notify_all();
    }

    /// Empty the buffer but keep it registered.
    pub(crate) fn clear_pending(&self) {
        if let Some(buffer) = self.buffer.lock().as_mut() {
            buffer.clear();
        }
    }

    fn ready(&self, buffer: &Option<DeliveryBuffer>) -> bool {
        buffer.as_ref().map_or(true, |b| b.deliverable_len() > 0) || !self.is_live()
    }
}

impl fmt::Debug for PipeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeSession")
            .field("key", &self.key())
            .field("alive", &self.is_alive())
            .field("destroyed", &self.is_destroyed())
            .field("managed", &self.managed)
            .field("compound", &self.is_compound())
            .field("pipe_sequence", &self.pipe_sequence())
            .field("notify_sequence", &self.notify_sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::handler::NoopHandler;

    fn session() -> PipeSession {
        PipeSession::new(Arc::new(NoopHandler))
    }

    fn key() -> PipeKey {
        "Ab12Cd".parse().unwrap()
    }

    #[test]
    fn live_requires_alive_key_and_not_destroyed() {
        let session = session();
        assert!(!session.is_live());
        session.set_key(key());
        assert!(!session.is_live());
        session.set_alive(true);
        assert!(session.is_live());
        assert!(session.mark_destroyed());
        assert!(!session.mark_destroyed());
        assert!(!session.is_live());
    }

    #[test]
    fn sequences_never_regress() {
        let session = session();
        assert_eq!(session.raise_pipe_sequence(5), 5);
        assert_eq!(session.raise_pipe_sequence(3), 5);
        assert_eq!(session.raise_notify_sequence(4), 4);
        assert_eq!(session.raise_notify_sequence(2), 4);
        assert!(session.has_unacknowledged());
        session.raise_notify_sequence(5);
        assert!(!session.has_unacknowledged());
    }

    #[test]
    fn claim_key_only_once() {
        let session = session();
        assert!(session.claim_key(key()));
        assert!(!session.claim_key("Zz99Yy".parse().unwrap()));
        assert_eq!(session.key(), Some(key()));
        assert_eq!(session.take_key(), Some(key()));
        assert_eq!(session.key(), None);
    }

    #[test]
    fn hash_must_strictly_increase() {
        let session = session();
        assert!(session.accept_hash(5));
        assert!(!session.accept_hash(5));
        assert!(!session.accept_hash(4));
        assert!(session.accept_hash(6));
        assert_eq!(session.last_hash(), 6);
    }

    #[test]
    fn traffic_resets_failures() {
        let session = session();
        assert_eq!(session.record_failure(), 1);
        assert_eq!(session.record_failure(), 2);
        let now = Instant::now();
        session.record_traffic(now);
        assert_eq!(session.query_failed_retries(), 0);
        assert_eq!(session.timers().last_pipe_data_received, Some(now));
    }

    #[test]
    fn enqueue_without_buffer_is_refused() {
        let session = session();
        assert!(session.enqueue(&[], 100).is_none());
        session.init_buffer();
        assert!(session.enqueue(&[], 100).is_some());
    }

    #[test]
    fn release_wakes_waiter() {
        let session = Arc::new(session());
        session.set_key(key());
        session.set_alive(true);
        session.init_buffer();

        let waiter = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.wait_for_data(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        session.set_alive(false);
        session.release_buffer();
        assert!(waiter.join().unwrap());
        assert!(!session.has_buffer());
    }

    #[test]
    fn wait_times_out_without_data() {
        let session = session();
        session.set_key(key());
        session.set_alive(true);
        session.init_buffer();
        assert!(!session.wait_for_data(Duration::from_millis(10)));
    }
}
