use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use simplepipe_frame::{PipeEvent, PipeKey, SEQUENCE_TAG};
use tracing::{debug, trace, warn};

use crate::buffer::EnqueueOutcome;
use crate::config::PipeConfig;
use crate::error::{PipeError, Result};
use crate::reaper::Reaper;
use crate::session::PipeSession;
use crate::stats::{render_statistics, SessionSummary};

/// Concurrent map from pipe key to session.
///
/// Cheap to clone; clones share the same map and background threads. The
/// reaper threads start with the first managed session and stop on
/// [`SessionRegistry::shutdown`] or when the last clone is dropped.
#[derive(Clone)]
pub struct SessionRegistry {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    sessions: DashMap<PipeKey, Arc<PipeSession>>,
    pub(crate) config: PipeConfig,
    pub(crate) reaper: Reaper,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.reaper.signal_stop();
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(PipeConfig::default())
    }
}

impl SessionRegistry {
    pub fn new(config: PipeConfig) -> Self {
        let reaper = Reaper::new(config.destroy_queue_capacity);
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                config,
                reaper,
            }),
        }
    }

    pub fn config(&self) -> &PipeConfig {
        &self.inner.config
    }

    pub fn generate_key() -> PipeKey {
        PipeKey::generate()
    }

    /// Register a session under a fresh key.
    ///
    /// Candidate keys are drawn until one is vacant; the vacancy check and
    /// the insert happen under the same map entry lock, so an existing
    /// registration is never overwritten.
    pub fn register(&self, session: &Arc<PipeSession>) -> Result<PipeKey> {
        if let Some(key) = session.key() {
            warn!(%key, "session is already registered");
            return Err(PipeError::AlreadyRegistered(key));
        }
        let key = loop {
            let candidate = PipeKey::generate();
            match self.inner.sessions.entry(candidate) {
                Entry::Occupied(_) => {
                    debug!(key = %candidate, "pipe key collision");
                }
                Entry::Vacant(vacant) => {
                    if !session.claim_key(candidate) {
                        let key = session.key().unwrap_or(candidate);
                        warn!(%key, "session was registered concurrently");
                        return Err(PipeError::AlreadyRegistered(key));
                    }
                    vacant.insert(Arc::clone(session));
                    break candidate;
                }
            }
        };
        session.init_buffer();
        debug!(%key, managed = session.is_managed(), "pipe registered");
        Ok(key)
    }

    /// Register under a key assigned by the peer, replacing any session
    /// already there.
    pub fn register_external(
        &self,
        key: PipeKey,
        session: &Arc<PipeSession>,
    ) -> Option<Arc<PipeSession>> {
        session.set_key(key);
        session.init_buffer();
        let previous = self.inner.sessions.insert(key, Arc::clone(session));
        if previous
            .as_ref()
            .is_some_and(|previous| !Arc::ptr_eq(previous, session))
        {
            warn!(%key, "external registration replaced a session");
        }
        previous
    }

    pub fn lookup(&self, key: &PipeKey) -> Option<Arc<PipeSession>> {
        self.inner
            .sessions
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Look up a session for a request carrying `hash`.
    ///
    /// Returns the session only if `hash` is strictly greater than the last
    /// hash accepted for it.
    pub fn lookup_with_replay_guard(&self, key: &PipeKey, hash: u64) -> Option<Arc<PipeSession>> {
        let session = self.lookup(key)?;
        if session.accept_hash(hash) {
            Some(session)
        } else {
            debug!(%key, hash, last = session.last_hash(), "replayed request ignored");
            None
        }
    }

    /// Remove the session registered under `key` and clear its key.
    /// Idempotent.
    pub fn remove(&self, key: &PipeKey) -> Option<Arc<PipeSession>> {
        let (_, session) = self.inner.sessions.remove(key)?;
        session.take_key();
        session.set_alive(false);
        session.release_buffer();
        debug!(%key, "pipe removed");
        Some(session)
    }

    /// Remove `session` only if it is the one registered under its key.
    pub(crate) fn unlist(&self, session: &Arc<PipeSession>) {
        if let Some(key) = session.key() {
            self.inner
                .sessions
                .remove_if(&key, |_, existing| Arc::ptr_eq(existing, session));
        }
        session.set_alive(false);
        session.release_buffer();
    }

    /// Destroy a session: mark it dead, drop its key and buffer, and destroy
    /// its compound slots. Returns false if it was already destroyed.
    pub fn destroy(&self, session: &Arc<PipeSession>) -> bool {
        if !session.mark_destroyed() {
            return false;
        }
        session.set_alive(false);
        if let Some(key) = session.take_key() {
            self.inner
                .sessions
                .remove_if(&key, |_, existing| Arc::ptr_eq(existing, session));
            debug!(%key, "pipe destroyed");
        }
        session.release_buffer();

        let members: Vec<Arc<PipeSession>> = session
            .slots()
            .map(|slots| slots.iter().map(|(_, member)| Arc::clone(member)).collect())
            .unwrap_or_default();
        for member in &members {
            self.destroy(member);
        }
        true
    }

    /// Run the close path at most once: the session's closer if it has one,
    /// otherwise the closed hook followed by [`SessionRegistry::destroy`].
    pub fn close(&self, session: &Arc<PipeSession>) {
        if session.closing_invoked.swap(true, Ordering::AcqRel) {
            return;
        }
        session.set_alive(false);
        match session.closer() {
            Some(closer) => closer.help_closing(self, session),
            None => {
                session.handler().on_closed(session);
                self.destroy(session);
            }
        }
    }

    /// Mark a session lost, run its lost hook and destroy it.
    pub fn lose(&self, session: &Arc<PipeSession>) {
        if !session.mark_lost() {
            return;
        }
        session.set_alive(false);
        warn!(key = ?session.key(), "pipe lost");
        session.handler().on_lost(session);
        self.destroy(session);
    }

    /// Register, mark alive and run the application setup hook.
    ///
    /// A refused setup unregisters the session, clears its key and runs the
    /// failed hook. A successful one starts liveness monitoring.
    pub fn setup(&self, session: &Arc<PipeSession>) -> Result<PipeKey> {
        let key = self.register(session)?;
        session.set_alive(true);
        session.mark_setup(Instant::now());

        if !session.handler().setup(session) {
            warn!(%key, "pipe setup refused");
            self.inner
                .sessions
                .remove_if(&key, |_, existing| Arc::ptr_eq(existing, session));
            session.take_key();
            session.set_alive(false);
            session.handler().on_failed(session);
            return Err(PipeError::SetupFailed);
        }

        self.start_monitoring(session);
        debug!(%key, "pipe set up");
        Ok(key)
    }

    /// Enqueue into a session's delivery buffer.
    pub fn enqueue(
        &self,
        session: &PipeSession,
        items: &[Arc<dyn PipeEvent>],
    ) -> Result<EnqueueOutcome> {
        let key = session.key().ok_or(PipeError::Unregistered)?;
        let outcome = session
            .enqueue(items, self.inner.config.batch_threshold)
            .ok_or_else(|| {
                warn!(%key, "enqueue into pipe without buffer");
                PipeError::NoBuffer(key)
            })?;
        trace!(
            %key,
            appended = outcome.appended,
            merged = outcome.merged,
            skipped = outcome.skipped,
            resorted = outcome.resorted,
            sequence = session.pipe_sequence(),
            "pipe in"
        );
        Ok(outcome)
    }

    /// Enqueue into the session registered under `key`. Compound sessions
    /// deliver through their active slot when one is set.
    pub fn pipe_in(&self, key: &PipeKey, items: &[Arc<dyn PipeEvent>]) -> Result<EnqueueOutcome> {
        let session = self.lookup(key).ok_or_else(|| {
            warn!(%key, "pipe in to unregistered key");
            PipeError::UnknownKey(*key)
        })?;
        self.enqueue(&session.delivery_target(), items)
    }

    /// Route items into the delivery buffer of a managed session, or hand
    /// them straight to the handlers of an unmanaged one.
    pub fn pipe_through(&self, key: &PipeKey, items: &[Arc<dyn PipeEvent>]) -> Result<usize> {
        let session = self
            .lookup(key)
            .ok_or(PipeError::UnknownKey(*key))?;
        if session.is_managed() {
            let outcome = self.pipe_in(key, items)?;
            return Ok(outcome.appended + outcome.merged);
        }
        Ok(items.iter().filter(|item| session.deal(item)).count())
    }

    /// Keep-alive (`live`) or kill notification for a session.
    /// Returns false if no session is registered under `key`.
    pub fn notify_status(&self, key: &PipeKey, live: bool) -> bool {
        let Some(session) = self.lookup(key) else {
            return false;
        };
        if live {
            session.handler().keep_live(&session);
            session.set_alive(true);
            session.touch_live(Instant::now());
        } else if session.is_live() {
            self.destroy(&session);
        }
        true
    }

    pub fn is_live(&self, key: &PipeKey) -> bool {
        self.lookup(key).is_some_and(|session| session.is_live())
    }

    /// Record that the peer observed everything up to `sequence`.
    pub fn acknowledge(&self, key: &PipeKey, sequence: u64) -> Result<u64> {
        let session = self
            .lookup(key)
            .ok_or(PipeError::UnknownKey(*key))?;
        Ok(session.raise_notify_sequence(sequence))
    }

    /// Copy pending items accepted by `filter` from one session to another,
    /// skipping sequence acknowledgements. Used when a connection is
    /// replaced.
    pub fn transfer_pending(
        &self,
        from: &PipeKey,
        to: &PipeKey,
        filter: impl Fn(&dyn PipeEvent) -> bool,
        clear_original: bool,
    ) -> Result<usize> {
        let source = self.lookup(from).ok_or(PipeError::UnknownKey(*from))?;
        let target = self.lookup(to).ok_or(PipeError::UnknownKey(*to))?;
        let items = source.clone_pending(|item| item.tag() != SEQUENCE_TAG && filter(item));
        let moved = target
            .append_raw(items)
            .ok_or(PipeError::NoBuffer(*to))?;
        if clear_original {
            source.clear_pending();
        }
        debug!(%from, %to, moved, "pipe data transferred");
        Ok(moved)
    }

    /// Attach a constituent session to a registered compound session.
    /// The member takes the compound's key but is not registered itself.
    pub fn attach_slot(&self, compound: &Arc<PipeSession>, member: Arc<PipeSession>) -> Result<usize> {
        let key = compound.key().ok_or(PipeError::Unregistered)?;
        let mut slots = compound.slots().ok_or(PipeError::NotCompound(key))?;
        let now = Instant::now();
        let index = slots.attach(Arc::clone(&member), now)?;
        member.set_key(key);
        member.init_buffer();
        member.set_alive(true);
        member.mark_setup(now);
        debug!(%key, index, "compound slot attached");
        Ok(index)
    }

    /// Empty a slot. Data still pending on the member moves to the
    /// compound's delivery target.
    pub fn detach_slot(&self, compound: &Arc<PipeSession>, index: usize) -> Result<Arc<PipeSession>> {
        let key = compound.key().ok_or(PipeError::Unregistered)?;
        let member = compound
            .slots()
            .ok_or(PipeError::NotCompound(key))?
            .detach(index, Instant::now())
            .ok_or(PipeError::InvalidSlot(index))?;
        self.rehome_pending(&member, compound);
        Ok(member)
    }

    /// Make a slot the delivery target. Data pending on the previous target
    /// moves to the new one.
    pub fn set_active_slot(&self, compound: &Arc<PipeSession>, index: usize) -> Result<()> {
        let key = compound.key().ok_or(PipeError::Unregistered)?;
        let previous = compound.delivery_target();
        compound
            .slots()
            .ok_or(PipeError::NotCompound(key))?
            .set_active(index)?;
        self.rehome_pending(&previous, compound);
        Ok(())
    }

    /// Move pending items of `from` to the current delivery target of
    /// `compound`.
    pub(crate) fn rehome_pending(&self, from: &Arc<PipeSession>, compound: &Arc<PipeSession>) {
        let target = compound.delivery_target();
        if Arc::ptr_eq(&target, from) {
            return;
        }
        let items = from.take_open();
        if items.is_empty() {
            return;
        }
        let count = items.len();
        if target.append_raw(items).is_none() {
            warn!(key = ?compound.key(), count, "compound delivery target has no buffer");
        } else {
            debug!(key = ?compound.key(), count, "pipe data moved to new delivery target");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    pub fn keys(&self) -> Vec<PipeKey> {
        self.inner.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// All registered sessions, collected so no map lock is held afterwards.
    pub fn sessions(&self) -> Vec<Arc<PipeSession>> {
        self.inner
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Point-in-time summaries, sorted by key. Observability only.
    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let now = Instant::now();
        let mut summaries: Vec<SessionSummary> = self
            .sessions()
            .iter()
            .filter_map(|session| SessionSummary::capture(session, now))
            .collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        summaries
    }

    /// Text report of all sessions.
    pub fn statistics(&self) -> String {
        render_statistics(&self.snapshot())
    }
}
