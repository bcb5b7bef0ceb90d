use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::liveness::{assess, closing_wait_elapsed, LivenessState};
use crate::registry::{Inner, SessionRegistry};
use crate::session::PipeSession;

/// Stop flag that sleeping loops can wait on.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep up to `timeout`. Returns true if stopped.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.wake.wait_for(&mut stopped, timeout);
        }
        *stopped
    }
}

enum Job {
    Destroy(Arc<PipeSession>),
    Stop,
}

/// Destroy queue and background threads owned by a registry.
pub(crate) struct Reaper {
    queue: SyncSender<Job>,
    receiver: Mutex<Option<Receiver<Job>>>,
    started: AtomicBool,
    stop: Arc<StopSignal>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Reaper {
    pub(crate) fn new(capacity: usize) -> Self {
        let (queue, receiver) = mpsc::sync_channel(capacity.max(1));
        Self {
            queue,
            receiver: Mutex::new(Some(receiver)),
            started: AtomicBool::new(false),
            stop: Arc::new(StopSignal::new()),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn signal_stop(&self) {
        self.stop.stop();
        let _ = self.queue.try_send(Job::Stop);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut threads = self.threads.lock();
        threads.retain(|handle| !handle.is_finished());
        threads.push(handle);
    }
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Managed sessions examined.
    pub scanned: usize,
    /// Sessions handed to the destroy queue.
    pub scheduled: usize,
    /// Sessions found live and refreshed.
    pub refreshed: usize,
    /// Dead compound slots handed to the destroy queue.
    pub slots_scheduled: usize,
}

impl SessionRegistry {
    /// One sweep over all managed sessions.
    ///
    /// A session that is not live, or a compound session left empty beyond
    /// the idle grace, is unlisted and scheduled for destruction once its
    /// closing-wait has elapsed since it was last seen live. Every other
    /// session has its compound slots checked and its liveness refreshed.
    pub fn sweep_at(&self, now: Instant) -> SweepReport {
        let config = &self.inner.config;
        let mut report = SweepReport::default();

        for session in self.sessions() {
            if !session.is_managed() {
                continue;
            }
            report.scanned += 1;

            let idle_compound = session.slots().is_some_and(|slots| {
                slots.is_empty()
                    && now.saturating_duration_since(slots.last_change()) > config.compound_idle_grace
            });
            if idle_compound || assess(&session, now, config) != LivenessState::Active {
                if closing_wait_elapsed(&session, now, config) {
                    self.unlist(&session);
                    if self.schedule_destroy(&session) {
                        report.scheduled += 1;
                    }
                }
                continue;
            }

            report.slots_scheduled += self.sweep_slots(&session, now);
            session.touch_live(now);
            report.refreshed += 1;
        }

        if report.scheduled + report.slots_scheduled > 0 {
            debug!(
                scanned = report.scanned,
                scheduled = report.scheduled,
                slots = report.slots_scheduled,
                "pipe sweep"
            );
        }
        report
    }

    fn sweep_slots(&self, compound: &Arc<PipeSession>, now: Instant) -> usize {
        let config = &self.inner.config;
        let dead: Vec<Arc<PipeSession>> = match compound.slots() {
            Some(mut slots) => {
                let mut expired = Vec::new();
                for (index, member) in slots.iter() {
                    if member.is_live() {
                        member.touch_live(now);
                        continue;
                    }
                    let grace = config.slot_grace(member.wait_closing_or(config.wait_closing));
                    let since = now.saturating_duration_since(member.timers().last_live_detected);
                    if since > grace {
                        expired.push(index);
                    }
                }
                expired
                    .into_iter()
                    .filter_map(|index| slots.detach(index, now))
                    .collect()
            }
            None => return 0,
        };

        for member in &dead {
            self.rehome_pending(member, compound);
        }
        dead.iter()
            .filter(|member| self.schedule_destroy(member))
            .count()
    }

    /// Queue a session for destruction on the destroy worker. Each session is
    /// scheduled at most once; a full queue closes it inline.
    pub fn schedule_destroy(&self, session: &Arc<PipeSession>) -> bool {
        if session.destroy_scheduled.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.inner.reaper.queue.try_send(Job::Destroy(Arc::clone(session))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(key = ?session.key(), "destroy queue full, closing inline");
                self.close(session);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.close(session);
            }
        }
        true
    }

    /// Run queued destroys on the calling thread. Returns how many ran.
    /// Does nothing once the background destroy worker owns the queue.
    pub fn run_pending_destroys(&self) -> usize {
        let jobs: Vec<Job> = match self.inner.reaper.receiver.lock().as_ref() {
            Some(receiver) => receiver.try_iter().collect(),
            None => return 0,
        };
        let mut ran = 0;
        for job in jobs {
            if let Job::Destroy(session) = job {
                self.close(&session);
                ran += 1;
            }
        }
        ran
    }

    /// One check of a privately monitored session. Returns true once the
    /// session is finished and the monitor should stop.
    pub fn monitor_step(&self, session: &Arc<PipeSession>, now: Instant) -> bool {
        match assess(session, now, &self.inner.config) {
            LivenessState::Destroyed => true,
            LivenessState::CandidateDead => {
                if closing_wait_elapsed(session, now, &self.inner.config) {
                    self.close(session);
                    true
                } else {
                    false
                }
            }
            LivenessState::Active => {
                session.touch_live(now);
                false
            }
        }
    }

    /// Stop the background threads and wait for them.
    pub fn shutdown(&self) {
        self.inner.reaper.signal_stop();
        let handles = std::mem::take(&mut *self.inner.reaper.threads.lock());
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        info!(pipes = self.len(), "pipe registry shut down");
    }

    pub(crate) fn start_monitoring(&self, session: &Arc<PipeSession>) {
        session.touch_live(Instant::now());
        if !self.inner.config.background_reaper || self.inner.reaper.stop.is_stopped() {
            return;
        }
        if session.is_managed() {
            self.ensure_reaper();
        } else if !session.monitored.swap(true, Ordering::AcqRel) {
            self.spawn_monitor(session);
        }
    }

    fn ensure_reaper(&self) {
        let reaper = &self.inner.reaper;
        if reaper.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(receiver) = reaper.receiver.lock().take() else {
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let stop = Arc::clone(&reaper.stop);
        let interval = self.inner.config.monitoring_interval;
        match thread::Builder::new()
            .name("simplepipe-sweep".into())
            .spawn(move || sweep_loop(weak, stop, interval))
        {
            Ok(handle) => reaper.track(handle),
            Err(e) => warn!(error = %e, "failed to start pipe sweep thread"),
        }

        let weak = Arc::downgrade(&self.inner);
        let poll = self.inner.config.destroy_poll_timeout;
        match thread::Builder::new()
            .name("simplepipe-destroy".into())
            .spawn(move || destroy_loop(weak, receiver, poll))
        {
            Ok(handle) => reaper.track(handle),
            Err(e) => warn!(error = %e, "failed to start pipe destroy thread"),
        }
        debug!("pipe reaper started");
    }

    fn spawn_monitor(&self, session: &Arc<PipeSession>) {
        let weak = Arc::downgrade(&self.inner);
        let stop = Arc::clone(&self.inner.reaper.stop);
        let interval = self.inner.config.dedicated_interval();
        let session = Arc::clone(session);
        match thread::Builder::new()
            .name("simplepipe-monitor".into())
            .spawn(move || monitor_loop(weak, stop, session, interval))
        {
            Ok(handle) => self.inner.reaper.track(handle),
            Err(e) => warn!(error = %e, "failed to start pipe monitor thread"),
        }
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<SessionRegistry> {
    weak.upgrade().map(|inner| SessionRegistry { inner })
}

fn sweep_loop(weak: Weak<Inner>, stop: Arc<StopSignal>, interval: Duration) {
    while !stop.wait(interval) {
        let Some(registry) = upgrade(&weak) else {
            break;
        };
        registry.sweep_at(Instant::now());
    }
    debug!("pipe sweep stopped");
}

fn destroy_loop(weak: Weak<Inner>, receiver: Receiver<Job>, poll: Duration) {
    loop {
        match receiver.recv_timeout(poll) {
            Ok(Job::Destroy(session)) => {
                let Some(registry) = upgrade(&weak) else {
                    break;
                };
                registry.close(&session);
            }
            Ok(Job::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if weak.strong_count() == 0 {
                    break;
                }
            }
        }
    }
    debug!("pipe destroy worker stopped");
}

fn monitor_loop(
    weak: Weak<Inner>,
    stop: Arc<StopSignal>,
    session: Arc<PipeSession>,
    interval: Duration,
) {
    while !stop.wait(interval) {
        let Some(registry) = upgrade(&weak) else {
            break;
        };
        if registry.monitor_step(&session, Instant::now()) {
            break;
        }
    }
    debug!(key = ?session.key(), "pipe monitor stopped");
}
