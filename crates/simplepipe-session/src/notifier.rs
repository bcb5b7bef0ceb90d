use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use simplepipe_frame::{
    parse_segment, FrameConfig, PipeKey, PipeRequest, PipeStatus, RequestType, Segment,
};
use simplepipe_transport::RequestTransport;
use tracing::{debug, warn};

use crate::error::Result;
use crate::liveness::{closing_wait_elapsed, notify_due};
use crate::reaper::StopSignal;
use crate::registry::SessionRegistry;
use crate::session::PipeSession;

/// Result of one notifier tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub notified: usize,
    pub skipped: usize,
    pub failed: usize,
    pub lost: usize,
    pub closed: usize,
}

/// Tells the peer about unacknowledged sequences of local pipes.
///
/// One thread serves every watched pipe. It ticks at the configured notifier
/// interval and exits when no pipe is left.
pub struct LiveNotifier {
    registry: SessionRegistry,
    transport: Mutex<Box<dyn RequestTransport>>,
    pipes: Mutex<Vec<Arc<PipeSession>>>,
    frame: FrameConfig,
    running: AtomicBool,
    stop: Arc<StopSignal>,
}

impl LiveNotifier {
    pub fn new(registry: SessionRegistry, transport: impl RequestTransport + 'static) -> Arc<Self> {
        let frame = registry.config().frame_config();
        Arc::new(Self {
            registry,
            transport: Mutex::new(Box::new(transport)),
            pipes: Mutex::new(Vec::new()),
            frame,
            running: AtomicBool::new(false),
            stop: Arc::new(StopSignal::new()),
        })
    }

    /// Start watching `session`. Starts the notifier thread if background
    /// threads are enabled and it is not running.
    pub fn watch(self: &Arc<Self>, session: &Arc<PipeSession>) -> Result<()> {
        let mut pipes = self.pipes.lock();
        if !pipes.iter().any(|pipe| Arc::ptr_eq(pipe, session)) {
            pipes.push(Arc::clone(session));
        }
        if self.registry.config().background_reaper && !self.running.swap(true, Ordering::AcqRel) {
            let weak = Arc::downgrade(self);
            let stop = Arc::clone(&self.stop);
            let spawned = thread::Builder::new()
                .name("simplepipe-notifier".into())
                .spawn(move || notifier_loop(weak, stop));
            if let Err(e) = spawned {
                self.running.store(false, Ordering::Release);
                return Err(e.into());
            }
        }
        Ok(())
    }

    pub fn unwatch(&self, session: &Arc<PipeSession>) {
        self.pipes.lock().retain(|pipe| !Arc::ptr_eq(pipe, session));
    }

    pub fn watched(&self) -> usize {
        self.pipes.lock().len()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// One pass over all watched pipes.
    pub fn tick_at(&self, now: Instant) -> NotifyReport {
        let config = self.registry.config();
        let pipes: Vec<Arc<PipeSession>> = self.pipes.lock().clone();
        let mut report = NotifyReport::default();

        for pipe in pipes {
            let Some(key) = pipe.key().filter(|_| pipe.is_live()) else {
                if pipe.is_destroyed() || closing_wait_elapsed(&pipe, now, config) {
                    self.registry.close(&pipe);
                    self.unwatch(&pipe);
                    report.closed += 1;
                }
                continue;
            };

            if !pipe.has_unacknowledged() || !notify_due(&pipe, now, config) {
                pipe.touch_live(now);
                report.skipped += 1;
                continue;
            }

            let sequence = pipe.pipe_sequence();
            pipe.mark_notified(now);
            let request = PipeRequest::new(
                key,
                RequestType::Notify,
                sequence,
                pipe.next_request_counter(),
            );
            let response = self.transport.lock().request(request.encode().as_bytes());

            match response {
                Ok(body) => {
                    pipe.raise_notify_sequence(sequence);
                    match self.answer_status(&body, &key) {
                        Some(PipeStatus::Lost) => {
                            self.registry.lose(&pipe);
                            self.unwatch(&pipe);
                            report.lost += 1;
                        }
                        Some(PipeStatus::Destroyed) => {
                            self.registry.close(&pipe);
                            self.unwatch(&pipe);
                            report.closed += 1;
                        }
                        _ => {
                            pipe.touch_live(now);
                            report.notified += 1;
                        }
                    }
                }
                Err(e) => {
                    let retries = pipe.record_failure();
                    warn!(%key, retries, error = %e, "pipe notify failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    // First status segment addressed to `key`.
    fn answer_status(&self, body: &[u8], key: &PipeKey) -> Option<PipeStatus> {
        let mut offset = 0;
        while let Ok(Some((segment, used))) = parse_segment(&body[offset..], &self.frame) {
            offset += used;
            if let Segment::Status { key: target, status } = segment {
                if target == *key {
                    return Some(status);
                }
            }
        }
        None
    }
}

fn notifier_loop(weak: Weak<LiveNotifier>, stop: Arc<StopSignal>) {
    loop {
        let Some(tick) = weak.upgrade().map(|n| n.registry.config().notifier_tick) else {
            break;
        };
        if stop.wait(tick) {
            break;
        }
        let Some(notifier) = weak.upgrade() else {
            break;
        };
        notifier.tick_at(Instant::now());

        let pipes = notifier.pipes.lock();
        if pipes.is_empty() {
            notifier.running.store(false, Ordering::Release);
            break;
        }
    }
    debug!("pipe notifier stopped");
}
