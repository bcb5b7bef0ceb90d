use std::sync::Arc;
use std::time::Instant;

use simplepipe_frame::{PipeRequest, RequestType};
use simplepipe_transport::RequestTransport;
use tracing::{debug, warn};

use crate::codec::SessionCodec;
use crate::error::Result;
use crate::liveness::query_expired;
use crate::reaper::StopSignal;
use crate::session::PipeSession;

/// Result of one short-poll query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Events were dispatched to the session.
    Delivered(usize),
    /// The answer carried only heartbeats or acknowledgements.
    Idle,
    /// The query failed; carries the consecutive failure count.
    Failed(u32),
    /// The pipe is gone and polling should stop.
    Closed,
}

/// Short-poll loop of a client-side pipe.
///
/// Each poll sends a query request carrying the local pipe sequence and
/// dispatches the answer through a [`SessionCodec`]. The driver gives up and
/// closes the pipe after too many failures or too long without data.
pub struct QueryDriver<T> {
    codec: SessionCodec,
    session: Arc<PipeSession>,
    transport: T,
    kind: RequestType,
}

impl<T: RequestTransport> QueryDriver<T> {
    pub fn new(codec: SessionCodec, session: Arc<PipeSession>, transport: T) -> Self {
        Self {
            codec,
            session,
            transport,
            kind: RequestType::Query,
        }
    }

    /// Use another data-delivering request type, e.g. subdomain queries.
    pub fn with_kind(mut self, kind: RequestType) -> Self {
        self.kind = kind;
        self
    }

    pub fn session(&self) -> &Arc<PipeSession> {
        &self.session
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn poll_at(&mut self, now: Instant) -> Result<QueryOutcome> {
        let registry = self.codec.registry();
        let Some(key) = self.session.key().filter(|_| self.session.is_live()) else {
            return Ok(QueryOutcome::Closed);
        };
        if query_expired(&self.session, now, registry.config()) {
            warn!(
                %key,
                retries = self.session.query_failed_retries(),
                "pipe query gave up"
            );
            registry.close(&self.session);
            return Ok(QueryOutcome::Closed);
        }

        let request = PipeRequest::new(
            key,
            self.kind,
            self.session.pipe_sequence(),
            self.session.next_request_counter(),
        );
        let body = match self.transport.request(request.encode().as_bytes()) {
            Ok(body) => body,
            Err(e) => {
                let retries = self.session.record_failure();
                debug!(%key, retries, error = %e, "pipe query failed");
                return Ok(QueryOutcome::Failed(retries));
            }
        };
        if body.is_empty() {
            return Ok(QueryOutcome::Failed(self.session.record_failure()));
        }

        let outcome = self.codec.parse_and_dispatch(&body, now)?;
        if !self.session.is_live() || outcome.closed == Some(key) {
            return Ok(QueryOutcome::Closed);
        }
        Ok(match outcome.dispatched {
            0 => QueryOutcome::Idle,
            n => QueryOutcome::Delivered(n),
        })
    }

    /// Poll every query interval until the pipe closes or `stop` fires.
    /// Returns the number of events delivered.
    pub fn run(&mut self, stop: &StopSignal) -> Result<usize> {
        let interval = self.codec.registry().config().query_interval;
        let mut delivered = 0;
        loop {
            match self.poll_at(Instant::now())? {
                QueryOutcome::Delivered(n) => delivered += n,
                QueryOutcome::Closed => return Ok(delivered),
                QueryOutcome::Idle | QueryOutcome::Failed(_) => {}
            }
            if stop.wait(interval) {
                return Ok(delivered);
            }
        }
    }
}
