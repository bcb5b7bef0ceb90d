use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use simplepipe_frame::{
    encode_event, encode_status, parse_segment, FrameConfig, PayloadRegistry, PipeEvent, PipeKey,
    PipeSequence, PipeStatus, Segment, KEY_LENGTH,
};
use simplepipe_transport::{BytesSink, PipeSender};
use tracing::{debug, trace, warn};

use crate::error::{PipeError, Result};
use crate::registry::SessionRegistry;
use crate::session::PipeSession;

/// A payload parsed for a pipe.
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    pub key: PipeKey,
    pub event: Arc<dyn PipeEvent>,
}

/// What one [`SessionCodec::parse`] call consumed.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Bytes covered by complete segments. The caller keeps the rest.
    pub consumed: usize,
    /// Application payloads, in wire order. Empty when dispatching.
    pub events: Vec<ReceivedEvent>,
    /// Payloads handed to session handlers.
    pub dispatched: usize,
    pub heartbeats: usize,
    pub lost: Vec<PipeKey>,
    pub continued: Vec<PipeKey>,
    /// Set when a destroyed segment ended the parse.
    pub closed: Option<PipeKey>,
}

/// Parses response bodies against a session registry.
///
/// Status segments update the addressed session; sequence acknowledgements
/// raise its pipe sequence; every other payload is decoded through the
/// payload registry and either collected or dispatched to the session.
#[derive(Clone)]
pub struct SessionCodec {
    registry: SessionRegistry,
    payloads: Arc<PayloadRegistry>,
    frame: FrameConfig,
}

impl SessionCodec {
    pub fn new(registry: SessionRegistry, payloads: Arc<PayloadRegistry>) -> Self {
        let frame = registry.config().frame_config();
        Self {
            registry,
            payloads,
            frame,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn frame_config(&self) -> &FrameConfig {
        &self.frame
    }

    /// Parse complete segments from `src`, collecting payload events.
    pub fn parse(&self, src: &[u8], now: Instant) -> Result<ParseOutcome> {
        let mut events = Vec::new();
        let mut outcome = self.parse_with(src, now, &mut |key, event| {
            events.push(ReceivedEvent { key, event });
        })?;
        outcome.events = events;
        Ok(outcome)
    }

    /// Parse complete segments from `src`, handing each payload to its
    /// session as soon as it is decoded.
    pub fn parse_and_dispatch(&self, src: &[u8], now: Instant) -> Result<ParseOutcome> {
        let registry = &self.registry;
        let mut dispatched = 0;
        let mut outcome = self.parse_with(src, now, &mut |key, event| {
            match registry.lookup(&key) {
                Some(session) => {
                    session.deal(&event);
                    dispatched += 1;
                }
                None => debug!(%key, tag = event.tag(), "event for unknown pipe dropped"),
            }
        })?;
        outcome.dispatched = dispatched;
        Ok(outcome)
    }

    fn parse_with(
        &self,
        src: &[u8],
        now: Instant,
        on_event: &mut dyn FnMut(PipeKey, Arc<dyn PipeEvent>),
    ) -> Result<ParseOutcome> {
        let mut outcome = ParseOutcome::default();

        while src.len() - outcome.consumed > KEY_LENGTH {
            let Some((segment, used)) = parse_segment(&src[outcome.consumed..], &self.frame)?
            else {
                break;
            };
            outcome.consumed += used;
            let session = self.registry.lookup(segment.key());

            match segment {
                Segment::Status { key, status } => match status {
                    PipeStatus::Destroyed => {
                        if let Some(session) = session {
                            debug!(%key, "pipe destroyed by peer");
                            self.registry.close(&session);
                        }
                        outcome.closed = Some(key);
                        break;
                    }
                    PipeStatus::Ok => {
                        if let Some(session) = session {
                            session.record_traffic(now);
                        }
                        outcome.heartbeats += 1;
                    }
                    PipeStatus::Continue => {
                        if let Some(session) = session {
                            session.record_traffic(now);
                        }
                        outcome.continued.push(key);
                    }
                    PipeStatus::Lost => {
                        if let Some(session) = session {
                            self.registry.lose(&session);
                        }
                        outcome.lost.push(key);
                    }
                },
                Segment::Payload { key, tag, body } => {
                    let event = self.payloads.decode(&tag, &body)?;
                    if let Some(session) = &session {
                        session.record_traffic(now);
                    }
                    match event.as_any().downcast_ref::<PipeSequence>() {
                        Some(ack) => {
                            if let Some(session) = &session {
                                let sequence = session.raise_pipe_sequence(ack.sequence);
                                trace!(%key, sequence, "sequence acknowledged");
                            }
                        }
                        None => on_event(key, event),
                    }
                }
            }
        }
        Ok(outcome)
    }
}

impl BytesSink for SessionCodec {
    type Error = PipeError;

    fn on_bytes_received(&mut self, bytes: &[u8]) -> Result<usize> {
        Ok(self.parse_and_dispatch(bytes, Instant::now())?.consumed)
    }
}

/// Encode pending items of `session`, followed by a sequence acknowledgement
/// when the whole pending range fits in one batch, and hand them to `sender`.
///
/// The buffer lock is only held to reserve and later commit the items, so
/// producers are not blocked by a slow transport. Items are committed only
/// after the sender accepted the bytes. A failed send counts against the
/// session's retry ceiling and leaves the items pending. Returns the number
/// of items delivered; 0 when nothing was pending or another send on the
/// same session is in progress.
pub fn drain_to<S: PipeSender + ?Sized>(
    session: &PipeSession,
    sender: &mut S,
    batch_limit: usize,
) -> Result<usize> {
    let key = session.key().ok_or(PipeError::Unregistered)?;
    let Some((reservation, sequence)) = session
        .reserve(batch_limit)
        .ok_or(PipeError::NoBuffer(key))?
    else {
        return Ok(0);
    };

    let mut bytes = BytesMut::new();
    let encoded = reservation
        .items
        .iter()
        .try_for_each(|event| encode_event(&key, event.as_ref(), &mut bytes))
        .and_then(|()| {
            if reservation.drains_all {
                encode_event(&key, &PipeSequence::new(sequence), &mut bytes)
            } else {
                Ok(())
            }
        });
    if let Err(e) = encoded {
        session.finish_send(&reservation, false);
        return Err(e.into());
    }

    let count = reservation.items.len();
    match sender.send(&bytes) {
        Ok(()) => {
            session.finish_send(&reservation, true);
            session.reset_failures();
            trace!(%key, delivered = count, bytes = bytes.len(), "pipe drained");
            Ok(count)
        }
        Err(e) => {
            session.finish_send(&reservation, false);
            let retries = session.record_failure();
            warn!(%key, retries, error = %e, "pipe delivery failed");
            Err(e.into())
        }
    }
}

/// Send a single status segment for `key`.
pub fn send_status<S: PipeSender + ?Sized>(
    key: &PipeKey,
    status: PipeStatus,
    sender: &mut S,
) -> Result<()> {
    let mut bytes = BytesMut::with_capacity(KEY_LENGTH + 1);
    encode_status(key, status, &mut bytes);
    sender.send(&bytes)?;
    Ok(())
}
