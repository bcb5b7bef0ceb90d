use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use simplepipe_frame::{PipeRequest, PipeStatus, RequestType};
use simplepipe_transport::PipeSender;
use tracing::debug;

use crate::codec::{drain_to, send_status};
use crate::error::{PipeError, Result};
use crate::registry::SessionRegistry;
use crate::session::PipeSession;

/// How a request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    /// Buffered items were sent, followed by a sequence acknowledgement.
    Delivered(usize),
    /// Nothing was pending; a heartbeat was sent.
    Heartbeat,
    /// The pipe is unknown or dead; a destroyed segment was sent.
    Destroyed,
    /// A notify for a pipe that is gone; a lost segment was sent.
    Lost,
    /// A replayed request; nothing was sent.
    Ignored,
    /// A continuum stream ended because the transport refused more bytes.
    Disconnected { delivered: usize },
}

/// Answers pipe requests from a registry.
#[derive(Clone)]
pub struct PipeServer {
    registry: SessionRegistry,
}

impl PipeServer {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Answer one request, writing the response body to `sender`.
    ///
    /// Continuum requests keep the sender until the pipe dies or the
    /// transport fails.
    pub fn handle<S: PipeSender + ?Sized>(
        &self,
        request: &PipeRequest,
        sender: &mut S,
    ) -> Result<Answer> {
        match request.kind {
            RequestType::Notify => self.answer_notify(request, sender),
            RequestType::Continuum => self.stream(request, sender),
            RequestType::Query
            | RequestType::SubdomainQuery
            | RequestType::Script
            | RequestType::CrossSite => self.answer_query(request, sender),
        }
    }

    /// Answer a non-streaming request and return the whole response body.
    pub fn respond(&self, request: &PipeRequest) -> Result<(Answer, Bytes)> {
        let mut body = BodySender::default();
        let answer = self.handle(request, &mut body)?;
        Ok((answer, Bytes::from(body.0)))
    }

    fn guarded_session(&self, request: &PipeRequest) -> Guarded {
        match self
            .registry
            .lookup_with_replay_guard(&request.key, request.counter)
        {
            Some(session) if session.is_live() => Guarded::Live(session),
            Some(_) => Guarded::Dead,
            None if self.registry.lookup(&request.key).is_some() => Guarded::Replay,
            None => Guarded::Dead,
        }
    }

    fn answer_query<S: PipeSender + ?Sized>(
        &self,
        request: &PipeRequest,
        sender: &mut S,
    ) -> Result<Answer> {
        let session = match self.guarded_session(request) {
            Guarded::Live(session) => session,
            Guarded::Replay => return Ok(Answer::Ignored),
            Guarded::Dead => {
                send_status(&request.key, PipeStatus::Destroyed, sender)?;
                return Ok(Answer::Destroyed);
            }
        };
        session.record_traffic(Instant::now());
        session.raise_notify_sequence(request.sequence);

        let target = session.delivery_target();
        match drain_to(target.as_ref(), sender, self.registry.config().batch_threshold)? {
            0 => {
                send_status(&request.key, PipeStatus::Ok, sender)?;
                Ok(Answer::Heartbeat)
            }
            delivered => Ok(Answer::Delivered(delivered)),
        }
    }

    fn answer_notify<S: PipeSender + ?Sized>(
        &self,
        request: &PipeRequest,
        sender: &mut S,
    ) -> Result<Answer> {
        match self.registry.lookup(&request.key) {
            Some(session) if session.is_live() => {
                session.raise_notify_sequence(request.sequence);
                session.record_traffic(Instant::now());
                session.handler().keep_live(&session);
                send_status(&request.key, PipeStatus::Ok, sender)?;
                Ok(Answer::Heartbeat)
            }
            _ => {
                debug!(key = %request.key, "notify for missing pipe");
                send_status(&request.key, PipeStatus::Lost, sender)?;
                Ok(Answer::Lost)
            }
        }
    }

    fn stream<S: PipeSender + ?Sized>(&self, request: &PipeRequest, sender: &mut S) -> Result<Answer> {
        let session = match self.guarded_session(request) {
            Guarded::Live(session) => session,
            Guarded::Replay => return Ok(Answer::Ignored),
            Guarded::Dead => {
                send_status(&request.key, PipeStatus::Destroyed, sender)?;
                return Ok(Answer::Destroyed);
            }
        };
        session.raise_notify_sequence(request.sequence);
        let config = self.registry.config();
        let mut delivered = 0;
        debug!(key = %request.key, "continuum stream opened");

        loop {
            if !session.is_live() {
                let _ = send_status(&request.key, PipeStatus::Destroyed, sender);
                debug!(key = %request.key, delivered, "continuum stream ended by pipe");
                return Ok(Answer::Destroyed);
            }
            session.record_traffic(Instant::now());
            let target = session.delivery_target();

            let sent = match drain_to(target.as_ref(), sender, config.batch_threshold) {
                Ok(sent) => sent,
                Err(PipeError::Transport(_)) => return Ok(Answer::Disconnected { delivered }),
                Err(PipeError::NoBuffer(_)) => {
                    let _ = send_status(&request.key, PipeStatus::Destroyed, sender);
                    return Ok(Answer::Destroyed);
                }
                Err(e) => return Err(e),
            };
            delivered += sent;
            if sent > 0 {
                continue;
            }

            if !target.wait_for_data(config.notify_interval)
                && send_status(&request.key, PipeStatus::Ok, sender).is_err()
            {
                session.record_failure();
                return Ok(Answer::Disconnected { delivered });
            }
        }
    }
}

enum Guarded {
    Live(Arc<PipeSession>),
    Replay,
    Dead,
}

#[derive(Default)]
struct BodySender(Vec<u8>);

impl PipeSender for BodySender {
    fn send(&mut self, bytes: &[u8]) -> simplepipe_transport::Result<()> {
        self.0.extend_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::thread;
    use std::time::Duration;

    use bytes::{BufMut, BytesMut};
    use simplepipe_frame::{PipeEvent, PipeKey};
    use simplepipe_transport::TransportError;

    use super::*;
    use crate::config::PipeConfig;
    use crate::handler::NoopHandler;

    #[derive(Debug)]
    struct Note(&'static str);

    impl PipeEvent for Note {
        fn tag(&self) -> &str {
            "Note"
        }
        fn encode_body(&self, dst: &mut BytesMut) -> simplepipe_frame::Result<()> {
            dst.put_slice(self.0.as_bytes());
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn server() -> PipeServer {
        PipeServer::new(SessionRegistry::new(PipeConfig {
            background_reaper: false,
            notify_interval: Duration::from_millis(20),
            ..PipeConfig::default()
        }))
    }

    fn open(server: &PipeServer) -> (PipeKey, Arc<PipeSession>) {
        let session = Arc::new(PipeSession::new(Arc::new(NoopHandler)));
        let key = server.registry().setup(&session).unwrap();
        (key, session)
    }

    fn query(key: PipeKey, counter: u64) -> PipeRequest {
        PipeRequest::new(key, RequestType::Query, 1, counter)
    }

    #[test]
    fn empty_query_gets_heartbeat() {
        let server = server();
        let (key, _) = open(&server);
        let (answer, body) = server.respond(&query(key, 1)).unwrap();
        assert_eq!(answer, Answer::Heartbeat);
        assert_eq!(body, Bytes::from(format!("{key}o")));
    }

    #[test]
    fn query_drains_with_sequence_ack() {
        let server = server();
        let (key, session) = open(&server);
        server
            .registry()
            .pipe_in(&key, &[Arc::new(Note("hi")) as _])
            .unwrap();

        let (answer, body) = server.respond(&query(key, 1)).unwrap();
        assert_eq!(answer, Answer::Delivered(1));
        assert_eq!(
            body,
            Bytes::from(format!("{key}Note#2$hi{key}SPS#7${{\"s\":2}}"))
        );
        assert_eq!(session.pending_len(), 0);
    }

    #[test]
    fn replayed_query_is_ignored() {
        let server = server();
        let (key, _) = open(&server);
        server.respond(&query(key, 5)).unwrap();
        let (answer, body) = server.respond(&query(key, 5)).unwrap();
        assert_eq!(answer, Answer::Ignored);
        assert!(body.is_empty());
    }

    #[test]
    fn unknown_pipe_gets_destroyed() {
        let server = server();
        let key: PipeKey = "Ab12Cd".parse().unwrap();
        let (answer, body) = server.respond(&query(key, 1)).unwrap();
        assert_eq!(answer, Answer::Destroyed);
        assert_eq!(body.as_ref(), b"Ab12Cdd");
    }

    #[test]
    fn notify_answers_ok_or_lost() {
        let server = server();
        let (key, session) = open(&server);
        let notify = PipeRequest::new(key, RequestType::Notify, 4, 1);

        let (answer, body) = server.respond(&notify).unwrap();
        assert_eq!(answer, Answer::Heartbeat);
        assert_eq!(body, Bytes::from(format!("{key}o")));
        assert_eq!(session.notify_sequence(), 4);

        server.registry().remove(&key);
        let (answer, body) = server.respond(&notify).unwrap();
        assert_eq!(answer, Answer::Lost);
        assert_eq!(body, Bytes::from(format!("{key}l")));
    }

    struct Limited {
        sent: Vec<Vec<u8>>,
        limit: usize,
    }

    impl PipeSender for Limited {
        fn send(&mut self, bytes: &[u8]) -> simplepipe_transport::Result<()> {
            if self.sent.len() >= self.limit {
                return Err(TransportError::Closed);
            }
            self.sent.push(bytes.to_vec());
            Ok(())
        }
    }

    #[test]
    fn continuum_streams_until_transport_fails() {
        let server = server();
        let (key, _) = open(&server);
        server
            .registry()
            .pipe_in(&key, &[Arc::new(Note("a")) as _])
            .unwrap();

        let mut sender = Limited {
            sent: Vec::new(),
            limit: 3,
        };
        let request = PipeRequest::new(key, RequestType::Continuum, 1, 1);
        let answer = server.handle(&request, &mut sender).unwrap();

        assert_eq!(answer, Answer::Disconnected { delivered: 1 });
        assert_eq!(sender.sent.len(), 3);
        assert_eq!(sender.sent[1], format!("{key}o").into_bytes());
    }

    #[test]
    fn continuum_ends_when_pipe_is_removed() {
        let server = server();
        let (key, _) = open(&server);
        let registry = server.registry().clone();
        let remover = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            registry.remove(&key);
        });

        let mut sender = BodySender::default();
        let request = PipeRequest::new(key, RequestType::Continuum, 1, 1);
        let answer = server.handle(&request, &mut sender).unwrap();
        remover.join().unwrap();

        assert_eq!(answer, Answer::Destroyed);
        assert!(sender.0.ends_with(format!("{key}d").as_bytes()));
    }

    #[test]
    fn continuum_wakes_on_new_data() {
        let server = server();
        let (key, _) = open(&server);
        let registry = server.registry().clone();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            registry.pipe_in(&key, &[Arc::new(Note("late")) as _]).unwrap();
        });

        let mut sender = Limited {
            sent: Vec::new(),
            limit: 8,
        };
        let request = PipeRequest::new(key, RequestType::Continuum, 1, 1);
        let answer = server.handle(&request, &mut sender).unwrap();
        producer.join().unwrap();

        assert_eq!(answer, Answer::Disconnected { delivered: 1 });
        assert!(sender
            .sent
            .iter()
            .any(|chunk| chunk.starts_with(format!("{key}Note#4$late").as_bytes())));
    }
}
