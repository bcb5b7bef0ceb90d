use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use simplepipe_frame::PipeEvent;

use crate::registry::SessionRegistry;
use crate::session::PipeSession;

/// Application hooks of a pipe session. Every hook has a no-op default.
pub trait PipeHandler: Send + Sync {
    /// Application-level setup, run once the session has a key.
    /// Returning false aborts the setup.
    fn setup(&self, _session: &PipeSession) -> bool {
        true
    }

    fn on_failed(&self, _session: &PipeSession) {}

    fn on_closed(&self, _session: &PipeSession) {}

    fn on_lost(&self, _session: &PipeSession) {}

    fn keep_live(&self, _session: &PipeSession) {}

    /// Fallback for events without a typed handler. Returns true if handled.
    fn deal(&self, _session: &PipeSession, _event: &Arc<dyn PipeEvent>) -> bool {
        false
    }
}

/// Handler that accepts everything and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl PipeHandler for NoopHandler {}

/// Replaces the default close path of a session.
///
/// The reaper calls it at most once per session instead of the
/// close-then-destroy default; the closer is then responsible for calling
/// [`SessionRegistry::destroy`].
pub trait PipeCloser: Send + Sync {
    fn help_closing(&self, registry: &SessionRegistry, session: &Arc<PipeSession>);
}

impl<F> PipeCloser for F
where
    F: Fn(&SessionRegistry, &Arc<PipeSession>) + Send + Sync,
{
    fn help_closing(&self, registry: &SessionRegistry, session: &Arc<PipeSession>) {
        self(registry, session)
    }
}

type DispatchFn = dyn Fn(&PipeSession, &dyn PipeEvent) -> bool + Send + Sync;

/// Typed event handlers keyed by payload type, fixed when the session is built.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<TypeId, Box<DispatchFn>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for events of type `T`, replacing any earlier one.
    pub fn on<T, F>(mut self, handler: F) -> Self
    where
        T: PipeEvent,
        F: Fn(&PipeSession, &T) -> bool + Send + Sync + 'static,
    {
        self.handlers.insert(
            TypeId::of::<T>(),
            Box::new(move |session, event| {
                event
                    .as_any()
                    .downcast_ref::<T>()
                    .is_some_and(|typed| handler(session, typed))
            }),
        );
        self
    }

    /// Run the handler registered for the event's concrete type.
    /// Returns `None` when no handler matches.
    pub fn dispatch(&self, session: &PipeSession, event: &dyn PipeEvent) -> Option<bool> {
        let type_id = Any::type_id(event.as_any());
        self.handlers
            .get(&type_id)
            .map(|handler| handler(session, event))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use bytes::BytesMut;
    use simplepipe_frame::PipeSequence;

    use super::*;

    #[derive(Debug)]
    struct Ping;

    impl PipeEvent for Ping {
        fn tag(&self) -> &str {
            "Ping"
        }
        fn encode_body(&self, _dst: &mut BytesMut) -> simplepipe_frame::Result<()> {
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn dispatches_by_concrete_type() {
        let pings = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&pings);
        let table = HandlerTable::new().on::<Ping, _>(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });
        let session = PipeSession::new(Arc::new(NoopHandler));

        assert_eq!(table.dispatch(&session, &Ping), Some(true));
        assert_eq!(table.dispatch(&session, &PipeSequence::new(1)), None);
        assert_eq!(pings.load(Ordering::SeqCst), 1);
        assert_eq!(table.len(), 1);
    }
}
