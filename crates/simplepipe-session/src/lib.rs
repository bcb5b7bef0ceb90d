//! Pipe session engine.
//!
//! A [`SessionRegistry`] maps keys to [`PipeSession`]s. Producers push events
//! into a session's [`DeliveryBuffer`]; [`PipeServer`] drains buffers into
//! framed response bodies; [`SessionCodec`] parses bodies back into events on
//! the other end. Liveness is tracked through sequence numbers and
//! timestamps, and the reaper retires sessions whose peer went away.
//!
//! Background work runs on plain threads owned by the registry:
//! - a sweep every monitoring interval over managed sessions
//! - a destroy worker fed through a bounded queue
//! - a private monitor per unmanaged session
//! - the [`LiveNotifier`] for client-side pipes

pub mod buffer;
pub mod client;
pub mod codec;
pub mod compound;
pub mod config;
pub mod error;
pub mod handler;
pub mod liveness;
pub mod notifier;
pub mod reaper;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use buffer::{DeliveryBuffer, EnqueueOutcome, Reservation};
pub use client::{QueryDriver, QueryOutcome};
pub use codec::{drain_to, send_status, ParseOutcome, ReceivedEvent, SessionCodec};
pub use compound::CompoundSlots;
pub use config::PipeConfig;
pub use error::{PipeError, Result};
pub use handler::{HandlerTable, NoopHandler, PipeCloser, PipeHandler};
pub use liveness::{assess, LivenessState};
pub use notifier::{LiveNotifier, NotifyReport};
pub use reaper::{StopSignal, SweepReport};
pub use registry::SessionRegistry;
pub use server::{Answer, PipeServer};
pub use session::{PipeSession, Timers};
pub use stats::{render_statistics, CompoundSummary, SessionSummary, SlotSummary};
