//! Optional JSON Schema validation of pipe payload bodies.
//!
//! Validators are keyed by payload tag. A [`SchemaRegistry`] plugs into a
//! `PayloadRegistry` as its body validator, so a body that violates its
//! schema fails the whole parse before any decoder runs.

pub mod config;
pub mod error;
pub mod registry;

pub use config::RegistryConfig;
pub use error::{Result, SchemaError};
pub use registry::SchemaRegistry;
