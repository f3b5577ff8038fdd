//! Durable execution primitives.
//!
//! Workflows built on this crate survive retries of the whole invocation:
//! - [`StepExecutor`] journals the outcome of every side-effecting action
//!   under `(invocation, step)` and replays it instead of re-running it.
//! - [`CorrelationBroker`] lets an invocation suspend on an awakeable token
//!   until an external reporter resolves or rejects it, or the wait times out.
//! - [`EntityStore`] holds keyed state with single-writer access per key;
//!   stores are opened through [`Runtime::entity_store`].
//! - [`CompensationStack`] records undo actions and unwinds them LIFO.
//!
//! [`InvocationContext`] ties the first two to one invocation id.

pub mod awakeable;
pub mod compensation;
pub mod context;
pub mod entity;
pub mod error;
mod locks;
pub mod step;

pub use awakeable::{
    Awakeable, AwakeableId, CorrelationBroker, Resolution, Settlement, TokenStatus,
};
pub use compensation::{CompensationFailure, CompensationReport, CompensationStack};
pub use context::{InvocationContext, Runtime};
pub use entity::EntityStore;
pub use error::{ActionError, Result, RuntimeError};
pub use step::StepExecutor;
