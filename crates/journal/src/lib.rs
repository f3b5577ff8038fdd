//! Persistence contract for durable workflow execution.
//!
//! The [`Journal`] trait is everything the runtime needs from a storage
//! engine: write-once step records keyed by `(invocation, step)`, keyed
//! entity state, and an append-only per-invocation event log guarded by
//! optimistic version checks. [`InMemoryJournal`] implements it for tests
//! and the demo binary.

pub mod error;
pub mod event;
pub mod memory;
pub mod step;
pub mod store;

pub use common::InvocationId;
pub use error::{JournalError, Result};
pub use event::{EventEnvelope, Version};
pub use memory::InMemoryJournal;
pub use step::{StepKey, StepRecord, StepStatus};
pub use store::Journal;
