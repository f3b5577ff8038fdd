//! Shared identifiers and value types.

pub mod types;

pub use types::{InvocationId, Money};
