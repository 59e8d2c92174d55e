//! Savekeeper Core - per-resource save coordination.
//!
//! This crate sits between interactive editors and a durable store. It
//! coalesces rapid partial updates per resource, guarantees at most one
//! in-flight write per resource, and splits large payloads into ordered
//! chunks. The store itself is abstracted behind [`writer::DurableWriter`].

pub mod constants;
pub mod errors;
pub mod events;
pub mod payload;
pub mod save;
pub mod writer;

// Re-export the coordinator surface
pub use payload::{FieldValue, Patch, WritePatch};
pub use save::{SaveConfig, SaveCoordinator, SaveError, SaveResult, SaveStatus};
pub use writer::{DurableWriter, WriteOutcome};

// Re-export error types
pub use errors::Error;
pub use errors::Result;
