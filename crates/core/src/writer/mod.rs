//! Writer module - the durable write primitive the coordinator drives.

mod memory_writer;
mod writer_traits;

pub use memory_writer::{MemoryWriter, WriteBehavior, WriteCall};
pub use writer_traits::{DurableWriter, WriteOutcome};
