//! Save events module.
//!
//! Provides save lifecycle event types and the sink trait the coordinator
//! emits them through. Embedding applications implement the sink to drive
//! "saving…" indicators or metrics.

mod save_event;
mod sink;

pub use save_event::*;
pub use sink::*;
