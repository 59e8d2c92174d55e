//! Save module - per-resource write coordination.
//!
//! The coordinator serializes writes per resource id, coalesces overlapping
//! submissions into a single pending operation, spaces write starts by the
//! debounce interval and bounds every write with a watchdog.
//!
//! ```text
//! save() → ResourceSaveState (pending slot) → driver task
//!                                                 ↓
//!                         perform_save (single write | chunks → fallback)
//!                                                 ↓
//!                                          DurableWriter
//! ```

mod save_config;
mod save_coordinator;
mod save_errors;
mod save_model;
mod save_pipeline;
mod save_state;


pub use save_config::SaveConfig;
pub use save_coordinator::SaveCoordinator;
pub use save_errors::SaveError;
pub use save_model::{SavePhase, SaveRequest, SaveResult, SaveStatus};
