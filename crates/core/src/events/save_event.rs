//! Save lifecycle event types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::PayloadCategory;

/// Events emitted by the coordinator as saves move through their lifecycle.
///
/// These are facts about coordination, not about the stored data. Adapters
/// translate them into UI indicators, metrics or logs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SaveEvent {
    /// A submission is waiting for its turn. `merged` is true when it was
    /// folded into an already pending operation.
    Queued {
        resource_id: String,
        source: String,
        merged: bool,
    },

    /// A writer call sequence started for a promoted operation.
    WriteStarted {
        resource_id: String,
        write_id: Uuid,
        source: String,
        /// Callers sharing this write's settlement
        waiters: usize,
    },

    /// A write was split into chunks.
    Chunked {
        resource_id: String,
        category: PayloadCategory,
        chunks: usize,
    },

    /// A chunk failed and the full patch is being written instead.
    ChunkFallback { resource_id: String, chunk: String },

    /// A promoted write settled.
    Completed {
        resource_id: String,
        write_id: Uuid,
        ok: bool,
        code: Option<String>,
    },

    /// No writer call was needed.
    Skipped { resource_id: String, reason: String },

    /// The watchdog fired before the write settled; outcome unknown.
    TimedOut { resource_id: String, write_id: Uuid },

    /// A write the watchdog gave up on settled after all.
    LateSettlement {
        resource_id: String,
        write_id: Uuid,
        ok: bool,
    },

    /// Pending work for a resource was cancelled.
    Cancelled {
        resource_id: String,
        rejected_waiters: usize,
    },
}

impl SaveEvent {
    pub fn queued(resource_id: &str, source: &str, merged: bool) -> Self {
        Self::Queued {
            resource_id: resource_id.to_string(),
            source: source.to_string(),
            merged,
        }
    }

    pub fn write_started(resource_id: &str, write_id: Uuid, source: &str, waiters: usize) -> Self {
        Self::WriteStarted {
            resource_id: resource_id.to_string(),
            write_id,
            source: source.to_string(),
            waiters,
        }
    }

    pub fn skipped(resource_id: &str, reason: impl Into<String>) -> Self {
        Self::Skipped {
            resource_id: resource_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns the resource this event concerns.
    pub fn resource_id(&self) -> &str {
        match self {
            Self::Queued { resource_id, .. }
            | Self::WriteStarted { resource_id, .. }
            | Self::Chunked { resource_id, .. }
            | Self::ChunkFallback { resource_id, .. }
            | Self::Completed { resource_id, .. }
            | Self::Skipped { resource_id, .. }
            | Self::TimedOut { resource_id, .. }
            | Self::LateSettlement { resource_id, .. }
            | Self::Cancelled { resource_id, .. } => resource_id,
        }
    }
}
