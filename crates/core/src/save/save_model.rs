//! Save request, result and status types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{INTERNAL_CODE, TIMEOUT_CODE};
use crate::payload::Patch;
use crate::writer::WriteOutcome;

/// A single caller invocation of `save`.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub resource_id: String,
    pub patch: Patch,
    /// Free-form label of the calling surface (e.g. "editor", "autosave").
    pub source: String,
    pub submitted_at: DateTime<Utc>,
}

impl SaveRequest {
    pub fn new(resource_id: impl Into<String>, patch: Patch, source: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            patch,
            source: source.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Settlement of a save, shared by every caller coalesced into it.
///
/// `ok: false` with `code == "TIMEOUT"` means the outcome is unknown: the
/// write may still have landed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl SaveResult {
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    /// Nothing needed writing.
    pub fn skipped() -> Self {
        Self {
            ok: true,
            skipped: true,
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            code: code.map(str::to_string),
            ..Self::default()
        }
    }

    /// The watchdog fired before the write settled.
    pub fn timed_out(timeout_ms: u128) -> Self {
        Self::failure(
            format!(
                "Save did not settle within {}ms; it may still complete",
                timeout_ms
            ),
            Some(TIMEOUT_CODE),
        )
    }

    pub(crate) fn internal(error: impl Into<String>) -> Self {
        Self::failure(error, Some(INTERNAL_CODE))
    }

    /// True when the outcome is unknown rather than failed.
    pub fn is_timeout(&self) -> bool {
        self.code.as_deref() == Some(TIMEOUT_CODE)
    }

    /// True when a write was attempted and definitely did not succeed.
    pub fn is_failure(&self) -> bool {
        !self.ok && !self.is_timeout()
    }
}

impl From<WriteOutcome> for SaveResult {
    fn from(outcome: WriteOutcome) -> Self {
        Self {
            ok: outcome.ok,
            skipped: false,
            error: outcome.error,
            code: outcome.code,
            trace_id: outcome.trace_id,
        }
    }
}

/// Coordination phase of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavePhase {
    #[default]
    Idle,
    /// An operation is waiting out the spacing since the last write start.
    Debouncing,
    Writing,
}

/// Introspection snapshot for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveStatus {
    pub is_saving: bool,
    /// Pending operations awaiting their turn (0 or 1).
    pub queue_length: usize,
    pub last_write_started_at: Option<DateTime<Utc>>,
    pub phase: SavePhase,
}
