//! Durable writer contract.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::constants::TIMEOUT_CODE;
use crate::payload::WritePatch;

/// Settlement of a single writer call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl WriteOutcome {
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            code: code.map(str::to_string),
            trace_id: None,
        }
    }

    /// The writer gave up waiting; the write may still land server-side.
    pub fn timed_out(error: impl Into<String>) -> Self {
        Self::failure(error, Some(TIMEOUT_CODE))
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// The external primitive that durably persists a patch.
///
/// Transport, retries and authentication are the implementation's concern.
/// The coordinator only relies on every call eventually settling, and
/// compensates with its own watchdog when one does not.
#[async_trait]
pub trait DurableWriter: Send + Sync {
    /// Attempts one write of `patch` to `resource_id`.
    ///
    /// `timeout` is the payload-size-based budget the implementation should
    /// apply to this call.
    async fn write(&self, resource_id: &str, patch: WritePatch, timeout: Duration) -> WriteOutcome;
}
