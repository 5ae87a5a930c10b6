//! Error types for the docbatch library.
//!
//! Three distinct error types reflect three distinct failure modes:
//!
//! * [`DocBatchError`]: **Fatal**: the batch cannot proceed at all
//!   (input path missing, input neither file nor directory, bad config).
//!   Returned as `Err(DocBatchError)` from the top-level entry points.
//!
//! * [`TaskError`]: **Non-fatal**: a single file failed (external tool
//!   exited non-zero, timed out, worker crashed) while every other file is
//!   fine. Rendered into [`crate::output::ConversionOutcome::error`] so the
//!   batch report carries it as data.
//!
//! * [`BackendUnavailable`]: an execution backend could not be constructed.
//!   The executor reacts by falling back to the next strategy; callers never
//!   see it unless every strategy is exhausted.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docbatch library.
///
/// Per-file failures use [`TaskError`] and are stored in the batch report
/// rather than propagated here.
#[derive(Debug, Error)]
pub enum DocBatchError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input path does not exist.
    #[error("Input not found: '{path}'")]
    NotFound { path: PathBuf },

    /// Input exists but cannot be converted (not a file or directory, or a
    /// single file in an unsupported format).
    #[error("Invalid input '{path}': {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Metadata service errors ───────────────────────────────────────────
    /// The metadata service could not be reached at all.
    #[error("Metadata service at {endpoint} is unreachable: {reason}")]
    ServiceUnreachable { endpoint: String, reason: String },

    /// The metadata service answered with a non-200 status.
    #[error("Metadata service at {endpoint} returned HTTP {status}")]
    ServiceError { endpoint: String, status: u16 },

    /// The service response was not well-formed TEI.
    #[error("Failed to parse metadata response: {0}")]
    MetadataParse(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single conversion task.
///
/// The batch continues; the error's `Display` text becomes the outcome's
/// diagnostic string.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum TaskError {
    /// An external tool ran and exited unsuccessfully.
    ///
    /// `detail` is the tool's captured stderr when it wrote any, otherwise
    /// a description of the exit status.
    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: String, detail: String },

    /// An external tool could not be started (missing binary, permissions).
    #[error("could not launch {tool}: {detail}")]
    ToolLaunch { tool: String, detail: String },

    /// The task exceeded its allotted duration.
    #[error("conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The concurrency layer itself failed for this task (panic in the
    /// in-process pool, helper process crashed or printed garbage).
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Another source in the same batch already maps to this destination.
    #[error("destination {destination} is already the output of {other}")]
    DestinationConflict { destination: PathBuf, other: PathBuf },

    /// Local file-system work around the conversion failed.
    #[error("{context}: {detail}")]
    Io { context: String, detail: String },
}

impl TaskError {
    pub(crate) fn io(context: impl Into<String>, err: std::io::Error) -> Self {
        TaskError::Io {
            context: context.into(),
            detail: err.to_string(),
        }
    }
}

/// An execution backend could not be constructed for a batch phase.
#[derive(Debug, Clone, Error)]
#[error("{backend} backend unavailable: {reason}")]
pub struct BackendUnavailable {
    pub backend: &'static str,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let e = DocBatchError::NotFound {
            path: PathBuf::from("/no/such/dir"),
        };
        assert!(e.to_string().contains("/no/such/dir"));
    }

    #[test]
    fn unreachable_display_names_endpoint() {
        let e = DocBatchError::ServiceUnreachable {
            endpoint: "http://localhost:8070".into(),
            reason: "connection refused".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("http://localhost:8070"), "got: {msg}");
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn timeout_display_mentions_timeout() {
        let e = TaskError::Timeout { secs: 600 };
        assert!(e.to_string().contains("timed out"));
        assert!(e.to_string().contains("600s"));
    }

    #[test]
    fn task_failed_display_is_distinguishable() {
        let e = TaskError::TaskFailed("worker exited with signal 9".into());
        assert!(e.to_string().starts_with("Task failed:"));
    }

    #[test]
    fn tool_failed_display_carries_stderr() {
        let e = TaskError::ToolFailed {
            tool: "pandoc".into(),
            detail: "Unknown output format foo".into(),
        };
        assert_eq!(e.to_string(), "pandoc failed: Unknown output format foo");
    }

    #[test]
    fn backend_unavailable_display() {
        let e = BackendUnavailable {
            backend: "processes",
            reason: "helper executable not found".into(),
        };
        assert!(e.to_string().contains("processes backend unavailable"));
    }
}
