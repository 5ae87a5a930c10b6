//! Data model: conversion tasks, per-task outcomes, and the batch report.
//!
//! Every report field is always present. Counts default to zero, lists to
//! empty, and "not applicable" is `None` (serialised as `null`), so JSON
//! consumers never need to test for key presence.

use crate::config::OcrMode;
use crate::error::TaskError;
use crate::formats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One file to convert. Built by the task builder, consumed by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionTask {
    /// Absolute or caller-relative source path.
    pub source: PathBuf,
    /// Where the converted file is written.
    pub destination: PathBuf,
    /// Canonical target format id (see [`crate::formats::canonicalize`]).
    pub format: String,
    /// When false, an existing destination short-circuits to a skip.
    pub overwrite: bool,
    /// OCR treatment for PDF sources.
    pub ocr: OcrMode,
}

impl ConversionTask {
    /// PDFs are the expensive cost class and are scheduled separately.
    pub fn is_pdf(&self) -> bool {
        formats::is_pdf(&self.source)
    }

    /// Whether this task runs the OCR stage.
    pub fn uses_ocr(&self) -> bool {
        self.ocr.is_enabled() && self.is_pdf()
    }
}

/// Result of one conversion attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutcome {
    /// Source file.
    pub source: PathBuf,
    /// Source extension, lowercase, without the dot.
    pub source_format: String,
    /// Destination path; `None` when the conversion failed.
    pub destination: Option<PathBuf>,
    /// True for converted and skipped files.
    pub success: bool,
    /// True when the destination already existed and `overwrite` was off.
    pub skipped: bool,
    /// Human-readable diagnostic for failed files.
    pub error: Option<String>,
}

impl ConversionOutcome {
    pub fn converted(task: &ConversionTask) -> Self {
        Self {
            source: task.source.clone(),
            source_format: source_format(&task.source),
            destination: Some(task.destination.clone()),
            success: true,
            skipped: false,
            error: None,
        }
    }

    pub fn skipped(task: &ConversionTask) -> Self {
        Self {
            skipped: true,
            ..Self::converted(task)
        }
    }

    pub fn failed(task: &ConversionTask, error: &TaskError) -> Self {
        Self {
            source: task.source.clone(),
            source_format: source_format(&task.source),
            destination: None,
            success: false,
            skipped: false,
            error: Some(error.to_string()),
        }
    }
}

fn source_format(path: &Path) -> String {
    formats::extension_of(path).unwrap_or_default()
}

/// How a subset of the batch was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One task at a time on the caller's task.
    Sequential,
    /// Bounded pool of in-process tasks.
    Threads,
    /// Bounded pool of helper processes, one per task.
    Processes,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Threads => "threads",
            Strategy::Processes => "processes",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one batch run.
///
/// Invariants: `total == converted + failed + skipped` and
/// `outcomes.len() == total`; outcomes are sorted by source path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// The batch ran. Individual failures are reported in `outcomes`.
    pub success: bool,
    pub total: usize,
    pub converted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub target_format: String,
    /// Clamped worker count the batch was planned with.
    pub worker_count: usize,
    /// Strategy used for the PDF subset; `None` when there were no PDFs.
    pub pdf_strategy: Option<Strategy>,
    /// Strategy used for everything else; `None` when there were only PDFs.
    pub other_strategy: Option<Strategy>,
    /// Informational note, e.g. when nothing matched.
    pub message: Option<String>,
    pub duration_ms: u64,
    pub outcomes: Vec<ConversionOutcome>,
}

impl BatchReport {
    /// Tally outcomes and build the report. Outcomes are re-sorted by source
    /// path so the report is independent of completion order.
    pub fn aggregate(
        target_format: impl Into<String>,
        worker_count: usize,
        pdf_strategy: Option<Strategy>,
        other_strategy: Option<Strategy>,
        mut outcomes: Vec<ConversionOutcome>,
        duration_ms: u64,
    ) -> Self {
        sort_outcomes(&mut outcomes);

        let skipped = outcomes.iter().filter(|o| o.skipped).count();
        let converted = outcomes.iter().filter(|o| o.success && !o.skipped).count();
        let failed = outcomes.iter().filter(|o| !o.success).count();

        Self {
            success: true,
            total: outcomes.len(),
            converted,
            failed,
            skipped,
            target_format: target_format.into(),
            worker_count,
            pdf_strategy,
            other_strategy,
            message: None,
            duration_ms,
            outcomes,
        }
    }

    /// Report for a batch that matched no files.
    pub fn empty(target_format: impl Into<String>, worker_count: usize) -> Self {
        Self {
            message: Some("No supported files found".to_string()),
            ..Self::aggregate(target_format, worker_count, None, None, Vec::new(), 0)
        }
    }
}

/// Sort outcomes by source path, byte-lexicographically.
pub fn sort_outcomes(outcomes: &mut [ConversionOutcome]) {
    outcomes.sort_by(|a, b| a.source.as_os_str().cmp(b.source.as_os_str()));
}

/// Convertible files under a path, grouped by extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertibleListing {
    pub success: bool,
    pub count: usize,
    /// Extension (lowercase, no dot) → sorted file list.
    pub by_format: BTreeMap<String, Vec<PathBuf>>,
}

/// Supported formats, as returned by [`crate::formats::formats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatListing {
    pub input_formats: Vec<String>,
    pub output_formats: Vec<String>,
    pub note: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(src: &str) -> ConversionTask {
        ConversionTask {
            source: PathBuf::from(src),
            destination: PathBuf::from(src).with_extension("md"),
            format: "markdown".into(),
            overwrite: true,
            ocr: OcrMode::Off,
        }
    }

    #[test]
    fn aggregate_tallies_and_sorts() {
        let outcomes = vec![
            ConversionOutcome::failed(&task("/d/c.pdf"), &TaskError::Timeout { secs: 5 }),
            ConversionOutcome::skipped(&task("/d/b.docx")),
            ConversionOutcome::converted(&task("/d/a.html")),
            ConversionOutcome::converted(&task("/d/a/z.md")),
        ];
        let report = BatchReport::aggregate("markdown", 4, None, Some(Strategy::Threads), outcomes, 12);

        assert!(report.success);
        assert_eq!(report.total, 4);
        assert_eq!(report.converted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.total, report.converted + report.failed + report.skipped);
        assert_eq!(report.outcomes.len(), report.total);

        let order: Vec<_> = report.outcomes.iter().map(|o| o.source.clone()).collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("/d/a.html"),
                PathBuf::from("/d/a/z.md"),
                PathBuf::from("/d/b.docx"),
                PathBuf::from("/d/c.pdf"),
            ]
        );
    }

    #[test]
    fn failed_outcome_has_no_destination() {
        let o = ConversionOutcome::failed(
            &task("/d/x.pdf"),
            &TaskError::TaskFailed("boom".into()),
        );
        assert!(!o.success);
        assert!(o.destination.is_none());
        assert_eq!(o.source_format, "pdf");
        assert_eq!(o.error.as_deref(), Some("Task failed: boom"));
    }

    #[test]
    fn skipped_counts_as_success() {
        let o = ConversionOutcome::skipped(&task("/d/x.md"));
        assert!(o.success && o.skipped);
        assert!(o.destination.is_some());
    }

    #[test]
    fn empty_report_keeps_every_field() {
        let report = BatchReport::empty("odt", 1);
        let json = serde_json::to_value(&report).expect("serialisable");
        for key in [
            "success",
            "total",
            "converted",
            "failed",
            "skipped",
            "pdf_strategy",
            "other_strategy",
            "outcomes",
        ] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(json["pdf_strategy"], serde_json::Value::Null);
        assert_eq!(report.message.as_deref(), Some("No supported files found"));
    }

    #[test]
    fn strategy_serialises_snake_case() {
        let s = serde_json::to_string(&Strategy::Processes).unwrap();
        assert_eq!(s, "\"processes\"");
    }
}
