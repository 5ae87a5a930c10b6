//! Configuration types for batch conversion.
//!
//! All batch behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. Keeping every knob in one struct makes it trivial
//! to share a config across the worker pool and to log exactly what a run
//! was asked to do.

use crate::error::DocBatchError;
use crate::output::ConversionTask;
use crate::pipeline::tools::{Capabilities, ToolPaths};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on concurrent conversions, regardless of what was requested.
pub const MAX_WORKERS: usize = 16;

/// Configuration for a batch conversion.
///
/// # Example
/// ```rust
/// use docbatch::{BatchConfig, OcrMode};
///
/// let config = BatchConfig::builder()
///     .workers(4)
///     .recursive(true)
///     .overwrite(false)
///     .ocr(OcrMode::SkipText)
///     .build()
///     .unwrap();
/// assert_eq!(config.workers, 4);
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Number of concurrent conversions. Clamped to `1..=16`. Default: 1.
    ///
    /// With 1 worker (or a single task) the batch runs sequentially and no
    /// pool is built at all.
    pub workers: usize,

    /// Overwrite existing destination files. Default: true.
    ///
    /// When false, a destination that already exists counts as converted
    /// and is reported as skipped, so an interrupted batch can be resumed by
    /// running it again.
    pub overwrite: bool,

    /// Only convert files with this extension (e.g. `"pdf"`). Default: all
    /// supported input formats. Case and a leading dot are ignored.
    pub filter: Option<String>,

    /// Descend into subdirectories. Default: false.
    pub recursive: bool,

    /// OCR treatment for PDF sources. Default: [`OcrMode::Off`].
    pub ocr: OcrMode,

    /// Which backends the PDF subset may use. Default: [`ExecutorPreference::Auto`].
    pub executor: ExecutorPreference,

    /// Per-task time limits by operation type.
    pub timeouts: TimeoutPolicy,

    /// Locations of the external tools.
    pub tools: ToolPaths,

    /// Explicit path to the `docbatch-worker` helper. If None, the helper is
    /// looked up next to the running executable.
    pub worker_binary: Option<PathBuf>,

    /// Pre-detected tool availability. If None, detected once per batch.
    pub capabilities: Option<Capabilities>,

    /// Receives per-task progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            overwrite: true,
            filter: None,
            recursive: false,
            ocr: OcrMode::default(),
            executor: ExecutorPreference::default(),
            timeouts: TimeoutPolicy::default(),
            tools: ToolPaths::default(),
            worker_binary: None,
            capabilities: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("workers", &self.workers)
            .field("overwrite", &self.overwrite)
            .field("filter", &self.filter)
            .field("recursive", &self.recursive)
            .field("ocr", &self.ocr)
            .field("executor", &self.executor)
            .field("timeouts", &self.timeouts)
            .field("tools", &self.tools)
            .field("worker_binary", &self.worker_binary)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.clamp(1, MAX_WORKERS);
        self
    }

    pub fn overwrite(mut self, v: bool) -> Self {
        self.config.overwrite = v;
        self
    }

    pub fn filter(mut self, ext: impl Into<String>) -> Self {
        self.config.filter = Some(ext.into());
        self
    }

    pub fn recursive(mut self, v: bool) -> Self {
        self.config.recursive = v;
        self
    }

    pub fn ocr(mut self, mode: OcrMode) -> Self {
        self.config.ocr = mode;
        self
    }

    pub fn executor(mut self, pref: ExecutorPreference) -> Self {
        self.config.executor = pref;
        self
    }

    pub fn timeouts(mut self, policy: TimeoutPolicy) -> Self {
        self.config.timeouts = policy;
        self
    }

    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn worker_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.worker_binary = Some(path.into());
        self
    }

    pub fn capabilities(mut self, caps: Capabilities) -> Self {
        self.config.capabilities = Some(caps);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<BatchConfig, DocBatchError> {
        if let Some(ref filter) = self.config.filter {
            let ext = normalize_filter(filter);
            if ext.is_empty() {
                return Err(DocBatchError::InvalidConfig(
                    "Extension filter must not be empty".into(),
                ));
            }
            self.config.filter = Some(ext);
        }
        let t = &self.config.timeouts;
        if t.document.is_zero() || t.pdf.is_zero() || t.ocr.is_zero() {
            return Err(DocBatchError::InvalidConfig(
                "Timeouts must be greater than zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// OCR treatment for PDF sources. Non-PDF sources ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrMode {
    /// No OCR; PDFs go through the intermediate-docx route. (default)
    #[default]
    Off,
    /// OCR pages without a text layer; PDFs that already have text are
    /// passed through unchanged.
    SkipText,
    /// Rasterise and OCR every page, replacing any existing text layer.
    Force,
}

impl OcrMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, OcrMode::Off)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OcrMode::Off => "off",
            OcrMode::SkipText => "skip-text",
            OcrMode::Force => "force",
        }
    }
}

impl FromStr for OcrMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(OcrMode::Off),
            "skip-text" | "skip_text" | "auto" => Ok(OcrMode::SkipText),
            "force" => Ok(OcrMode::Force),
            other => Err(format!(
                "unknown OCR mode '{other}' (expected off, skip-text or force)"
            )),
        }
    }
}

/// Canonical form of an extension filter: trimmed, no leading dot, lowercase.
pub fn normalize_filter(filter: &str) -> String {
    filter.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Which execution backends the PDF subset may use.
///
/// Non-PDF conversions always run on the in-process pool: each one shells
/// out to an independent converter process anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorPreference {
    /// Helper processes for PDFs, falling back to the in-process pool if the
    /// helper cannot be started. (default)
    #[default]
    Auto,
    /// In-process pool only. Useful on network file systems where spawning
    /// a helper per file is slow.
    Threads,
}

/// Per-task time limits, chosen by operation type.
///
/// OCR is the slowest path (rasterise + recognise every page), PDF
/// conversion next, and plain format conversion the fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Non-PDF conversions. Default: 5 minutes.
    pub document: Duration,
    /// PDF conversions through the intermediate docx. Default: 10 minutes.
    pub pdf: Duration,
    /// PDF conversions through OCR and text extraction. Default: 15 minutes.
    pub ocr: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            document: Duration::from_secs(300),
            pdf: Duration::from_secs(600),
            ocr: Duration::from_secs(900),
        }
    }
}

impl TimeoutPolicy {
    /// Same limit for every operation type.
    pub fn uniform(limit: Duration) -> Self {
        Self {
            document: limit,
            pdf: limit,
            ocr: limit,
        }
    }

    /// Time limit for one task.
    pub fn for_task(&self, task: &ConversionTask) -> Duration {
        if task.uses_ocr() {
            self.ocr
        } else if task.is_pdf() {
            self.pdf
        } else {
            self.document
        }
    }
}
