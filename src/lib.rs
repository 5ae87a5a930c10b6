//! # docbatch
//!
//! Batch document conversion: point it at a file or a folder, name a target
//! format, and every supported document underneath is converted, in
//! parallel, into a mirrored output tree.
//!
//! The actual format work is delegated to external tools (pandoc for every
//! conversion, pdf2docx for PDF input, ocrmypdf and pdftotext for scanned
//! PDFs). This crate is the orchestration around them: discovery, skip
//! policy, per-file time limits, choosing an execution backend and falling
//! back when it is unavailable, and reporting every file's fate in a stable
//! order.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source (file | dir)
//!  │
//!  ├─ 1. Discover  walk, filter by extension, mirror destination paths
//!  ├─ 2. Plan      split PDFs from the rest, pick backends per subset
//!  ├─ 3. Execute   helper processes | tokio pool | sequential
//!  │               (with fallback), one time limit per file
//!  └─ 4. Report    counts + outcomes sorted by source path
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docbatch::{convert_batch, BatchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder().workers(4).recursive(true).build()?;
//!     let report = convert_batch("./papers", "./papers-md", "markdown", &config).await?;
//!     eprintln!("{} converted, {} failed", report.converted, report.failed);
//!     for o in report.outcomes.iter().filter(|o| !o.success) {
//!         eprintln!("{}: {}", o.source.display(), o.error.as_deref().unwrap_or("?"));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docbatch` and `docbatch-worker` binaries (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docbatch = { version = "0.1", default-features = false }
//! ```
//!
//! Without `cli` the process backend has no helper binary to start, so PDF
//! batches run on the in-process pool unless `BatchConfig::worker_binary`
//! points at an installed `docbatch-worker`.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod executor;
pub mod formats;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod strategy;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{BatchConfig, BatchConfigBuilder, ExecutorPreference, OcrMode, TimeoutPolicy};
pub use convert::{convert_batch, convert_batch_sync, convert_file, list_convertible};
pub use error::{BackendUnavailable, DocBatchError, TaskError};
pub use formats::formats;
pub use metadata::{extract_metadata, ExtractionMode, MetadataRequest, MetadataResponse};
pub use output::{
    BatchReport, ConversionOutcome, ConversionTask, ConvertibleListing, FormatListing, Strategy,
};
pub use pipeline::tools::{Capabilities, ToolPaths};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
