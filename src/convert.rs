//! Batch conversion entry points.
//!
//! [`convert_batch`] is the primary API: discover, plan, execute, aggregate.
//! It returns `Err` only when the batch cannot start (missing input, bad
//! input, no backend at all); per-file failures are data inside the report.

use crate::config::BatchConfig;
use crate::error::DocBatchError;
use crate::executor::{self, ExecutionContext};
use crate::formats;
use crate::output::{BatchReport, ConversionOutcome, ConversionTask, Strategy};
use crate::pipeline::discover;
use crate::pipeline::tools::{self, Capabilities};
use crate::strategy::{self, CostClass};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use crate::pipeline::discover::list_convertible;

/// Convert a file or directory of documents to one target format.
///
/// # Arguments
/// * `source`:     a single file or a directory
/// * `destination`: output directory (or output file, for a single source)
/// * `format`:     target format name; aliases such as `md` are accepted
/// * `config`:     batch configuration
///
/// # Returns
/// `Ok(BatchReport)` whenever the batch ran, even if every file failed
/// (check `report.failed` and the per-file `outcomes`).
///
/// # Errors
/// * [`DocBatchError::NotFound`]: `source` does not exist
/// * [`DocBatchError::InvalidInput`]: `source` is neither file nor
///   directory, or is a single file in an unsupported format
/// * [`DocBatchError::Internal`]: no execution backend could be built
pub async fn convert_batch(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    format: &str,
    config: &BatchConfig,
) -> Result<BatchReport, DocBatchError> {
    let start = Instant::now();
    let source = source.as_ref();
    let destination = destination.as_ref();

    // ── Step 1: Canonicalise the target format ───────────────────────────
    let format_id = formats::canonicalize(format);
    info!(
        "Starting batch: {} → {} ({})",
        source.display(),
        destination.display(),
        format_id
    );

    // ── Step 2: Build tasks ──────────────────────────────────────────────
    let tasks = discover::build_tasks(source, destination, &format_id, config)?;
    if tasks.is_empty() {
        info!("No supported files found under {}", source.display());
        let report = BatchReport::empty(format_id, strategy::clamp_workers(config.workers));
        if let Some(ref cb) = config.progress_callback {
            cb.on_batch_complete(&report);
        }
        return Ok(report);
    }
    let total = tasks.len();
    let (tasks, conflicts) = discover::claim_destinations(tasks);

    // ── Step 3: Resolve capabilities ─────────────────────────────────────
    let caps = resolve_capabilities(config);
    warn_missing_tools(&caps, &tasks);

    // ── Step 4: Plan ─────────────────────────────────────────────────────
    let plan = strategy::plan(tasks, config.workers, config.executor);
    debug!(
        "Planned {} phase(s) with {} worker(s)",
        plan.phases.len(),
        plan.workers
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    // ── Step 5: Execute each phase ───────────────────────────────────────
    let ctx = Arc::new(execution_context(config, &caps));
    let mut pdf_strategy: Option<Strategy> = None;
    let mut other_strategy: Option<Strategy> = None;
    let mut outcomes: Vec<ConversionOutcome> = Vec::with_capacity(total);

    if let Some(ref cb) = config.progress_callback {
        for outcome in &conflicts {
            cb.on_task_start(&outcome.source);
            cb.on_task_complete(outcome);
        }
    }
    outcomes.extend(conflicts);

    for phase in &plan.phases {
        let (used, phase_outcomes) = executor::run_phase(phase, plan.workers, &ctx).await?;
        match phase.class {
            CostClass::Pdf => pdf_strategy = Some(used),
            CostClass::Other => other_strategy = Some(used),
        }
        outcomes.extend(phase_outcomes);
    }

    // ── Step 6: Aggregate ────────────────────────────────────────────────
    let report = BatchReport::aggregate(
        format_id,
        plan.workers,
        pdf_strategy,
        other_strategy,
        outcomes,
        start.elapsed().as_millis() as u64,
    );

    info!(
        "Batch complete: {} converted, {} skipped, {} failed of {} in {}ms",
        report.converted, report.skipped, report.failed, report.total, report.duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(&report);
    }

    Ok(report)
}

/// Synchronous wrapper around [`convert_batch`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_batch_sync(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    format: &str,
    config: &BatchConfig,
) -> Result<BatchReport, DocBatchError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DocBatchError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_batch(source, destination, format, config))
}

/// Convert exactly one file, on the caller's task.
///
/// Same skip and timeout rules as a batch. A conversion failure is reported
/// in the returned outcome, not as `Err`.
pub async fn convert_file(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    format: &str,
    config: &BatchConfig,
) -> Result<ConversionOutcome, DocBatchError> {
    let source = source.as_ref();
    if source.is_dir() {
        return Err(DocBatchError::InvalidInput {
            path: source.to_path_buf(),
            reason: "expected a single file, got a directory".into(),
        });
    }

    let format_id = formats::canonicalize(format);
    let tasks = discover::build_tasks(source, destination.as_ref(), &format_id, config)?;
    let task = tasks
        .into_iter()
        .next()
        .ok_or_else(|| DocBatchError::Internal("no task built for single file".into()))?;

    let caps = resolve_capabilities(config);
    warn_missing_tools(&caps, std::slice::from_ref(&task));
    Ok(executor::run_one(&task, &execution_context(config, &caps)).await)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Caller-supplied capabilities win; an explicit helper path always
/// overrides whatever helper they recorded.
fn resolve_capabilities(config: &BatchConfig) -> Capabilities {
    match config.capabilities {
        Some(ref caps) => {
            let mut caps = caps.clone();
            if let Some(ref explicit) = config.worker_binary {
                caps.worker = tools::locate_worker(Some(explicit));
            }
            caps
        }
        None => Capabilities::detect(&config.tools, config.worker_binary.as_deref()),
    }
}

fn execution_context(config: &BatchConfig, caps: &Capabilities) -> ExecutionContext {
    ExecutionContext {
        tools: config.tools.clone(),
        timeouts: config.timeouts,
        worker: caps.worker.clone(),
        progress: config.progress_callback.clone(),
    }
}

/// Missing tools are not fatal; the affected files fail individually.
fn warn_missing_tools(caps: &Capabilities, tasks: &[ConversionTask]) {
    let needs_pdf = tasks.iter().any(|t| t.is_pdf() && !t.uses_ocr());
    let needs_ocr = tasks.iter().any(ConversionTask::uses_ocr);

    for tool in caps.missing() {
        let relevant = match tool {
            "pdf2docx" => needs_pdf,
            "ocrmypdf" | "pdftotext" => needs_ocr,
            _ => true,
        };
        if relevant {
            warn!("{} not found; affected files will fail", tool);
        }
    }
}
