//! Batch executor: run the tasks of one phase to completion.
//!
//! ## Backends
//!
//! | Strategy     | Mechanism                                                   |
//! |--------------|-------------------------------------------------------------|
//! | `Sequential` | one task at a time on the caller's task                     |
//! | `Threads`    | `tokio::spawn` per task, at most `workers` in flight        |
//! | `Processes`  | one `docbatch-worker` process per task, `workers` in flight |
//!
//! Every task carries its own time limit ([`crate::config::TimeoutPolicy`]).
//! A task that exceeds it becomes a failed outcome; the child process is
//! killed when its handle is dropped (`kill_on_drop`). Grandchildren of a
//! helper process are not tracked and may outlive it.
//!
//! ## Fallback
//!
//! [`run_phase`] tries the phase's strategies in order. A backend that
//! cannot be built yields [`BackendUnavailable`] and the whole phase is
//! re-run on the next strategy. Each attempt collects into a fresh result
//! vector, so nothing from a failed attempt reaches the report.

use crate::config::TimeoutPolicy;
use crate::error::{BackendUnavailable, DocBatchError, TaskError};
use crate::output::{ConversionOutcome, ConversionTask, Strategy};
use crate::pipeline::single;
use crate::pipeline::tools::{ToolPaths, WORKER_BIN_NAME};
use crate::progress::ProgressCallback;
use crate::strategy::Phase;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How long the helper gets to answer `--probe`.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a task needs besides the task itself. Shared across workers.
pub struct ExecutionContext {
    pub tools: ToolPaths,
    pub timeouts: TimeoutPolicy,
    /// Resolved helper executable, if any.
    pub worker: Option<PathBuf>,
    pub progress: Option<ProgressCallback>,
}

/// Run one phase, falling back through its strategies.
///
/// Returns the strategy that actually ran and one outcome per task, in
/// completion order.
pub async fn run_phase(
    phase: &Phase,
    workers: usize,
    ctx: &Arc<ExecutionContext>,
) -> Result<(Strategy, Vec<ConversionOutcome>), DocBatchError> {
    let mut last_error: Option<BackendUnavailable> = None;

    for (i, &strategy) in phase.strategies.iter().enumerate() {
        match Backend::build(strategy, workers, ctx.worker.as_deref()).await {
            Ok(backend) => {
                info!(
                    "Running {} {:?} task(s) with {} strategy",
                    phase.tasks.len(),
                    phase.class,
                    strategy
                );
                let outcomes = backend.run(&phase.tasks, ctx).await;
                return Ok((strategy, outcomes));
            }
            Err(e) => {
                if let Some(&next) = phase.strategies.get(i + 1) {
                    warn!("{}; falling back to {} strategy", e, next);
                    if let Some(ref cb) = ctx.progress {
                        cb.on_fallback(strategy, next, &e.reason);
                    }
                }
                last_error = Some(e);
            }
        }
    }

    Err(DocBatchError::Internal(match last_error {
        Some(e) => format!("no execution backend available: {e}"),
        None => "no execution strategy planned".to_string(),
    }))
}

/// Run a single task on the caller's task: skip check, time limit and
/// progress events included.
pub async fn run_one(task: &ConversionTask, ctx: &ExecutionContext) -> ConversionOutcome {
    observed(ctx, task, run_in_process(task, ctx)).await
}

// ── Backends ─────────────────────────────────────────────────────────────

enum Backend {
    Sequential,
    Threads { workers: usize },
    Processes { workers: usize, pool: ProcessPool },
}

impl Backend {
    async fn build(
        strategy: Strategy,
        workers: usize,
        worker: Option<&Path>,
    ) -> Result<Self, BackendUnavailable> {
        match strategy {
            Strategy::Sequential => Ok(Backend::Sequential),
            Strategy::Threads => {
                tokio::runtime::Handle::try_current().map_err(|e| BackendUnavailable {
                    backend: "threads",
                    reason: e.to_string(),
                })?;
                Ok(Backend::Threads { workers })
            }
            Strategy::Processes => {
                let pool = ProcessPool::start(worker).await?;
                Ok(Backend::Processes { workers, pool })
            }
        }
    }

    async fn run(
        &self,
        tasks: &[ConversionTask],
        ctx: &Arc<ExecutionContext>,
    ) -> Vec<ConversionOutcome> {
        match self {
            Backend::Sequential => {
                let mut outcomes = Vec::with_capacity(tasks.len());
                for task in tasks {
                    outcomes.push(observed(ctx, task, run_in_process(task, ctx)).await);
                }
                outcomes
            }
            Backend::Threads { workers } => {
                stream::iter(tasks.iter().map(|task| {
                    let ctx = Arc::clone(ctx);
                    async move {
                        let owned = task.clone();
                        let inner = Arc::clone(&ctx);
                        let handle =
                            tokio::spawn(async move { run_in_process(&owned, &inner).await });
                        observed(&ctx, task, async move {
                            handle.await.unwrap_or_else(|e| {
                                ConversionOutcome::failed(task, &TaskError::TaskFailed(e.to_string()))
                            })
                        })
                        .await
                    }
                }))
                .buffer_unordered(*workers)
                .collect()
                .await
            }
            Backend::Processes { workers, pool } => {
                stream::iter(tasks.iter().map(|task| {
                    let ctx = Arc::clone(ctx);
                    async move { observed(&ctx, task, pool.run(task, &ctx)).await }
                }))
                .buffer_unordered(*workers)
                .collect()
                .await
            }
        }
    }
}

/// Fire progress events around one task.
async fn observed<F>(ctx: &ExecutionContext, task: &ConversionTask, fut: F) -> ConversionOutcome
where
    F: std::future::Future<Output = ConversionOutcome>,
{
    if let Some(ref cb) = ctx.progress {
        cb.on_task_start(&task.source);
    }
    let outcome = fut.await;
    if let Some(ref cb) = ctx.progress {
        cb.on_task_complete(&outcome);
    }
    outcome
}

/// Skip check, destination directory, then the conversion under its time
/// limit. Used by both the sequential and the in-process pool backends.
async fn run_in_process(task: &ConversionTask, ctx: &ExecutionContext) -> ConversionOutcome {
    if let Some(outcome) = preflight(task).await {
        return outcome;
    }
    let limit = ctx.timeouts.for_task(task);
    match tokio::time::timeout(limit, single::convert_one(task, &ctx.tools)).await {
        Ok(outcome) => outcome,
        Err(_) => timed_out(task, limit),
    }
}

/// Short-circuit a task before any converter runs.
///
/// Returns a skipped outcome when the destination exists and overwriting is
/// off, or a failed one when the destination directory cannot be created.
/// `None` means the task should run.
pub(crate) async fn preflight(task: &ConversionTask) -> Option<ConversionOutcome> {
    if !task.overwrite && tokio::fs::try_exists(&task.destination).await.unwrap_or(false) {
        debug!("Skipping {}: destination exists", task.source.display());
        return Some(ConversionOutcome::skipped(task));
    }

    if let Some(parent) = task.destination.parent() {
        // create_dir_all tolerates a concurrent sibling creating it first.
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            let err = TaskError::io(format!("create {}", parent.display()), e);
            return Some(ConversionOutcome::failed(task, &err));
        }
    }
    None
}

fn timed_out(task: &ConversionTask, limit: Duration) -> ConversionOutcome {
    warn!(
        "Conversion of {} exceeded {}s, abandoning",
        task.source.display(),
        limit.as_secs()
    );
    ConversionOutcome::failed(
        task,
        &TaskError::Timeout {
            secs: limit.as_secs(),
        },
    )
}

// ── Process pool ─────────────────────────────────────────────────────────

/// Runs each task in its own `docbatch-worker` process.
struct ProcessPool {
    worker: PathBuf,
}

impl ProcessPool {
    /// Check that the helper exists and answers `--probe`.
    async fn start(worker: Option<&Path>) -> Result<Self, BackendUnavailable> {
        let unavailable = |reason: String| BackendUnavailable {
            backend: "processes",
            reason,
        };

        let worker =
            worker.ok_or_else(|| unavailable(format!("{WORKER_BIN_NAME} executable not found")))?;

        let probe = Command::new(worker)
            .arg("--probe")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(PROBE_TIMEOUT, probe)
            .await
            .map_err(|_| unavailable(format!("{} did not answer probe", worker.display())))?
            .map_err(|e| unavailable(format!("cannot start {}: {e}", worker.display())))?;

        if !output.status.success() || String::from_utf8_lossy(&output.stdout).trim() != "ok" {
            return Err(unavailable(format!(
                "{} probe failed ({})",
                worker.display(),
                output.status
            )));
        }

        debug!("Helper process ready: {}", worker.display());
        Ok(Self {
            worker: worker.to_path_buf(),
        })
    }

    async fn run(&self, task: &ConversionTask, ctx: &ExecutionContext) -> ConversionOutcome {
        if let Some(outcome) = preflight(task).await {
            return outcome;
        }

        let mut cmd = Command::new(&self.worker);
        cmd.arg(&task.source)
            .arg(&task.destination)
            .arg(&task.format)
            .arg("--ocr")
            .arg(task.ocr.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        ctx.tools.export_env(&mut cmd);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = TaskError::TaskFailed(format!("could not start worker: {e}"));
                return ConversionOutcome::failed(task, &err);
            }
        };

        let limit = ctx.timeouts.for_task(task);
        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let err = TaskError::TaskFailed(format!("lost contact with worker: {e}"));
                return ConversionOutcome::failed(task, &err);
            }
            Err(_) => return timed_out(task, limit),
        };

        match parse_worker_output(&output.stdout) {
            Some(outcome) if output.status.success() => outcome,
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let err = TaskError::TaskFailed(format!(
                    "worker exited with {}: {}",
                    output.status,
                    stderr.trim()
                ));
                ConversionOutcome::failed(task, &err)
            }
        }
    }
}

/// The worker prints exactly one JSON outcome as its last stdout line.
fn parse_worker_output(stdout: &[u8]) -> Option<ConversionOutcome> {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().rev().find(|l| !l.trim().is_empty())?;
    serde_json::from_str(line).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutorPreference, OcrMode};
    use crate::strategy;

    fn task(dir: &Path, name: &str, overwrite: bool) -> ConversionTask {
        ConversionTask {
            source: dir.join(name),
            destination: dir.join("out").join(format!("{name}.md")),
            format: "markdown".into(),
            overwrite,
            ocr: OcrMode::Off,
        }
    }

    fn ctx(worker: Option<PathBuf>) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext {
            tools: ToolPaths::default(),
            timeouts: TimeoutPolicy::default(),
            worker,
            progress: None,
        })
    }

    #[tokio::test]
    async fn preflight_skips_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let t = task(dir.path(), "a.html", false);
        std::fs::create_dir_all(t.destination.parent().unwrap()).unwrap();
        std::fs::write(&t.destination, "keep me").unwrap();

        let outcome = preflight(&t).await.expect("short-circuit");
        assert!(outcome.skipped && outcome.success);
        assert_eq!(std::fs::read_to_string(&t.destination).unwrap(), "keep me");
    }

    #[tokio::test]
    async fn preflight_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let t = task(dir.path(), "a.html", true);
        assert!(preflight(&t).await.is_none());
        assert!(t.destination.parent().unwrap().is_dir());
    }

    #[tokio::test]
    async fn missing_worker_is_unavailable() {
        let err = ProcessPool::start(None).await.err().unwrap();
        assert_eq!(err.backend, "processes");
        assert!(err.reason.contains(WORKER_BIN_NAME));
    }

    #[tokio::test]
    async fn phase_falls_back_to_threads() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = vec![task(dir.path(), "a.pdf", false), task(dir.path(), "b.pdf", false)];
        for t in &tasks {
            std::fs::create_dir_all(t.destination.parent().unwrap()).unwrap();
            std::fs::write(&t.destination, "done").unwrap();
        }
        let plan = strategy::plan(tasks, 2, ExecutorPreference::Auto);

        let (used, outcomes) = run_phase(&plan.phases[0], 2, &ctx(None)).await.unwrap();
        assert_eq!(used, Strategy::Threads);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.skipped));
    }

    #[tokio::test]
    async fn no_backend_left_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let phase = Phase {
            class: strategy::CostClass::Pdf,
            tasks: vec![task(dir.path(), "a.pdf", true)],
            strategies: vec![Strategy::Processes],
        };
        let err = run_phase(&phase, 2, &ctx(Some(dir.path().join("nope"))))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no execution backend available"));
    }

    #[test]
    fn worker_output_uses_last_line() {
        let t = task(Path::new("/d"), "x.pdf", true);
        let json = serde_json::to_string(&ConversionOutcome::converted(&t)).unwrap();
        let stdout = format!("noise\n{json}\n\n");
        let parsed = parse_worker_output(stdout.as_bytes()).unwrap();
        assert!(parsed.success);
        assert!(parse_worker_output(b"not json").is_none());
    }
}
