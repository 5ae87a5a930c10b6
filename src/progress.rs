//! Progress-callback trait for per-file batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive
//! events as the executor works through the batch.
//!
//! Callers can forward events to a channel, a terminal progress bar or a log
//! without the library knowing how the host application communicates. The
//! trait is `Send + Sync` because files are converted concurrently.
//!
//! # Example
//!
//! ```rust
//! use docbatch::{BatchConfig, BatchProgressCallback, ConversionOutcome};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_task_complete(&self, outcome: &ConversionOutcome) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{n}: {}", outcome.source.display());
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{BatchReport, ConversionOutcome, Strategy};
use std::path::Path;
use std::sync::Arc;

/// Called by the executor as it processes each file.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// With more than one worker, `on_task_start` and `on_task_complete` are
/// called concurrently and in completion order, not source order.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any file is converted.
    ///
    /// # Arguments
    /// * `total`: number of tasks in the batch (skips included)
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called just before a file is handed to a converter.
    fn on_task_start(&self, source: &Path) {
        let _ = source;
    }

    /// Called once per task, whether it converted, was skipped or failed.
    fn on_task_complete(&self, outcome: &ConversionOutcome) {
        let _ = outcome;
    }

    /// Called when a backend could not be built and the phase is restarted
    /// with the next strategy.
    fn on_fallback(&self, from: Strategy, to: Strategy, reason: &str) {
        let _ = (from, to, reason);
    }

    /// Called once with the final report.
    fn on_batch_complete(&self, report: &BatchReport) {
        let _ = report;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcrMode;
    use crate::output::ConversionTask;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        started_total: AtomicUsize,
        starts: AtomicUsize,
        completes: AtomicUsize,
        skips: AtomicUsize,
        fallbacks: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_batch_start(&self, total: usize) {
            self.started_total.store(total, Ordering::SeqCst);
        }

        fn on_task_start(&self, _source: &Path) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_task_complete(&self, outcome: &ConversionOutcome) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            if outcome.skipped {
                self.skips.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_fallback(&self, _from: Strategy, _to: Strategy, _reason: &str) {
            self.fallbacks.fetch_add(1, Ordering::SeqCst);
        }
    }

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
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_task_start(Path::new("/a.pdf"));
        cb.on_task_complete(&ConversionOutcome::converted(&task("/a.pdf")));
        cb.on_fallback(Strategy::Processes, Strategy::Threads, "no helper");
        cb.on_batch_complete(&BatchReport::empty("markdown", 1));
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_batch_start(3);
        assert_eq!(tracker.started_total.load(Ordering::SeqCst), 3);

        tracker.on_task_start(Path::new("/a.pdf"));
        tracker.on_task_complete(&ConversionOutcome::converted(&task("/a.pdf")));
        tracker.on_task_start(Path::new("/b.pdf"));
        tracker.on_task_complete(&ConversionOutcome::skipped(&task("/b.pdf")));
        tracker.on_fallback(Strategy::Processes, Strategy::Threads, "probe failed");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.skips.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.fallbacks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(10);
        cb.on_task_start(Path::new("/x.docx"));
    }
}
