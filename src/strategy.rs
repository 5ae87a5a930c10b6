//! Execution strategy selection.
//!
//! A batch is split by cost class. PDFs go through a converter that is not
//! safe to run concurrently inside one process, so they get process
//! isolation when it is available. Everything else shells out to an
//! independent `pandoc` per file and runs fine on the in-process pool.
//!
//! Each [`Phase`] lists its strategies in preference order; the executor
//! tries them in turn and only moves on when a backend cannot be built.

use crate::config::{ExecutorPreference, MAX_WORKERS};
use crate::output::{ConversionTask, Strategy};

/// Cost class of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostClass {
    Pdf,
    Other,
}

/// One subset of the batch and how to run it.
#[derive(Debug, Clone)]
pub struct Phase {
    pub class: CostClass,
    pub tasks: Vec<ConversionTask>,
    /// Strategies to try, most preferred first. Never empty.
    pub strategies: Vec<Strategy>,
}

/// How a whole batch will run.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Clamped worker count.
    pub workers: usize,
    /// PDF phase first (when non-empty), then the rest.
    pub phases: Vec<Phase>,
}

/// Clamp a requested worker count to `1..=16`.
pub fn clamp_workers(requested: usize) -> usize {
    requested.clamp(1, MAX_WORKERS)
}

/// Partition `tasks` and pick strategies for each subset.
///
/// One worker or one task means no concurrency machinery at all: every
/// phase is sequential.
pub fn plan(
    tasks: Vec<ConversionTask>,
    requested_workers: usize,
    preference: ExecutorPreference,
) -> ExecutionPlan {
    let workers = clamp_workers(requested_workers);
    let sequential = workers <= 1 || tasks.len() <= 1;

    let (pdfs, others): (Vec<_>, Vec<_>) = tasks.into_iter().partition(ConversionTask::is_pdf);

    let pdf_strategies = if sequential {
        vec![Strategy::Sequential]
    } else {
        match preference {
            ExecutorPreference::Auto => vec![Strategy::Processes, Strategy::Threads],
            ExecutorPreference::Threads => vec![Strategy::Threads],
        }
    };
    let other_strategies = if sequential {
        vec![Strategy::Sequential]
    } else {
        vec![Strategy::Threads]
    };

    let phases = [
        (CostClass::Pdf, pdfs, pdf_strategies),
        (CostClass::Other, others, other_strategies),
    ]
    .into_iter()
    .filter(|(_, tasks, _)| !tasks.is_empty())
    .map(|(class, tasks, strategies)| Phase {
        class,
        tasks,
        strategies,
    })
    .collect();

    ExecutionPlan { workers, phases }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcrMode;
    use std::path::PathBuf;

    fn tasks(names: &[&str]) -> Vec<ConversionTask> {
        names
            .iter()
            .map(|n| ConversionTask {
                source: PathBuf::from(format!("/in/{n}")),
                destination: PathBuf::from(format!("/out/{n}.md")),
                format: "markdown".into(),
                overwrite: true,
                ocr: OcrMode::Off,
            })
            .collect()
    }

    #[test]
    fn clamps_workers() {
        assert_eq!(clamp_workers(0), 1);
        assert_eq!(clamp_workers(17), 16);
        assert_eq!(clamp_workers(100), 16);
        assert_eq!(clamp_workers(5), 5);
    }

    #[test]
    fn one_worker_is_sequential() {
        let p = plan(tasks(&["a.pdf", "b.docx"]), 1, ExecutorPreference::Auto);
        assert_eq!(p.phases.len(), 2);
        assert!(p.phases.iter().all(|ph| ph.strategies == vec![Strategy::Sequential]));
    }

    #[test]
    fn one_task_is_sequential() {
        let p = plan(tasks(&["a.pdf"]), 8, ExecutorPreference::Auto);
        assert_eq!(p.workers, 8);
        assert_eq!(p.phases.len(), 1);
        assert_eq!(p.phases[0].strategies, vec![Strategy::Sequential]);
    }

    #[test]
    fn pdfs_prefer_processes_then_threads() {
        let p = plan(tasks(&["a.pdf", "b.PDF", "c.docx"]), 4, ExecutorPreference::Auto);
        assert_eq!(p.phases[0].class, CostClass::Pdf);
        assert_eq!(p.phases[0].tasks.len(), 2);
        assert_eq!(p.phases[0].strategies, vec![Strategy::Processes, Strategy::Threads]);
        assert_eq!(p.phases[1].class, CostClass::Other);
        assert_eq!(p.phases[1].strategies, vec![Strategy::Threads]);
    }

    #[test]
    fn thread_preference_skips_processes() {
        let p = plan(tasks(&["a.pdf", "b.pdf"]), 4, ExecutorPreference::Threads);
        assert_eq!(p.phases.len(), 1);
        assert_eq!(p.phases[0].strategies, vec![Strategy::Threads]);
    }

    #[test]
    fn empty_subsets_are_omitted() {
        let p = plan(tasks(&["a.md", "b.html"]), 4, ExecutorPreference::Auto);
        assert_eq!(p.phases.len(), 1);
        assert_eq!(p.phases[0].class, CostClass::Other);
        assert!(plan(Vec::new(), 4, ExecutorPreference::Auto).phases.is_empty());
    }
}
