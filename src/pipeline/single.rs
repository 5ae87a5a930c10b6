//! Single-item converter: one source file to one destination.
//!
//! ## Routes
//!
//! ```text
//! PDF + OCR ──▶ ocrmypdf ──▶ pdftotext ──▶ pandoc (or copy, for plain text)
//! PDF       ──▶ pdf2docx ──▶ pandoc       (or move, for a docx target)
//! other     ──▶ pandoc
//! ```
//!
//! Intermediate files live in a per-task [`TempDir`], so they are private to
//! the task and removed on every exit path, including failure and timeout
//! (the future is dropped and the directory with it).
//!
//! [`convert_one`] never returns an error: every failure is folded into a
//! failed [`ConversionOutcome`].

use super::{ocr, tools};
use crate::error::TaskError;
use crate::formats;
use crate::output::{ConversionOutcome, ConversionTask};
use crate::pipeline::tools::ToolPaths;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Convert one task and report the outcome.
pub async fn convert_one(task: &ConversionTask, tools: &ToolPaths) -> ConversionOutcome {
    let result = if task.uses_ocr() {
        convert_with_ocr(task, tools).await
    } else if task.is_pdf() {
        convert_pdf(task, tools).await
    } else {
        if task.ocr.is_enabled() {
            debug!("OCR ignored for non-PDF source {}", task.source.display());
        }
        tools::pandoc(tools, &task.source, &task.destination).await
    };

    match result {
        Ok(()) => {
            debug!(
                "Converted {} → {}",
                task.source.display(),
                task.destination.display()
            );
            ConversionOutcome::converted(task)
        }
        Err(e) => {
            warn!("Failed to convert {}: {}", task.source.display(), e);
            ConversionOutcome::failed(task, &e)
        }
    }
}

// ── Routes ───────────────────────────────────────────────────────────────

async fn convert_pdf(task: &ConversionTask, tools: &ToolPaths) -> Result<(), TaskError> {
    let scratch = scratch_dir()?;
    let intermediate = scratch
        .path()
        .join(format!("{}.{}", stem(&task.source), formats::INTERMEDIATE_FORMAT));

    tools::pdf_to_docx(tools, &task.source, &intermediate).await?;

    if task.format == formats::INTERMEDIATE_FORMAT {
        move_into_place(&intermediate, &task.destination).await
    } else {
        tools::pandoc(tools, &intermediate, &task.destination).await
    }
}

async fn convert_with_ocr(task: &ConversionTask, tools: &ToolPaths) -> Result<(), TaskError> {
    let scratch = scratch_dir()?;
    let searchable = scratch.path().join("ocr.pdf");
    let text = scratch.path().join("text.txt");

    if ocr::ocr_pdf(tools, task.ocr, &task.source, &searchable).await?
        == ocr::OcrResult::AlreadyHadText
    {
        debug!(
            "Trusting existing text layer of {} without verification",
            task.source.display()
        );
    }
    ocr::extract_text(tools, &searchable, &text).await?;

    if task.format == "plain" {
        move_into_place(&text, &task.destination).await
    } else {
        tools::pandoc(tools, &text, &task.destination).await
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn scratch_dir() -> Result<TempDir, TaskError> {
    tempfile::Builder::new()
        .prefix("docbatch-")
        .tempdir()
        .map_err(|e| TaskError::io("create scratch directory", e))
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

/// Rename when possible, copy across file systems otherwise.
async fn move_into_place(from: &Path, to: &Path) -> Result<(), TaskError> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .map(|_| ())
        .map_err(|e| TaskError::io(format!("write {}", to.display()), e))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::OcrMode;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn fake_tools(dir: &Path) -> ToolPaths {
        ToolPaths {
            pandoc: script(dir, "pandoc", r#"{ echo "pandoc:$1"; cat "$1"; } > "$3""#),
            pdf2docx: script(dir, "pdf2docx", r#"cp "$2" "$3""#),
            ocrmypdf: script(dir, "ocrmypdf", "exit 6"),
            pdftotext: script(dir, "pdftotext", r#"cp "$2" "$3""#),
        }
    }

    fn task(src: PathBuf, dst: PathBuf, format: &str, ocr: OcrMode) -> ConversionTask {
        ConversionTask {
            source: src,
            destination: dst,
            format: format.into(),
            overwrite: true,
            ocr,
        }
    }

    #[tokio::test]
    async fn pdf_goes_through_intermediate_docx() {
        let dir = tempfile::tempdir().unwrap();
        let tools = fake_tools(dir.path());
        let src = dir.path().join("report.pdf");
        std::fs::write(&src, "body").unwrap();
        let dst = dir.path().join("report.md");

        let outcome = convert_one(&task(src, dst.clone(), "markdown", OcrMode::Off), &tools).await;
        assert!(outcome.success, "{:?}", outcome.error);
        let written = std::fs::read_to_string(&dst).unwrap();
        assert!(written.contains("report.docx"), "pandoc should read the intermediate: {written}");
    }

    #[tokio::test]
    async fn docx_target_moves_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        let tools = fake_tools(dir.path());
        let src = dir.path().join("report.pdf");
        std::fs::write(&src, "body").unwrap();
        let dst = dir.path().join("report.docx");

        let outcome = convert_one(&task(src, dst.clone(), "docx", OcrMode::Off), &tools).await;
        assert!(outcome.success);
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "body");
    }

    #[tokio::test]
    async fn ocr_plain_target_skips_pandoc() {
        let dir = tempfile::tempdir().unwrap();
        let tools = fake_tools(dir.path());
        let src = dir.path().join("scan.pdf");
        std::fs::write(&src, "scanned words").unwrap();
        let dst = dir.path().join("scan.txt");

        let outcome = convert_one(&task(src, dst.clone(), "plain", OcrMode::SkipText), &tools).await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "scanned words");
    }

    /// Collects formatted log lines for assertions.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;
        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn existing_text_layer_is_logged_as_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let tools = fake_tools(dir.path());
        let src = dir.path().join("digital.pdf");
        std::fs::write(&src, "born digital").unwrap();
        let dst = dir.path().join("digital.txt");

        let logs = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let outcome = convert_one(&task(src, dst.clone(), "plain", OcrMode::SkipText), &tools).await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "born digital");

        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(
            text.contains("Trusting existing text layer of"),
            "missing trust notice in logs: {text}"
        );
    }

    #[tokio::test]
    async fn tool_failure_becomes_failed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let mut tools = fake_tools(dir.path());
        tools.pandoc = script(dir.path(), "pandoc-bad", "echo 'Unknown reader' >&2; exit 64");
        let src = dir.path().join("notes.rst");
        std::fs::write(&src, "x").unwrap();

        let outcome = convert_one(
            &task(src, dir.path().join("notes.md"), "markdown", OcrMode::Off),
            &tools,
        )
        .await;
        assert!(!outcome.success);
        assert!(outcome.destination.is_none());
        assert_eq!(outcome.error.as_deref(), Some("pandoc failed: Unknown reader"));
    }

    #[tokio::test]
    async fn missing_tool_becomes_failed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolPaths {
            pandoc: PathBuf::from("/no/such/pandoc"),
            ..ToolPaths::default()
        };
        let src = dir.path().join("a.html");
        std::fs::write(&src, "<p>x</p>").unwrap();

        let outcome =
            convert_one(&task(src, dir.path().join("a.md"), "markdown", OcrMode::Off), &tools).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("could not launch pandoc"));
    }
}
