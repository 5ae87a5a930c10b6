//! OCR stage: add a text layer to a PDF, then extract its text.
//!
//! `ocrmypdf` detects pages that already carry text. With `--skip-text` it
//! leaves them alone; when *every* page has text it exits with
//! [`OCR_ALREADY_HAS_TEXT`] without writing an output file, and the source
//! is copied through as-is.
//!
//! The existing text layer is trusted: if what `pdftotext` extracts from it
//! is not valid UTF-8, a warning is logged and the bytes are handed to the
//! format converter unchanged.

use super::tools::{self, ToolPaths};
use crate::config::OcrMode;
use crate::error::TaskError;
use std::ffi::OsStr;
use std::path::Path;
use tracing::{debug, warn};

/// `ocrmypdf` exit status meaning "input already has text, nothing done".
pub const OCR_ALREADY_HAS_TEXT: i32 = 6;

/// Whether the OCR tool actually ran or the source was copied through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrResult {
    Applied,
    AlreadyHadText,
}

/// Run OCR on `input`, writing a searchable PDF to `output`.
pub(crate) async fn ocr_pdf(
    tools: &ToolPaths,
    mode: OcrMode,
    input: &Path,
    output: &Path,
) -> Result<OcrResult, TaskError> {
    let flag = match mode {
        OcrMode::Force => "--force-ocr",
        OcrMode::SkipText | OcrMode::Off => "--skip-text",
    };

    let out = tools::run_tool(
        "ocrmypdf",
        &tools.ocrmypdf,
        [OsStr::new(flag), input.as_os_str(), output.as_os_str()],
    )
    .await?;

    match out.status.code() {
        Some(0) => {
            debug!("OCR applied to {}", input.display());
            Ok(OcrResult::Applied)
        }
        Some(OCR_ALREADY_HAS_TEXT) => {
            debug!("{} already has text, copying through", input.display());
            tokio::fs::copy(input, output)
                .await
                .map_err(|e| TaskError::io(format!("copy {}", input.display()), e))?;
            Ok(OcrResult::AlreadyHadText)
        }
        _ => Err(tools::failure("ocrmypdf", &out)),
    }
}

/// `pdftotext -layout <input> <output>`.
pub(crate) async fn extract_text(
    tools: &ToolPaths,
    input: &Path,
    output: &Path,
) -> Result<(), TaskError> {
    tools::run_checked(
        "pdftotext",
        &tools.pdftotext,
        [OsStr::new("-layout"), input.as_os_str(), output.as_os_str()],
    )
    .await?;

    let bytes = tokio::fs::read(output)
        .await
        .map_err(|e| TaskError::io("read extracted text", e))?;
    if std::str::from_utf8(&bytes).is_err() {
        warn!(
            "Text extracted from {} is not valid UTF-8; passing it through unchanged",
            input.display()
        );
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn tools_with_ocr(ocr: PathBuf) -> ToolPaths {
        ToolPaths {
            ocrmypdf: ocr,
            ..ToolPaths::default()
        }
    }

    #[tokio::test]
    async fn exit_six_copies_source_through() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = script(dir.path(), "ocr", "exit 6");
        let src = dir.path().join("in.pdf");
        let dst = dir.path().join("out.pdf");
        std::fs::write(&src, b"%PDF-1.7 text").unwrap();

        let res = ocr_pdf(&tools_with_ocr(ocr), OcrMode::SkipText, &src, &dst)
            .await
            .unwrap();
        assert_eq!(res, OcrResult::AlreadyHadText);
        assert_eq!(std::fs::read(&dst).unwrap(), b"%PDF-1.7 text");
    }

    #[tokio::test]
    async fn exit_zero_means_applied() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = script(dir.path(), "ocr", r#"test "$1" = "--force-ocr" || exit 9; cp "$2" "$3""#);
        let src = dir.path().join("in.pdf");
        let dst = dir.path().join("out.pdf");
        std::fs::write(&src, b"%PDF").unwrap();

        let res = ocr_pdf(&tools_with_ocr(ocr), OcrMode::Force, &src, &dst)
            .await
            .unwrap();
        assert_eq!(res, OcrResult::Applied);
        assert!(dst.exists());
    }

    #[tokio::test]
    async fn other_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = script(dir.path(), "ocr", "echo 'bad pdf' >&2; exit 2");
        let src = dir.path().join("in.pdf");
        std::fs::write(&src, b"%PDF").unwrap();

        let err = ocr_pdf(&tools_with_ocr(ocr), OcrMode::SkipText, &src, &dir.path().join("o.pdf"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ocrmypdf failed: bad pdf");
    }

    #[tokio::test]
    async fn non_utf8_text_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let extract = script(dir.path(), "pdftotext", r#"printf '\377\376abc' > "$3""#);
        let tools = ToolPaths {
            pdftotext: extract,
            ..ToolPaths::default()
        };
        let src = dir.path().join("in.pdf");
        let txt = dir.path().join("out.txt");
        std::fs::write(&src, b"%PDF").unwrap();

        extract_text(&tools, &src, &txt).await.unwrap();
        assert_eq!(std::fs::read(&txt).unwrap(), b"\xff\xfeabc");
    }
}
