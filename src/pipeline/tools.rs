//! External tool contracts: locating the converters and running them.
//!
//! Four command-line tools do the actual document work:
//!
//! | Tool        | Invocation                                   | Used for                    |
//! |-------------|----------------------------------------------|-----------------------------|
//! | `pandoc`    | `pandoc <in> -o <out>`                       | every format conversion     |
//! | `pdf2docx`  | `pdf2docx convert <in.pdf> <out.docx>`       | PDF → intermediate docx     |
//! | `ocrmypdf`  | `ocrmypdf --skip-text\|--force-ocr <in> <out>` | OCR stage (see [`super::ocr`]) |
//! | `pdftotext` | `pdftotext -layout <in.pdf> <out.txt>`       | text extraction after OCR   |
//!
//! Every tool runs with stdin closed and stdout/stderr captured. A non-zero
//! exit becomes [`TaskError::ToolFailed`] carrying the tool's stderr, so the
//! batch report shows the converter's own diagnostic.

use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

/// File name (without platform suffix) of the helper executable used by the
/// process-isolated backend.
pub const WORKER_BIN_NAME: &str = "docbatch-worker";

/// Environment variables read by [`ToolPaths::from_env`] and forwarded to
/// helper processes.
pub const PANDOC_ENV: &str = "DOCBATCH_PANDOC";
pub const PDF2DOCX_ENV: &str = "DOCBATCH_PDF2DOCX";
pub const OCRMYPDF_ENV: &str = "DOCBATCH_OCRMYPDF";
pub const PDFTOTEXT_ENV: &str = "DOCBATCH_PDFTOTEXT";

/// Where to find each external tool.
///
/// Defaults are bare command names resolved through `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    pub pandoc: PathBuf,
    pub pdf2docx: PathBuf,
    pub ocrmypdf: PathBuf,
    pub pdftotext: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            pandoc: PathBuf::from("pandoc"),
            pdf2docx: PathBuf::from("pdf2docx"),
            ocrmypdf: PathBuf::from("ocrmypdf"),
            pdftotext: PathBuf::from("pdftotext"),
        }
    }
}

impl ToolPaths {
    /// Defaults, overridden by any `DOCBATCH_*` variable that is set and
    /// non-empty.
    pub fn from_env() -> Self {
        let mut paths = Self::default();
        let read = |var: &str| std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from);
        if let Some(p) = read(PANDOC_ENV) {
            paths.pandoc = p;
        }
        if let Some(p) = read(PDF2DOCX_ENV) {
            paths.pdf2docx = p;
        }
        if let Some(p) = read(OCRMYPDF_ENV) {
            paths.ocrmypdf = p;
        }
        if let Some(p) = read(PDFTOTEXT_ENV) {
            paths.pdftotext = p;
        }
        paths
    }

    /// Pass these paths to a child process so it resolves the same tools.
    pub fn export_env(&self, cmd: &mut Command) {
        cmd.env(PANDOC_ENV, &self.pandoc)
            .env(PDF2DOCX_ENV, &self.pdf2docx)
            .env(OCRMYPDF_ENV, &self.ocrmypdf)
            .env(PDFTOTEXT_ENV, &self.pdftotext);
    }
}

/// Which optional collaborators are present on this machine.
///
/// Detected once per batch (or supplied by the caller) and handed to the
/// executor, instead of being probed ad hoc while tasks run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub pandoc: bool,
    pub pdf2docx: bool,
    pub ocrmypdf: bool,
    pub pdftotext: bool,
    /// Resolved helper executable, when one was found.
    pub worker: Option<PathBuf>,
}

impl Capabilities {
    /// Probe `PATH` (or the explicit tool paths) for every collaborator.
    pub fn detect(tools: &ToolPaths, worker_override: Option<&Path>) -> Self {
        let found = |p: &Path| which::which(p).is_ok();
        let caps = Self {
            pandoc: found(&tools.pandoc),
            pdf2docx: found(&tools.pdf2docx),
            ocrmypdf: found(&tools.ocrmypdf),
            pdftotext: found(&tools.pdftotext),
            worker: locate_worker(worker_override),
        };
        debug!("Detected capabilities: {:?}", caps);
        caps
    }

    /// Names of the tools that were not found.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("pandoc", self.pandoc),
            ("pdf2docx", self.pdf2docx),
            ("ocrmypdf", self.ocrmypdf),
            ("pdftotext", self.pdftotext),
        ]
        .into_iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name)
        .collect()
    }
}

/// Find the helper executable.
///
/// An explicit path is authoritative: if it does not exist the helper is
/// unavailable. Otherwise look next to the running executable, then one
/// directory up (test binaries live in `target/<profile>/deps`).
pub fn locate_worker(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.is_file().then(|| path.to_path_buf());
    }

    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    let name = format!("{WORKER_BIN_NAME}{}", std::env::consts::EXE_SUFFIX);

    let found = [Some(dir), dir.parent()]
        .into_iter()
        .flatten()
        .map(|d| d.join(&name))
        .find(|candidate| candidate.is_file());
    found
}

// ── Running tools ────────────────────────────────────────────────────────

/// Run a tool to completion and return its raw output.
///
/// Only a launch failure is an error here; interpreting the exit status is
/// left to the caller (OCR treats one non-zero code as success).
pub(crate) async fn run_tool<I, S>(tool: &str, program: &Path, args: I) -> Result<Output, TaskError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {}: {:?}", tool, cmd.as_std());

    cmd.output().await.map_err(|e| TaskError::ToolLaunch {
        tool: tool.to_string(),
        detail: e.to_string(),
    })
}

/// Run a tool and require a zero exit status.
pub(crate) async fn run_checked<I, S>(tool: &str, program: &Path, args: I) -> Result<(), TaskError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_tool(tool, program, args).await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(failure(tool, &output))
    }
}

/// Build the error for a tool that exited unsuccessfully: its stderr when it
/// wrote any, otherwise the exit status.
pub(crate) fn failure(tool: &str, output: &Output) -> TaskError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let detail = if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr.to_string()
    };
    TaskError::ToolFailed {
        tool: tool.to_string(),
        detail,
    }
}

/// `pandoc <input> -o <output>`; the output format is inferred by pandoc from
/// the output extension.
pub(crate) async fn pandoc(tools: &ToolPaths, input: &Path, output: &Path) -> Result<(), TaskError> {
    run_checked(
        "pandoc",
        &tools.pandoc,
        [input.as_os_str(), OsStr::new("-o"), output.as_os_str()],
    )
    .await
}

/// `pdf2docx convert <input.pdf> <output.docx>`.
pub(crate) async fn pdf_to_docx(
    tools: &ToolPaths,
    input: &Path,
    output: &Path,
) -> Result<(), TaskError> {
    run_checked(
        "pdf2docx",
        &tools.pdf2docx,
        [OsStr::new("convert"), input.as_os_str(), output.as_os_str()],
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bare_names() {
        let t = ToolPaths::default();
        assert_eq!(t.pandoc, PathBuf::from("pandoc"));
        assert_eq!(t.pdftotext, PathBuf::from("pdftotext"));
    }

    #[test]
    fn missing_lists_absent_tools() {
        let caps = Capabilities {
            pandoc: true,
            pdf2docx: false,
            ocrmypdf: false,
            pdftotext: true,
            worker: None,
        };
        assert_eq!(caps.missing(), vec!["pdf2docx", "ocrmypdf"]);
    }

    #[test]
    fn explicit_missing_worker_is_unavailable() {
        assert!(locate_worker(Some(Path::new("/definitely/not/here/docbatch-worker"))).is_none());
    }

    #[test]
    fn explicit_existing_worker_is_used() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(locate_worker(Some(file.path())), Some(file.path().to_path_buf()));
    }

    #[test]
    fn implicit_lookup_only_returns_the_helper() {
        if let Some(found) = locate_worker(None) {
            assert!(found.is_file());
            assert_eq!(
                found.file_stem().and_then(|s| s.to_str()),
                Some(WORKER_BIN_NAME)
            );
        }
    }

    #[test]
    fn detect_reports_missing_tool_paths() {
        let tools = ToolPaths {
            pandoc: PathBuf::from("/no/such/pandoc"),
            pdf2docx: PathBuf::from("/no/such/pdf2docx"),
            ocrmypdf: PathBuf::from("/no/such/ocrmypdf"),
            pdftotext: PathBuf::from("/no/such/pdftotext"),
        };
        let caps = Capabilities::detect(&tools, Some(Path::new("/no/such/worker")));
        assert_eq!(caps.missing().len(), 4);
        assert!(caps.worker.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_carries_stderr() {
        let err = run_checked("sh", Path::new("sh"), ["-c", "echo 'bad input' >&2; exit 3"])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "sh failed: bad input");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_without_stderr_reports_status() {
        let err = run_checked("sh", Path::new("sh"), ["-c", "exit 4"]).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("sh failed: exited with"), "got: {msg}");
    }

    #[tokio::test]
    async fn launch_failure_is_distinguished() {
        let err = run_tool("pandoc", Path::new("/no/such/binary"), ["--version"])
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::ToolLaunch { .. }));
    }
}
