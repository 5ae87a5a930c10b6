//! Helper executable for the process-isolated backend.
//!
//! Converts exactly one file and prints its outcome as a single JSON line on
//! stdout. Logs go to stderr. Tool locations come from the `DOCBATCH_*`
//! environment variables the parent sets.
//!
//! The exit status is 0 whenever an outcome was printed, including a failed
//! conversion; the parent reads the outcome, not the status.

use anyhow::{Context, Result};
use clap::Parser;
use docbatch::pipeline::single;
use docbatch::pipeline::tools::ToolPaths;
use docbatch::{ConversionTask, OcrMode};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Convert one document (internal helper for `docbatch`).
#[derive(Parser, Debug)]
#[command(name = "docbatch-worker", version)]
struct Args {
    /// Source document.
    #[arg(required_unless_present = "probe")]
    source: Option<PathBuf>,

    /// Destination file.
    #[arg(required_unless_present = "probe")]
    destination: Option<PathBuf>,

    /// Canonical target format id.
    #[arg(required_unless_present = "probe")]
    format: Option<String>,

    /// OCR mode for PDF sources: off, skip-text, force.
    #[arg(long, default_value = "off")]
    ocr: OcrMode,

    /// Print "ok" and exit; used by the parent to check the helper starts.
    #[arg(long)]
    probe: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    if args.probe {
        println!("ok");
        return Ok(());
    }

    let (Some(source), Some(destination), Some(format)) =
        (args.source, args.destination, args.format)
    else {
        anyhow::bail!("source, destination and format are required");
    };

    let task = ConversionTask {
        source,
        destination,
        format,
        // The parent has already applied the skip check.
        overwrite: true,
        ocr: args.ocr,
    };

    let outcome = single::convert_one(&task, &ToolPaths::from_env()).await;
    let line = serde_json::to_string(&outcome).context("Failed to serialise outcome")?;
    println!("{line}");
    Ok(())
}
