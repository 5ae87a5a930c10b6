//! CLI binary for docbatch.
//!
//! A thin shim over the library crate that maps CLI flags to `BatchConfig`
//! and prints reports.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docbatch::metadata::{self, ExtractionMode, MetadataRequest};
use docbatch::pipeline::tools::{Capabilities, ToolPaths};
use docbatch::{
    convert_batch, formats, list_convertible, BatchConfig, BatchProgressCallback, BatchReport,
    ConversionOutcome, ExecutorPreference, OcrMode, ProgressCallback, Strategy, TimeoutPolicy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus one log line per
/// file. Files complete out of order when more than one worker runs.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-file wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<PathBuf, Instant>>,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_batch_start` tells us how many files there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            failures: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn elapsed(&self, source: &Path) -> String {
        let ms = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(source))
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.activate_bar(total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total} files…"))
        ));
    }

    fn on_task_start(&self, source: &Path) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(source.to_path_buf(), Instant::now());
        }
        self.bar.set_message(file_name(source));
    }

    fn on_task_complete(&self, outcome: &ConversionOutcome) {
        let elapsed = self.elapsed(&outcome.source);
        let name = file_name(&outcome.source);

        let line = if outcome.skipped {
            format!("  {} {}  {}", dim("↷"), name, dim("exists, skipped"))
        } else if outcome.success {
            format!("  {} {}  {}", green("✓"), name, elapsed)
        } else {
            self.failures.fetch_add(1, Ordering::SeqCst);
            let error = outcome.error.as_deref().unwrap_or("unknown error");
            format!("  {} {}  {}  {}", red("✗"), name, red(&truncate(error, 80)), elapsed)
        };
        self.bar.println(line);
        self.bar.inc(1);
    }

    fn on_fallback(&self, from: Strategy, to: Strategy, reason: &str) {
        self.bar.println(format!(
            "  {} {} backend unavailable ({}), using {}",
            cyan("⚠"),
            from,
            dim(reason),
            to
        ));
    }

    fn on_batch_complete(&self, report: &BatchReport) {
        self.bar.finish_and_clear();
        let failed = self.failures.load(Ordering::SeqCst);
        let mark = if failed == 0 {
            green("✔")
        } else if failed == report.total {
            red("✘")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{} {} converted, {} skipped, {} failed  {}",
            mark,
            bold(&report.converted.to_string()),
            report.skipped,
            if failed == 0 {
                "0".to_string()
            } else {
                red(&failed.to_string())
            },
            dim(&format!("{}ms", report.duration_ms)),
        );
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 1).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a folder of mixed documents to Markdown
  docbatch convert ./papers ./papers-md -f markdown

  # Recurse, 8 workers, keep files already converted
  docbatch convert ./archive ./out -f odt -r -j 8 --no-overwrite

  # Only PDFs, OCR scanned pages first
  docbatch convert ./scans ./text -f plain --filter pdf --ocr skip-text

  # What would be converted?
  docbatch list ./archive -r

  # Title, authors and abstract from a paper (needs a GROBID service)
  docbatch metadata paper.pdf --mode header --json

  # Check which external tools are installed
  docbatch check

EXTERNAL TOOLS:
  pandoc       every format conversion
  pdf2docx     PDF input (PDF → docx → target)
  ocrmypdf     --ocr skip-text | force
  pdftotext    --ocr skip-text | force

ENVIRONMENT VARIABLES:
  DOCBATCH_PANDOC      Path to pandoc
  DOCBATCH_PDF2DOCX    Path to pdf2docx
  DOCBATCH_OCRMYPDF    Path to ocrmypdf
  DOCBATCH_PDFTOTEXT   Path to pdftotext
  GROBID_URL           Metadata service endpoint (default http://localhost:8070)
  RUST_LOG             Override log filter
"#;

/// Convert batches of documents between formats.
#[derive(Parser, Debug)]
#[command(
    name = "docbatch",
    version,
    about = "Convert files and folders of documents to one target format",
    long_about = "Discover documents in a file or folder, convert all of them to one target \
format with pandoc (PDFs via pdf2docx, optionally OCR'd first), in parallel, preserving the \
directory structure.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCBATCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true, env = "DOCBATCH_QUIET")]
    quiet: bool,

    /// Output structured JSON instead of human-readable text.
    #[arg(long, global = true, env = "DOCBATCH_JSON")]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a file or directory.
    Convert(ConvertArgs),

    /// List convertible files, grouped by format.
    List {
        /// File or directory to inspect.
        path: PathBuf,

        /// Descend into subdirectories.
        #[arg(short, long)]
        recursive: bool,
    },

    /// List supported input and output formats.
    Formats,

    /// Extract bibliographic metadata and references from a PDF.
    Metadata(MetadataArgs),

    /// Report which external tools and services are available.
    Check {
        /// Metadata service endpoint to probe.
        #[arg(long, env = "GROBID_URL", default_value = metadata::DEFAULT_ENDPOINT)]
        endpoint: String,
    },
}

#[derive(clap::Args, Debug)]
struct ConvertArgs {
    /// Source file or directory.
    input: PathBuf,

    /// Destination directory (or file, for a single input file).
    output: PathBuf,

    /// Target format (markdown, html, odt, docx, latex, plain, …).
    #[arg(short, long, env = "DOCBATCH_FORMAT")]
    format: String,

    /// Only convert files with this extension.
    #[arg(long, env = "DOCBATCH_FILTER")]
    filter: Option<String>,

    /// Descend into subdirectories.
    #[arg(short, long, env = "DOCBATCH_RECURSIVE")]
    recursive: bool,

    /// Concurrent conversions (1–16).
    #[arg(short = 'j', long, env = "DOCBATCH_WORKERS", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..=16))]
    workers: u32,

    /// Keep existing output files instead of overwriting them.
    #[arg(long, env = "DOCBATCH_NO_OVERWRITE")]
    no_overwrite: bool,

    /// OCR for PDF input: off, skip-text, force.
    #[arg(long, env = "DOCBATCH_OCR", default_value = "off")]
    ocr: OcrMode,

    /// Never use helper processes; convert PDFs on the in-process pool.
    #[arg(long, env = "DOCBATCH_THREADS_ONLY")]
    threads_only: bool,

    /// Path to the docbatch-worker helper.
    #[arg(long, env = "DOCBATCH_WORKER")]
    worker_binary: Option<PathBuf>,

    /// Time limit per non-PDF file, in seconds.
    #[arg(long, env = "DOCBATCH_TIMEOUT_DOCUMENT", default_value_t = 300)]
    timeout_document: u64,

    /// Time limit per PDF file, in seconds.
    #[arg(long, env = "DOCBATCH_TIMEOUT_PDF", default_value_t = 600)]
    timeout_pdf: u64,

    /// Time limit per OCR'd PDF file, in seconds.
    #[arg(long, env = "DOCBATCH_TIMEOUT_OCR", default_value_t = 900)]
    timeout_ocr: u64,

    /// Disable progress bar.
    #[arg(long, env = "DOCBATCH_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::Args, Debug)]
struct MetadataArgs {
    /// PDF to analyse.
    input: PathBuf,

    /// What to extract: header, references, fulltext.
    #[arg(long, default_value = "header")]
    mode: ExtractionMode,

    /// Service endpoint.
    #[arg(long, env = "GROBID_URL")]
    endpoint: Option<String>,

    /// Do not consolidate the header against external databases.
    #[arg(long)]
    no_consolidate_header: bool,

    /// Consolidate each citation against external databases.
    #[arg(long)]
    consolidate_citations: bool,

    /// Add identifiers to the TEI elements.
    #[arg(long)]
    generate_ids: bool,

    /// Segment paragraphs into sentences.
    #[arg(long)]
    segment_sentences: bool,

    /// HTTP timeout in seconds.
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs while the progress bar is active.
    let show_progress = matches!(&cli.command, Command::Convert(a) if !a.no_progress)
        && !cli.quiet
        && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Convert(ref args) => run_convert(&cli, args, show_progress).await,
        Command::List {
            ref path,
            recursive,
        } => run_list(&cli, path, recursive),
        Command::Formats => run_formats(&cli),
        Command::Metadata(ref args) => run_metadata(&cli, args).await,
        Command::Check { ref endpoint } => run_check(&cli, endpoint).await,
    }
}

// ── Subcommands ──────────────────────────────────────────────────────────

async fn run_convert(cli: &Cli, args: &ConvertArgs, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let config = build_config(args, progress_cb)?;
    let report = convert_batch(&args.input, &args.output, &args.format, &config)
        .await
        .context("Batch conversion failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
        return Ok(());
    }

    if let Some(ref msg) = report.message {
        eprintln!("{}", dim(msg));
    }

    // The progress callback already printed per-file lines and a summary.
    if !cli.quiet && !show_progress {
        for o in &report.outcomes {
            match (o.success, o.skipped) {
                (true, true) => println!("skipped  {}", o.source.display()),
                (true, false) => println!(
                    "ok       {} → {}",
                    o.source.display(),
                    o.destination
                        .as_deref()
                        .map(|d| d.display().to_string())
                        .unwrap_or_default()
                ),
                (false, _) => println!(
                    "FAILED   {}: {}",
                    o.source.display(),
                    o.error.as_deref().unwrap_or("unknown error")
                ),
            }
        }
        eprintln!(
            "Converted {}/{} files ({} skipped, {} failed) in {}ms",
            report.converted, report.total, report.skipped, report.failed, report.duration_ms
        );
    }

    if !cli.quiet {
        let describe = |s: Option<Strategy>| s.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        eprintln!(
            "   {}",
            dim(&format!(
                "{} workers  ·  pdf: {}  ·  other: {}",
                report.worker_count,
                describe(report.pdf_strategy),
                describe(report.other_strategy)
            ))
        );
    }

    Ok(())
}

fn run_list(cli: &Cli, path: &Path, recursive: bool) -> Result<()> {
    let listing = list_convertible(path, recursive)
        .with_context(|| format!("Failed to list {}", path.display()))?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&listing).context("Failed to serialise listing")?
        );
        return Ok(());
    }

    for (ext, files) in &listing.by_format {
        println!("{} ({})", bold(ext), files.len());
        for f in files {
            println!("  {}", f.display());
        }
    }
    if !cli.quiet {
        eprintln!("{} convertible files", listing.count);
    }
    Ok(())
}

fn run_formats(cli: &Cli) -> Result<()> {
    let listing = formats();
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&listing).context("Failed to serialise formats")?
        );
    } else {
        println!("Input:   {}", listing.input_formats.join(", "));
        println!("Output:  {}", listing.output_formats.join(", "));
        println!("{}", dim(&listing.note));
    }
    Ok(())
}

async fn run_metadata(cli: &Cli, args: &MetadataArgs) -> Result<()> {
    let request = MetadataRequest {
        mode: args.mode,
        consolidate_header: !args.no_consolidate_header,
        consolidate_citations: args.consolidate_citations,
        generate_ids: args.generate_ids,
        segment_sentences: args.segment_sentences,
        endpoint: args.endpoint.clone(),
        timeout_secs: args.timeout,
    };

    let response = metadata::extract_metadata(&args.input, &request).await;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).context("Failed to serialise metadata")?
        );
        return Ok(());
    }

    if !response.success {
        anyhow::bail!(
            "{}",
            response.error.unwrap_or_else(|| "metadata extraction failed".into())
        );
    }

    if let Some(ref m) = response.metadata {
        println!("File:      {}", args.input.display());
        if let Some(ref t) = m.title {
            println!("Title:     {}", t);
        }
        for a in &m.authors {
            let mut line = a.name.clone();
            if let Some(ref aff) = a.affiliation {
                line.push_str(&format!(" ({aff})"));
            }
            if let Some(ref email) = a.email {
                line.push_str(&format!(" <{email}>"));
            }
            println!("Author:    {}", line);
        }
        if let Some(ref d) = m.date {
            println!("Date:      {}", d);
        }
        if let Some(ref doi) = m.doi {
            println!("DOI:       {}", doi);
        }
        if !m.keywords.is_empty() {
            println!("Keywords:  {}", m.keywords.join(", "));
        }
        if let Some(ref abs) = m.abstract_text {
            println!("\n{}", abs);
        }
    }

    if let Some(ref refs) = response.references {
        println!("\n{} ({})", bold("References"), refs.len());
        for (i, r) in refs.iter().enumerate() {
            let title = r.title.as_deref().unwrap_or("(untitled)");
            let year = r.year.as_deref().map(|y| format!(" ({y})")).unwrap_or_default();
            println!("{:>4}. {}{}", i + 1, title, year);
            if !r.authors.is_empty() {
                println!("      {}", dim(&r.authors.join(", ")));
            }
        }
    }
    Ok(())
}

async fn run_check(cli: &Cli, endpoint: &str) -> Result<()> {
    let tools = ToolPaths::from_env();
    let caps = Capabilities::detect(&tools, None);
    let service = metadata::service_alive(endpoint).await;

    if cli.json {
        let value = serde_json::json!({
            "tools": tools,
            "capabilities": caps,
            "metadata_service": { "endpoint": endpoint, "alive": service },
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).context("Failed to serialise check")?
        );
        return Ok(());
    }

    let mark = |ok: bool| if ok { green("✓") } else { red("✗") };
    println!("{} pandoc     {}", mark(caps.pandoc), dim(&tools.pandoc.display().to_string()));
    println!("{} pdf2docx   {}", mark(caps.pdf2docx), dim(&tools.pdf2docx.display().to_string()));
    println!("{} ocrmypdf   {}", mark(caps.ocrmypdf), dim(&tools.ocrmypdf.display().to_string()));
    println!("{} pdftotext  {}", mark(caps.pdftotext), dim(&tools.pdftotext.display().to_string()));
    println!(
        "{} helper     {}",
        mark(caps.worker.is_some()),
        dim(&caps
            .worker
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not found (PDFs will use the in-process pool)".into()))
    );
    println!("{} metadata   {}", mark(service), dim(endpoint));
    Ok(())
}

/// Map CLI args to `BatchConfig`.
fn build_config(args: &ConvertArgs, progress: Option<ProgressCallback>) -> Result<BatchConfig> {
    let mut builder = BatchConfig::builder()
        .workers(args.workers as usize)
        .overwrite(!args.no_overwrite)
        .recursive(args.recursive)
        .ocr(args.ocr)
        .executor(if args.threads_only {
            ExecutorPreference::Threads
        } else {
            ExecutorPreference::Auto
        })
        .timeouts(TimeoutPolicy {
            document: Duration::from_secs(args.timeout_document),
            pdf: Duration::from_secs(args.timeout_pdf),
            ocr: Duration::from_secs(args.timeout_ocr),
        })
        .tools(ToolPaths::from_env());

    if let Some(ref f) = args.filter {
        builder = builder.filter(f.clone());
    }
    if let Some(ref w) = args.worker_binary {
        builder = builder.worker_binary(w.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
