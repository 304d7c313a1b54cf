//! CLI binary for edgequake-docnorm.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, wires up collaborators and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_docnorm::{
    CloudVisionRecognizer, Collaborators, ContentKind, CropEvidence, Heuristics, LlmModelClient,
    LocalDirStorage, NullRecognizer, OrientationStrategy, PageOutcome, Pipeline, PipelineConfig,
    PipelineProgressCallback, PipelineResult, ProgressCallback, Submission, TextRecognizer,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;
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

/// Per-page start times. Submissions of a batch run concurrently, so a
/// page is identified by its file name as well as its number.
#[derive(Default)]
struct PageTimers {
    started: Mutex<HashMap<(String, usize), Instant>>,
}

impl PageTimers {
    fn start(&self, file_name: &str, page_num: usize) {
        if let Ok(mut m) = self.started.lock() {
            m.insert((file_name.to_string(), page_num), Instant::now());
        }
    }

    /// Seconds since `start` for this page; 0 when it was never started.
    fn stop(&self, file_name: &str, page_num: usize) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&(file_name.to_string(), page_num)))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// One bar for the whole run. Each submission adds its page count to the
/// bar length when it starts, so batches with several inputs share it.
struct CliProgressCallback {
    bar: ProgressBar,
    timers: PageTimers,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Filing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            timers: PageTimers::default(),
            errors: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_submission_start(&self, file_name: &str, total_pages: usize) {
        self.bar.inc_length(total_pages as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{file_name}: {total_pages} page(s)"))
        ));
    }

    fn on_page_start(&self, file_name: &str, page_num: usize, _total: usize) {
        self.timers.start(file_name, page_num);
        self.bar.set_message(format!("{file_name} page {page_num}"));
    }

    fn on_page_complete(&self, file_name: &str, page_num: usize, total: usize, remote_path: &str) {
        let secs = self.timers.stop(file_name, page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            green("✓"),
            page_num,
            total,
            remote_path,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, file_name: &str, page_num: usize, total: usize, error: &str) {
        let secs = self.timers.stop(file_name, page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # File one photo for a client namespace into ./archive
  docnorm --namespace 972501234567 --out-dir archive IMG_0042.jpg

  # Several submissions at once, JSON result on stdout
  docnorm -n 972501234567 --json scan.pdf passport.jpg > result.json

  # Download from a URL, declare the content kind explicitly
  docnorm -n 555 --kind pdf https://example.com/files/upload?id=17

  # Text-angle orientation and text-block cropping only
  docnorm -n 555 --strategy text-angle --crop-evidence text-blocks photo.jpg

  # Tune thresholds from a JSON file (any subset of fields)
  echo '{"min_coverage": 0.2, "contrast": 15.0}' > heuristics.json
  docnorm -n 555 --heuristics heuristics.json photo.jpg

ARCHIVE LAYOUT:
  <out-dir>/<root>/<namespace>/<person>/<YYYY-MM-DD>_<doc_type>_page<N>.pdf
  <out-dir>/<root>/<namespace>/<person>/originals/<YYYY-MM-DD>_<file name>

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  GOOGLE_VISION_API_KEY   Cloud Vision key for text detection (orientation,
                          cropping and text-based classification)
  PDFIUM_LIB_PATH         Directory or file of the pdfium shared library

Without GOOGLE_VISION_API_KEY no text is detected: pages keep their
orientation, cropping relies on the sheet outline only, and every page is
classified from its image.
"#;

/// Orient, crop and classify document photos and scans into archival PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "docnorm",
    version,
    about = "Orient, crop and classify document photos and scans into archival PDFs",
    long_about = "Normalize client document submissions (photos, scans, multi-page PDFs): \
rotate each page upright, crop it to the document, classify its type and holder with an \
LLM, and file it as a single-page PDF under the holder's folder.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local files or HTTP/HTTPS URLs, one submission each.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Client namespace the artifacts are filed under (e.g. a phone number).
    #[arg(short, long, env = "DOCNORM_NAMESPACE")]
    namespace: String,

    /// Declared content kind; sniffed from the bytes when omitted.
    #[arg(long, env = "DOCNORM_KIND", value_enum)]
    kind: Option<KindArg>,

    /// Local directory acting as the archive.
    #[arg(short, long, env = "DOCNORM_OUT_DIR", default_value = "archive")]
    out_dir: PathBuf,

    /// Top-level archive folder.
    #[arg(long, env = "DOCNORM_REMOTE_ROOT", default_value = "Clients")]
    remote_root: String,

    /// Record `file://` links for stored files.
    #[arg(long, env = "DOCNORM_PUBLISH")]
    publish: bool,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Google Cloud Vision API key for text detection.
    #[arg(long, env = "GOOGLE_VISION_API_KEY", hide_env_values = true)]
    vision_api_key: Option<String>,

    /// Orientation strategy.
    #[arg(long, env = "DOCNORM_STRATEGY", value_enum, default_value = "ocr-vote")]
    strategy: StrategyArg,

    /// Evidence used to find the document region.
    #[arg(long, env = "DOCNORM_CROP_EVIDENCE", value_enum, default_value = "auto")]
    crop_evidence: CropArg,

    /// JSON file overriding heuristic thresholds.
    #[arg(long, env = "DOCNORM_HEURISTICS")]
    heuristics: Option<PathBuf>,

    /// Path to a text file with custom classification instructions.
    #[arg(long, env = "DOCNORM_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// PDF rendering DPI (72–400).
    #[arg(long, env = "DOCNORM_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Submissions processed at the same time.
    #[arg(short, long, env = "DOCNORM_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per model call (0–10).
    #[arg(long, env = "DOCNORM_MAX_RETRIES", default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(0..=10))]
    max_retries: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOCNORM_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output the `PipelineResult`s as JSON instead of a summary.
    #[arg(long, env = "DOCNORM_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCNORM_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCNORM_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCNORM_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Image,
    Pdf,
}

impl From<KindArg> for ContentKind {
    fn from(v: KindArg) -> Self {
        match v {
            KindArg::Image => ContentKind::Image,
            KindArg::Pdf => ContentKind::Pdf,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    OcrVote,
    TextAngle,
}

impl From<StrategyArg> for OrientationStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::OcrVote => OrientationStrategy::OcrVote,
            StrategyArg::TextAngle => OrientationStrategy::TextAngle,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CropArg {
    Auto,
    Contour,
    TextBlocks,
}

impl From<CropArg> for CropEvidence {
    fn from(v: CropArg) -> Self {
        match v {
            CropArg::Auto => CropEvidence::Auto,
            CropArg::Contour => CropEvidence::Contour,
            CropArg::TextBlocks => CropEvidence::TextBlocks,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v was given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build config and collaborators ───────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(
        &cli,
        progress
            .clone()
            .map(|cb| cb as Arc<dyn PipelineProgressCallback>),
    )
    .await?;

    let recognizer: Arc<dyn TextRecognizer> = match cli.vision_api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => Arc::new(
            CloudVisionRecognizer::new(key.trim()).context("Failed to set up Cloud Vision client")?,
        ),
        _ => {
            warn!("No GOOGLE_VISION_API_KEY set; text detection disabled");
            Arc::new(NullRecognizer)
        }
    };
    let model = LlmModelClient::from_config(&config).context("Failed to set up LLM provider")?;
    let storage = LocalDirStorage::new(cli.out_dir.clone());

    let pipeline = Pipeline::new(
        config,
        Collaborators::new(recognizer, Arc::new(model), Arc::new(storage)),
    );

    // ── Run ──────────────────────────────────────────────────────────────
    let submissions: Vec<Submission> = cli
        .inputs
        .iter()
        .map(|input| {
            let submission = Submission::from_arg(input, cli.namespace.as_str());
            match cli.kind {
                Some(kind) => submission.with_kind(kind.into()),
                None => submission,
            }
        })
        .collect();

    let results = pipeline.process_batch(&submissions).await;
    if let Some(ref cb) = progress {
        cb.finish();
    }

    let mut failures = 0usize;
    let mut finished: Vec<&PipelineResult> = Vec::new();
    for (input, result) in cli.inputs.iter().zip(&results) {
        match result {
            Ok(r) => finished.push(r),
            Err(e) => {
                failures += 1;
                eprintln!("{} {}: {}", red("✘"), bold(input), e);
            }
        }
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&finished).context("Failed to serialise results")?;
        println!("{json}");
    } else if !cli.quiet {
        for r in &finished {
            print_summary(r);
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} submission(s) failed", submissions.len());
    }
    Ok(())
}

fn print_summary(result: &PipelineResult) {
    let failed = result.failed_pages();
    println!(
        "{} {}  {}/{} pages  {}ms",
        if failed == 0 { green("✔") } else { cyan("⚠") },
        bold(&result.file_name),
        result.processed_pages(),
        result.total_pages(),
        result.duration_ms
    );
    for page in &result.pages {
        match page {
            PageOutcome::Success(s) => {
                let note = if s.degradations.is_empty() {
                    String::new()
                } else {
                    dim(&format!("  ({} fallback(s))", s.degradations.len()))
                };
                println!(
                    "  {:>3}  {:<22} {:<20} {:>4}  {}{}",
                    s.page, s.doc_type, s.person, s.rotation, s.remote_path, note
                );
            }
            PageOutcome::Error { page, message, .. } => {
                println!("  {:>3}  {}", page, red(message));
            }
        }
    }
    if let Some(ref original) = result.original {
        if original.uploaded {
            println!("  orig {}", dim(&original.remote_path));
        } else {
            println!(
                "  orig {}",
                red(original.error.as_deref().unwrap_or("upload failed"))
            );
        }
    }
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let system_prompt = match cli.system_prompt {
        Some(ref path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        ),
        None => None,
    };

    let heuristics = match cli.heuristics {
        Some(ref path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read heuristics from {:?}", path))?;
            serde_json::from_str::<Heuristics>(&raw)
                .with_context(|| format!("Invalid heuristics JSON in {:?}", path))?
        }
        None => Heuristics::default(),
    };

    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .orientation_strategy(cli.strategy.into())
        .crop_evidence(cli.crop_evidence.into())
        .heuristics(heuristics)
        .remote_root(cli.remote_root.clone())
        .publish_links(cli.publish)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .concurrency(cli.concurrency);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_keep_same_page_of_different_files_apart() {
        let timers = PageTimers::default();
        timers.start("a.pdf", 1);
        std::thread::sleep(Duration::from_millis(30));
        timers.start("b.pdf", 1);

        let a = timers.stop("a.pdf", 1);
        let b = timers.stop("b.pdf", 1);
        assert!(a >= 0.03, "a.pdf page 1 took {a}s");
        assert!(b < a);
    }

    #[test]
    fn stopping_an_unknown_page_is_zero() {
        let timers = PageTimers::default();
        timers.start("a.pdf", 1);
        assert_eq!(timers.stop("a.pdf", 2), 0.0);
        assert!(timers.stop("a.pdf", 1) >= 0.0);
        assert_eq!(timers.stop("a.pdf", 1), 0.0);
    }
}
