//! CLI binary for epubtrans.
//!
//! A thin shim over the library crate: one subcommand per pipeline stage,
//! flags mapped to `TranslateConfig`, progress rendered with indicatif.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use epubtrans::upgrade::{self, DEFAULT_REPO};
use epubtrans::{
    clean_book, default_stage_concurrency, mark_book, pack, prepare, style_book, translate_book,
    unpack, CancellationToken, HideMode, ProgressCallback, PromptPreset, RunProgressCallback,
    RunSummary, SizeMetric, TranslateConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
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

/// One bar per stage, one log line per file. Files can finish out of order
/// when a stage runs several workers.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<PathBuf, Instant>>,
    errors: AtomicUsize,
    book_root: PathBuf,
}

impl CliProgressCallback {
    fn new(book_root: &Path) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading package…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
            book_root: book_root.to_path_buf(),
        })
    }

    fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.book_root)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    fn elapsed(&self, path: &Path) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(path))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, stage: &str, total_files: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.errors.store(0, Ordering::SeqCst);
        self.bar.reset();
        self.bar.set_length(total_files as u64);
        self.bar.set_style(style);
        self.bar.set_prefix(stage.to_string());
        self.bar.set_message("");
        self.bar.enable_steady_tick(Duration::from_millis(80));
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{stage}: {total_files} files"))
        ));
    }

    fn on_file_start(&self, _index: usize, _total: usize, path: &Path) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(path.to_path_buf(), Instant::now());
        }
        self.bar.set_message(self.display_path(path));
    }

    fn on_batch_complete(&self, path: &Path, batch: usize, total_batches: usize) {
        self.bar.set_message(format!(
            "{}  batch {batch}/{total_batches}",
            self.display_path(path)
        ));
    }

    fn on_file_complete(&self, index: usize, total: usize, path: &Path, detail: &str) {
        let secs = self.elapsed(path);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<40}  {}  {}",
            green("✓"),
            index,
            total,
            self.display_path(path),
            dim(detail),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, index: usize, total: usize, path: &Path, error: &str) {
        let secs = self.elapsed(path);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            let mut s: String = error.chars().take(79).collect();
            s.push('\u{2026}');
            s
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<40}  {}  {}",
            red("✗"),
            index,
            total,
            self.display_path(path),
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_files: usize, succeeded: usize) {
        let failed = total_files.saturating_sub(succeeded);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} files done",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files done  ({} with errors)",
                if failed == total_files {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&succeeded.to_string()),
                total_files,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One-shot preparation: unpack, clean, mark, inject styles
  epubtrans prepare book.epub

  # Translate the unpacked book into French with Anthropic
  epubtrans translate book --source English --target French

  # Use another provider and model
  epubtrans translate book --provider openai --model gpt-4.1-mini

  # Literary guidelines, smaller batches
  epubtrans translate book --preset literary --batch-size 1200

  # Show only the translation, then build the bilingual EPUB
  epubtrans styling book --hide source
  epubtrans pack book -o book-fr.epub

RESUMING:
  Every stage can be re-run. Marking skips marked elements and translate only
  picks up elements without a translation, so an interrupted run (Ctrl-C)
  continues where it stopped.

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY       Anthropic API key (default provider)
  OPENAI_API_KEY          OpenAI API key
  EDGEQUAKE_PROVIDER      Provider for --provider (anthropic, openai, gemini, ollama)
  EDGEQUAKE_MODEL         Model for --model
  EDGEQUAKE_LLM_PROVIDER  Provider auto-selection together with EDGEQUAKE_MODEL
  TRANSLATION_GUIDELINES  Custom guidelines (replaces the preset)
  SYSTEM_PROMPT           Full system prompt override
  RUST_LOG                Log filter (overrides --verbose/--quiet)

SIDE FILES:
  <book>/.epubtrans/usage.json   call counts, token totals, per-model usage
  <book>/.epubtrans/audit.log    one JSON line per provider call
  <book>/.epubtrans/dumps/       responses that lost segments
"#;

/// Translate EPUB books into bilingual editions with an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "epubtrans",
    version,
    about = "Translate EPUB books into bilingual editions with an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "EPUBTRANS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "EPUBTRANS_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "EPUBTRANS_NO_PROGRESS")]
    no_progress: bool,

    /// Worker count for clean, mark and styling (default: CPU count).
    #[arg(long, global = true, env = "EPUBTRANS_WORKERS")]
    workers: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract an .epub into a directory next to it.
    Unpack {
        epub: PathBuf,
        /// Destination directory (default: the file stem).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Remove empty anchors and divs from content documents.
    Clean { book: PathBuf },
    /// Add content-id fingerprints to translatable elements.
    Mark { book: PathBuf },
    /// Inject the bilingual stylesheet.
    Styling {
        book: PathBuf,
        /// Which language to hide.
        #[arg(long, value_enum, default_value = "none", env = "EPUBTRANS_HIDE")]
        hide: HideArg,
    },
    /// Translate every pending element.
    Translate(TranslateArgs),
    /// Zip a directory back into an .epub.
    Pack {
        book: PathBuf,
        /// Output file (default: <book>-bilingual.epub).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Unpack, clean, mark and style in one go.
    Prepare {
        epub: PathBuf,
        #[arg(long, value_enum, default_value = "none", env = "EPUBTRANS_HIDE")]
        hide: HideArg,
    },
    /// Install the latest release.
    Upgrade {
        /// GitHub repository (owner/name).
        #[arg(long, default_value = DEFAULT_REPO, env = "EPUBTRANS_REPO")]
        repo: String,
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(clap::Args, Debug)]
struct TranslateArgs {
    /// Unpacked, marked book directory.
    book: PathBuf,

    /// Source language.
    #[arg(long, env = "EPUBTRANS_SOURCE", default_value = "English")]
    source: String,

    /// Target language.
    #[arg(long, env = "EPUBTRANS_TARGET", default_value = "Vietnamese")]
    target: String,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: anthropic, openai, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: anthropic, openai, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Guidelines preset.
    #[arg(long, value_enum, env = "EPUBTRANS_PRESET", default_value = "general")]
    preset: PresetArg,

    /// Custom guidelines, replacing the preset.
    #[arg(long, env = "TRANSLATION_GUIDELINES")]
    guidelines: Option<String>,

    /// Full system prompt override.
    #[arg(long, env = "SYSTEM_PROMPT")]
    system_prompt: Option<String>,

    /// Batch ceiling, in estimated tokens (or characters with --size-metric chars).
    #[arg(long, env = "EPUBTRANS_BATCH_SIZE", default_value_t = 2000)]
    batch_size: usize,

    /// How batch sizes are measured.
    #[arg(long, value_enum, env = "EPUBTRANS_SIZE_METRIC", default_value = "tokens")]
    size_metric: MetricArg,

    /// Files translated at the same time.
    #[arg(short, long, env = "EPUBTRANS_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Max LLM output tokens per call.
    #[arg(long, env = "EPUBTRANS_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "EPUBTRANS_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// Requests per minute.
    #[arg(long, env = "EPUBTRANS_RATE", default_value_t = 50)]
    rate: u32,

    /// Attempts per batch.
    #[arg(long, env = "EPUBTRANS_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Do not write usage.json and audit.log.
    #[arg(long, env = "EPUBTRANS_NO_USAGE")]
    no_usage: bool,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum HideArg {
    None,
    Source,
    Target,
}

impl From<HideArg> for HideMode {
    fn from(v: HideArg) -> Self {
        match v {
            HideArg::None => HideMode::None,
            HideArg::Source => HideMode::Source,
            HideArg::Target => HideMode::Target,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PresetArg {
    General,
    Technical,
    Literary,
}

impl From<PresetArg> for PromptPreset {
    fn from(v: PresetArg) -> Self {
        match v {
            PresetArg::General => PromptPreset::General,
            PresetArg::Technical => PromptPreset::Technical,
            PresetArg::Literary => PromptPreset::Literary,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MetricArg {
    Tokens,
    Chars,
}

impl From<MetricArg> for SizeMetric {
    fn from(v: MetricArg) -> Self {
        match v {
            MetricArg::Tokens => SizeMetric::EstimatedTokens,
            MetricArg::Chars => SizeMetric::Chars,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let json = matches!(&cli.command, Command::Translate(a) if a.json);
    let show_progress = !cli.quiet && !cli.no_progress && !json && stage_has_progress(&cli.command);
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

    // ── Ctrl-C ───────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        let quiet = cli.quiet;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                if !quiet {
                    eprintln!(
                        "\n{} Interrupted, finishing in-flight work…",
                        cyan("⚠")
                    );
                }
                cancel.cancel();
            }
        });
    }

    let workers = cli.workers.unwrap_or_else(default_stage_concurrency).max(1);
    let progress_for = |root: &Path| -> Option<ProgressCallback> {
        show_progress.then(|| CliProgressCallback::new(root) as Arc<dyn RunProgressCallback>)
    };

    match &cli.command {
        Command::Unpack { epub, output } => {
            let dest = output
                .clone()
                .unwrap_or_else(|| epubtrans::epub::unpack_destination(epub));
            let report = unpack(epub, &dest)
                .await
                .with_context(|| format!("Failed to unpack {}", epub.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} Unpacked {} files to {}",
                    green("✔"),
                    report.files,
                    bold(&report.path.display().to_string())
                );
            }
        }
        Command::Clean { book } => {
            let summary = clean_book(book, workers, &cancel, progress_for(book))
                .await
                .context("Clean failed")?;
            print_summary(&cli, &summary, show_progress);
        }
        Command::Mark { book } => {
            let summary = mark_book(book, workers, &cancel, progress_for(book))
                .await
                .context("Mark failed")?;
            print_summary(&cli, &summary, show_progress);
        }
        Command::Styling { book, hide } => {
            let summary = style_book(book, (*hide).into(), workers, &cancel, progress_for(book))
                .await
                .context("Styling failed")?;
            print_summary(&cli, &summary, show_progress);
        }
        Command::Translate(args) => {
            let config = build_config(args, progress_for(&args.book))?;
            let summary = translate_book(&args.book, &config, &cancel)
                .await
                .context("Translation failed")?;
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
                );
            } else {
                print_summary(&cli, &summary, show_progress);
            }
        }
        Command::Pack { book, output } => {
            let output = output
                .clone()
                .unwrap_or_else(|| {
                    epubtrans::epub::unique_path(&epubtrans::epub::default_pack_output(book))
                });
            let report = pack(book, &output)
                .await
                .with_context(|| format!("Failed to pack {}", book.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} Packed {} files into {}",
                    green("✔"),
                    report.files,
                    bold(&report.path.display().to_string())
                );
            }
        }
        Command::Prepare { epub, hide } => {
            let root = epubtrans::epub::unpack_destination(epub);
            let report = prepare(epub, (*hide).into(), workers, &cancel, progress_for(&root))
                .await
                .with_context(|| format!("Failed to prepare {}", epub.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} Successfully prepared EPUB at {}",
                    green("✔"),
                    bold(&report.book_dir.display().to_string())
                );
            }
        }
        Command::Upgrade { repo, yes } => run_upgrade(repo, *yes, cli.quiet).await?,
    }

    Ok(())
}

fn stage_has_progress(command: &Command) -> bool {
    matches!(
        command,
        Command::Clean { .. }
            | Command::Mark { .. }
            | Command::Styling { .. }
            | Command::Translate(_)
            | Command::Prepare { .. }
    )
}

/// Map CLI args to `TranslateConfig`.
fn build_config(args: &TranslateArgs, progress: Option<ProgressCallback>) -> Result<TranslateConfig> {
    let mut builder = TranslateConfig::builder()
        .source_lang(&args.source)
        .target_lang(&args.target)
        .preset(args.preset.into())
        .batch_size(args.batch_size)
        .size_metric(args.size_metric.into())
        .concurrency(args.concurrency)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .rate_limit(args.rate, TranslateConfig::default().burst)
        .max_attempts(args.max_attempts)
        .record_usage(!args.no_usage);
    if let Some(model) = &args.model {
        builder = builder.model(model);
    }
    if let Some(provider) = &args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(g) = &args.guidelines {
        builder = builder.guidelines(g);
    }
    if let Some(p) = &args.system_prompt {
        builder = builder.system_prompt(p);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid translate options")
}

fn print_summary(cli: &Cli, summary: &RunSummary, show_progress: bool) {
    if cli.quiet {
        return;
    }
    if !show_progress {
        eprintln!(
            "{}: {}/{} files processed, {} skipped, {} partial, {} failed in {}ms",
            summary.stage,
            summary.processed,
            summary.total,
            summary.skipped,
            summary.partial,
            summary.failed,
            summary.duration_ms
        );
        for file in &summary.files {
            if let Some(e) = file.error_message() {
                eprintln!("  {} {}", red("✗"), e);
            }
        }
    }
    if summary.cancelled {
        eprintln!(
            "{} Run interrupted; re-run the same command to continue.",
            cyan("⚠")
        );
    }
}

async fn run_upgrade(repo: &str, yes: bool, quiet: bool) -> Result<()> {
    if !quiet {
        eprintln!("Checking for updates…");
    }
    let check = upgrade::check(repo, env!("CARGO_PKG_VERSION"))
        .await
        .context("Failed to check for updates")?;
    if !check.is_newer() {
        if !quiet {
            eprintln!("{} Already running the latest version ({})", green("✔"), check.current);
        }
        return Ok(());
    }
    eprintln!("Current version: {}", check.current);
    eprintln!("New version available: {}", bold(&check.latest.to_string()));
    if !yes {
        eprint!("Do you want to update? (y/n): ");
        io::stderr().flush().ok();
        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("Failed to read answer")?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            eprintln!("Upgrade cancelled.");
            return Ok(());
        }
    }
    let exe = upgrade::install(&check.release)
        .await
        .context("Failed to update")?;
    if !exe.exists() {
        bail!("Executable missing after upgrade: {}", exe.display());
    }
    eprintln!(
        "{} epubtrans {} installed. Please restart the application.",
        green("✔"),
        check.latest
    );
    Ok(())
}
