//! CLI binary for editorial-brief.
//!
//! A thin adapter over the library crate: it plays the role of a single chat,
//! maps CLI flags to `AnalysisConfig`, asks on the terminal for a page list
//! when detection comes up empty, and prints the briefs.

use anyhow::{Context, Result};
use clap::Parser;
use editorial_brief::{
    load_pdf_bytes, render_briefs, AnalysisConfig, ArticleBrief, PageError, SessionManager,
    SessionObserver, SessionReply, SessionState,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// The CLI drives exactly one conversation.
const CHAT_ID: &str = "cli";

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

// ── Session observer using indicatif ─────────────────────────────────────────

/// Terminal observer: one spinner whose prefix follows the session state,
/// plus a log line per skipped page.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Opening");
        bar.set_message("reading PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl SessionObserver for CliObserver {
    fn on_state_change(&self, _chat_id: &str, _session_id: &str, state: SessionState) {
        let (prefix, msg) = match state {
            SessionState::Detecting => ("Detecting", "looking for the editorial pages…"),
            SessionState::AwaitingManualPages => ("Waiting", "page list needed"),
            SessionState::Extracting => ("Rendering", "pages at full resolution…"),
            SessionState::Summarizing => ("Summarizing", "writing briefs…"),
            SessionState::Done => ("Done", ""),
            SessionState::Failed => ("Failed", ""),
            SessionState::Idle => return,
        };
        self.bar.set_prefix(prefix);
        self.bar.set_message(msg);
    }

    fn on_detection_started(&self, _chat_id: &str, scanned_pages: usize) {
        self.bar
            .set_message(format!("scanning the first {scanned_pages} pages…"));
    }

    fn on_detection_failed(&self, _chat_id: &str) {
        self.bar.println(format!(
            "{} No editorial page detected automatically",
            cyan("⚠")
        ));
    }

    fn on_page_failed(&self, _chat_id: &str, error: &PageError) {
        let msg = error.to_string();
        let msg = if msg.chars().count() > 80 {
            format!("{}\u{2026}", msg.chars().take(79).collect::<String>())
        } else {
            msg
        };
        self.bar.println(format!(
            "  {} Page {:>3}  {}",
            red("✗"),
            error.page(),
            red(&msg)
        ));
    }

    fn on_briefs_ready(&self, _chat_id: &str, briefs: &[ArticleBrief]) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} briefs ready",
            green("✔"),
            bold(&briefs.len().to_string())
        );
    }

    fn on_session_failed(&self, _chat_id: &str, reason: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), reason);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Brief today's editorials (stdout)
  editorial-brief today.pdf

  # Write the briefs to a file
  editorial-brief today.pdf -o briefs.md

  # Brief pages 6 and 7 if detection finds no editorial page
  editorial-brief --pages "6 7" today.pdf

  # Use a specific model
  editorial-brief --provider gemini --model gemini-2.0-flash today.pdf

  # Full session reply as JSON
  editorial-brief --json https://example.com/epaper.pdf > reply.json

Detection always runs first; --pages is only used when it finds nothing.
Without --pages, the page numbers are then asked for on the terminal (e.g. "6 7", "6,7", "5-7" or "/pages 6 7").

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (otherwise the system library is used)
"#;

/// Find the editorial pages of a newspaper PDF and brief every article on them.
#[derive(Parser, Debug)]
#[command(
    name = "editorial-brief",
    version,
    about = "Brief the editorial pages of a newspaper PDF using Vision LLMs",
    long_about = "Scan the first pages of a newspaper PDF for its Editorial / Opinion / Ideas \
section, re-render those pages at 300 DPI and write a Decision-Maker's Brief (core argument, \
key evidence, policy implications) for every article, using a Vision Language Model.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write the briefs to this file instead of stdout.
    #[arg(short, long, env = "EDITORIAL_BRIEF_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gemini-2.0-flash, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Page list to use when detection finds nothing (e.g. "6 7" or "5-7").
    #[arg(long, env = "EDITORIAL_BRIEF_PAGES")]
    pages: Option<String>,

    /// Leading pages scanned for the editorial section.
    #[arg(long, env = "EDITORIAL_BRIEF_SCAN_PAGES", default_value_t = 12)]
    scan_pages: usize,

    /// Thumbnail DPI for detection.
    #[arg(long, env = "EDITORIAL_BRIEF_SCAN_DPI", default_value_t = 72,
          value_parser = clap::value_parser!(u32).range(36..=150))]
    scan_dpi: u32,

    /// DPI of the pages sent for briefing.
    #[arg(long, env = "EDITORIAL_BRIEF_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Most pages analysed per document.
    #[arg(long, env = "EDITORIAL_BRIEF_MAX_PAGES", default_value_t = 6)]
    max_pages: usize,

    /// Most briefs taken from one page.
    #[arg(long, env = "EDITORIAL_BRIEF_MAX_ARTICLES", default_value_t = 4)]
    max_articles: usize,

    /// Number of concurrent VLM API calls.
    #[arg(short, long, env = "EDITORIAL_BRIEF_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Path to a text file replacing the detection prompt.
    #[arg(long, env = "EDITORIAL_BRIEF_DETECTION_PROMPT")]
    detection_prompt: Option<PathBuf>,

    /// Path to a text file replacing the brief prompt.
    #[arg(long, env = "EDITORIAL_BRIEF_BRIEF_PROMPT")]
    brief_prompt: Option<PathBuf>,

    /// Max LLM output tokens per reply.
    #[arg(long, env = "EDITORIAL_BRIEF_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "EDITORIAL_BRIEF_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Invalid page lists accepted before giving up.
    #[arg(long, env = "EDITORIAL_BRIEF_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Seconds to wait for a page list.
    #[arg(long, env = "EDITORIAL_BRIEF_PAGES_TIMEOUT", default_value_t = 600)]
    pages_timeout: u64,

    /// Output the session reply as JSON instead of Markdown.
    #[arg(long, env = "EDITORIAL_BRIEF_JSON")]
    json: bool,

    /// Disable the spinner.
    #[arg(long, env = "EDITORIAL_BRIEF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "EDITORIAL_BRIEF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "EDITORIAL_BRIEF_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "EDITORIAL_BRIEF_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-request LLM timeout in seconds.
    #[arg(long, env = "EDITORIAL_BRIEF_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner carries the progress; library INFO logs would tear it.
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

    let config = build_config(&cli).await?;

    let observer = show_progress.then(CliObserver::new);
    let mut manager = SessionManager::from_config(config).context("Failed to set up the model")?;
    if let Some(ref observer) = observer {
        manager = manager.with_observer(observer.clone());
    }

    let bytes = load_pdf_bytes(&cli.input, cli.download_timeout)
        .await
        .with_context(|| format!("Failed to load '{}'", cli.input))?;

    let mut reply = manager
        .submit_document(CHAT_ID, bytes)
        .await
        .context("Analysis failed")?;

    let mut preset = cli.pages.clone();
    while reply.state == SessionState::AwaitingManualPages {
        let pages = match preset.take() {
            Some(pages) => pages,
            None if io::stdin().is_terminal() => {
                let ask = || prompt_for_pages(&reply.message);
                let line = match observer {
                    Some(ref o) => tokio::task::block_in_place(|| o.bar.suspend(ask)),
                    None => ask(),
                };
                line.context("Failed to read the page list")?
            }
            None => anyhow::bail!(
                "{}\nRe-run with --pages to choose the pages.",
                reply.message
            ),
        };
        reply = manager
            .submit_manual_pages(CHAT_ID, &pages)
            .await
            .context("Analysis failed")?;
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&reply).context("Failed to serialise reply")?;
        println!("{json}");
    } else if reply.state == SessionState::Done {
        write_briefs(&reply, cli.output.as_deref())?;
    }

    if reply.state == SessionState::Failed {
        anyhow::bail!(
            "{}",
            reply.failure.as_deref().unwrap_or(reply.message.as_str())
        );
    }

    if !cli.quiet && !cli.json {
        eprintln!("{}", dim(&reply.message));
    }
    Ok(())
}

/// Ask on stderr, read one line from stdin.
fn prompt_for_pages(message: &str) -> io::Result<String> {
    let mut stderr = io::stderr();
    writeln!(stderr, "{} {}", cyan("?"), message)?;
    write!(stderr, "{} ", bold("pages>"))?;
    stderr.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn write_briefs(reply: &SessionReply, output: Option<&Path>) -> Result<()> {
    let mut markdown = render_briefs(&reply.briefs);
    if !markdown.ends_with('\n') {
        markdown.push('\n');
    }

    match output {
        Some(path) => {
            std::fs::write(path, &markdown)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{}  {} briefs  →  {}",
                green("✔"),
                reply.briefs.len(),
                bold(&path.display().to_string())
            );
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(markdown.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

/// Map CLI args to `AnalysisConfig`.
async fn build_config(cli: &Cli) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .scan_pages(cli.scan_pages)
        .scan_dpi(cli.scan_dpi)
        .extract_dpi(cli.dpi)
        .max_candidate_pages(cli.max_pages)
        .max_articles_per_page(cli.max_articles)
        .inference_concurrency(cli.concurrency)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_manual_attempts(cli.max_attempts)
        .manual_pages_timeout(Duration::from_secs(cli.pages_timeout))
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = cli.detection_prompt {
        builder = builder.detection_prompt(read_prompt(path).await?);
    }
    if let Some(ref path) = cli.brief_prompt {
        builder = builder.brief_prompt(read_prompt(path).await?);
    }

    builder.build().context("Invalid configuration")
}

async fn read_prompt(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read prompt from {:?}", path))
}
