//! CLI binary for vlm2md.
//!
//! A thin shim over the library crate: maps CLI flags to
//! `ConversionConfig`, connects the gateway, and prints a run summary.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vlm2md::{
    ConversionConfig, ConversionProgressCallback, EngineRegistry, ModelGateway, PageConverter,
    ProgressCallback,
};

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus a per-page log line.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// The bar length is set by `on_conversion_start` once the page range
    /// has been clamped against the document.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_corrective_pass(&self, page_num: usize, missing: usize) {
        self.bar.println(format!(
            "  {} Page {page_num}: {missing} image(s) missing, retrying",
            cyan("↻"),
        ));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, synthetic_links: usize) {
        let note = if synthetic_links > 0 {
            dim(&format!("{synthetic_links} synthetic link(s)"))
        } else {
            String::new()
        };
        self.bar.println(format!(
            "  {} Page {page_num:>3}/{total:<3}  {note}",
            green("✓"),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = truncate_error(error, 79);
        self.bar.println(format!(
            "  {} Page {page_num:>3}/{total:<3}  {}",
            red("✗"),
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages converted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages converted  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

/// Cap an error message at `max_bytes`, cutting on a char boundary.
///
/// Status errors embed the server's response body verbatim, which may be
/// non-ASCII; a fixed byte slice could land mid-character and panic.
fn truncate_error(error: &str, max_bytes: usize) -> String {
    if error.len() <= max_bytes + 1 {
        return error.to_string();
    }
    let mut cut = max_bytes;
    while !error.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\u{2026}", &error[..cut])
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert the first two pages (defaults) into ./out
  vlm2md document.pdf out

  # Convert pages 3 through 10
  vlm2md document.pdf out 3 10

  # Convert everything from page 1 to the end
  vlm2md document.pdf out 1 -1

  # Use the OpenAI engine instead of the local server
  vlm2md --engine openai document.pdf out

OUTPUTS (written into <output_folder>):
  page_NNNN.png        rendered page screenshots
  image_xref<id>.<ext> images extracted from the PDF
  result.txt           cumulative Markdown, one page appended after another

ENVIRONMENT VARIABLES:
  VLM2MD_BASE_URL   Base URL of the "local" engine (default http://localhost:8000/v1)
  VLM2MD_API_KEY    API key for the "local" engine (default "none")
  OPENAI_API_KEY    Registers the "openai" engine when set
"#;

/// Convert a PDF to Markdown with a vision-language model.
#[derive(Parser, Debug)]
#[command(
    name = "vlm2md",
    version,
    about = "Convert a PDF to Markdown with a vision-language model",
    long_about = "Convert a PDF document to Markdown by rasterising each page, sending the \
screenshot to a vision-language model, and reconciling the reply against the images extracted \
from the PDF so no embedded figure is silently dropped. Works with any OpenAI-compatible \
endpoint (vLLM, Ollama, LiteLLM, OpenAI).",
    arg_required_else_help = true,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Path to the PDF file to convert.
    pdf_path: PathBuf,

    /// Folder receiving screenshots, extracted images, and result.txt.
    output_folder: PathBuf,

    /// First page to convert (1-based).
    #[arg(default_value_t = 1)]
    start_page: i64,

    /// Last page to convert; -1 or any value past the end means "to the
    /// last page".
    #[arg(default_value_t = 2, allow_negative_numbers = true)]
    end_page: i64,

    /// Engine to talk to: local, openai, or one registered via env.
    #[arg(long, env = "VLM2MD_ENGINE", default_value = "local")]
    engine: String,

    /// Which entry of the engine's model list to use.
    #[arg(long, env = "VLM2MD_MODEL_INDEX", default_value_t = 0)]
    model_index: usize,

    /// Rendering DPI (72–600).
    #[arg(long, env = "VLM2MD_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "VLM2MD_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "VLM2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Disable the progress bar.
    #[arg(long, env = "VLM2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "VLM2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "VLM2MD_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return Ok(());
        }
        Err(e) => {
            // Bad invocation: usage on stderr, exit status 1.
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the per-page feedback; keep library logs
    // quiet unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    // ── Gateway ──────────────────────────────────────────────────────────
    let registry = EngineRegistry::from_env();
    let engine = registry.get(&cli.engine)?.clone();
    let mut gateway = ModelGateway::connect(engine)
        .await
        .with_context(|| format!("Failed to connect to engine '{}'", cli.engine))?;
    gateway.set_model_index(cli.model_index);
    if !cli.quiet {
        eprintln!(
            "{} engine '{}', models: {}",
            dim("→"),
            cli.engine,
            dim(&gateway.models().join(", "))
        );
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let mut builder = ConversionConfig::builder()
        .dpi(cli.dpi)
        .temperature(cli.temperature)
        .model_index(cli.model_index);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {path:?}"))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress_cb {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    // ── Run conversion ───────────────────────────────────────────────────
    let converter = PageConverter::new(Arc::new(gateway), config);
    let stats = converter
        .convert(
            &cli.pdf_path,
            &cli.output_folder,
            cli.start_page,
            cli.end_page,
        )
        .await
        .context("Conversion failed")?;

    if !cli.quiet {
        eprintln!(
            "{}  {} pages → {}",
            if stats.pages_failed == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.pages_processed,
            bold(&cli.output_folder.join("result.txt").display().to_string()),
        );
        if stats.synthetic_links > 0 {
            eprintln!(
                "   {} image link(s) appended mechanically after {} corrective pass(es)",
                dim(&stats.synthetic_links.to_string()),
                stats.corrective_passes,
            );
        }
        if stats.pages_failed > 0 {
            eprintln!("   {} page(s) failed", red(&stats.pages_failed.to_string()));
        }
    }

    if stats.pages_failed > 0 && stats.pages_processed == 0 {
        std::process::exit(1);
    }
    Ok(())
}
