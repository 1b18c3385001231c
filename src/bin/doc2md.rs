//! CLI binary for doc2md.
//!
//! `doc2md serve` runs the HTTP service; `doc2md convert` runs one job
//! locally and prints the pages. Both are thin shims that map flags onto
//! `PipelineConfig` / `ServerConfig`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use doc2md::page::is_failure_marker;
use doc2md::{
    assemble_text, load_job, server, write_output, EventEmitter, PageSeparator, PipelineConfig,
    PipelineDriver, ServerConfig, StreamEvent, StreamFrame,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
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

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on :8855
  doc2md serve

  # Stream a PDF through the service
  curl -N -F file=@scan.pdf -F model=gpt-4.1-mini http://localhost:8855/file/stream

  # Convert locally, text to stdout
  doc2md convert scan.pdf

  # Convert a URL, write to file, show one JSON event per line
  doc2md convert https://example.org/form.png -o form.md --json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  DOC2MD_*                Every flag below has a DOC2MD_ equivalent
"#;

/// Stream OCR text for PDF and image uploads using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "doc2md",
    version,
    about = "Stream OCR text for PDF and image uploads using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOC2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOC2MD_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve {
        /// Interface to bind.
        #[arg(long, env = "DOC2MD_HOST", default_value = "0.0.0.0")]
        host: String,

        /// TCP port.
        #[arg(long, env = "DOC2MD_PORT", default_value_t = 8855)]
        port: u16,

        /// Maximum upload size in MiB.
        #[arg(long, env = "DOC2MD_BODY_LIMIT_MB", default_value_t = 64)]
        body_limit_mb: usize,

        /// Seconds between SSE keep-alive comments.
        #[arg(long, env = "DOC2MD_KEEP_ALIVE", default_value_t = 15)]
        keep_alive: u64,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Convert one local file or URL.
    Convert {
        /// Local PDF/JPEG/PNG path or HTTP/HTTPS URL.
        input: String,

        /// Write text to this file instead of stdout.
        #[arg(short, long, env = "DOC2MD_OUTPUT")]
        output: Option<PathBuf>,

        /// Print each event as one JSON line on stdout.
        #[arg(long, env = "DOC2MD_JSON")]
        json: bool,

        /// Page separator: none, hr, comment, or custom string.
        #[arg(long, env = "DOC2MD_SEPARATOR", default_value = "none")]
        separator: String,

        /// Disable progress bar.
        #[arg(long, env = "DOC2MD_NO_PROGRESS")]
        no_progress: bool,

        /// HTTP download timeout in seconds.
        #[arg(long, env = "DOC2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
        download_timeout: u64,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

/// Flags shared by both subcommands.
#[derive(Args, Debug)]
struct PipelineArgs {
    /// Default model ID when a request does not name one.
    #[arg(long, env = "DOC2MD_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "DOC2MD_PROVIDER")]
    provider: Option<String>,

    /// PDF render scale (1.0 = 72 DPI).
    #[arg(long, env = "DOC2MD_ZOOM", default_value_t = 2.0)]
    zoom: f32,

    /// Cap on the longest rendered edge, in pixels.
    #[arg(long, env = "DOC2MD_MAX_PIXELS", default_value_t = 4000)]
    max_pixels: u32,

    /// Concurrent model calls per document.
    #[arg(short, long, env = "DOC2MD_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Max model output tokens per page.
    #[arg(long, env = "DOC2MD_MAX_TOKENS", default_value_t = 1000)]
    max_tokens: usize,

    /// Model temperature (0.0–2.0).
    #[arg(long, env = "DOC2MD_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Retries per page on model failure.
    #[arg(long, env = "DOC2MD_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "DOC2MD_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "DOC2MD_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom OCR prompt.
    #[arg(long, env = "DOC2MD_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Keep raw model output (skip fence/whitespace cleanup).
    #[arg(long, env = "DOC2MD_RAW")]
    raw: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The progress bar replaces INFO logs during a local convert.
    let show_progress = match &cli.command {
        Command::Convert {
            json, no_progress, ..
        } => !cli.quiet && !*no_progress && !*json,
        Command::Serve { .. } => false,
    };
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
        Command::Serve {
            host,
            port,
            body_limit_mb,
            keep_alive,
            pipeline,
        } => {
            let config = build_config(&pipeline).await?;
            let server_config = ServerConfig {
                host,
                port,
                body_limit_bytes: body_limit_mb.saturating_mul(1024 * 1024),
                keep_alive_secs: keep_alive,
            };
            server::serve(PipelineDriver::new(config), &server_config)
                .await
                .with_context(|| format!("Server on {} failed", server_config.bind_address()))?;
        }
        Command::Convert {
            input,
            output,
            json,
            separator,
            no_progress: _,
            download_timeout,
            pipeline,
        } => {
            let config = build_config(&pipeline).await?;
            let opts = ConvertOptions {
                output,
                json,
                separator: parse_separator(&separator),
                show_progress,
                quiet: cli.quiet,
            };
            run_convert(&input, download_timeout, config, opts).await?;
        }
    }

    Ok(())
}

struct ConvertOptions {
    output: Option<PathBuf>,
    json: bool,
    separator: PageSeparator,
    show_progress: bool,
    quiet: bool,
}

async fn run_convert(
    input: &str,
    download_timeout: u64,
    config: PipelineConfig,
    opts: ConvertOptions,
) -> Result<()> {
    // Model is resolved by the driver from the config default.
    let job = load_job(input, "", download_timeout)
        .await
        .with_context(|| format!("Failed to load '{input}'"))?;

    let driver = PipelineDriver::new(config);
    let (mut emitter, mut frames) = EventEmitter::channel(Duration::ZERO);
    let run = tokio::spawn(async move { driver.run(job, &mut emitter).await });

    let bar = if opts.show_progress {
        Some(new_progress_bar())
    } else {
        None
    };
    let stdout = io::stdout();

    while let Some(frame) = frames.recv().await {
        if opts.json {
            if let StreamFrame::Event(_) = frame {
                writeln!(stdout.lock(), "{}", frame.data()).context("Failed to write to stdout")?;
            }
        }
        if let (Some(bar), StreamFrame::Event(event)) = (&bar, &frame) {
            report_progress(bar, event);
        }
    }

    let output = run
        .await
        .context("Conversion task panicked")?
        .context("Conversion failed")?;

    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    let stats = &output.stats;
    if !opts.quiet && !opts.json {
        eprintln!(
            "{}  {}/{} pages  {}ms  {} tokens in / {} tokens out",
            if stats.failed_pages == 0 {
                green("✔")
            } else {
                red("⚠")
            },
            stats.succeeded_pages,
            stats.total_pages,
            stats.duration_ms,
            dim(&stats.input_tokens.to_string()),
            dim(&stats.output_tokens.to_string()),
        );
    }

    let text = assemble_text(&output.pages, &opts.separator);
    match &opts.output {
        Some(path) => {
            write_output(path, &text)?;
            if !opts.quiet {
                eprintln!("   → {}", bold(&path.display().to_string()));
            }
        }
        None if !opts.json => {
            io::stdout()
                .lock()
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
        }
        None => {}
    }

    Ok(())
}

fn new_progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ");
    bar.set_style(style);
    bar.set_prefix("Reading");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn report_progress(bar: &ProgressBar, event: &StreamEvent) {
    match event {
        StreamEvent::Progress {
            total_pages,
            current_page,
            current_content,
            ..
        } => {
            bar.set_length(*total_pages as u64);
            let mark = if is_failure_marker(current_content) {
                red("✗")
            } else {
                green("✓")
            };
            bar.println(format!(
                "  {} Page {:>3}/{:<3}  {}",
                mark,
                current_page,
                total_pages,
                dim(&format!("{:>5} chars", current_content.len())),
            ));
            bar.set_position(*current_page as u64);
        }
        StreamEvent::Complete { .. } => {}
        StreamEvent::Error { message, .. } => {
            bar.println(format!("  {} {}", red("✘"), message));
        }
    }
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(args: &PipelineArgs) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .zoom(args.zoom)
        .max_rendered_pixels(args.max_pixels)
        .concurrency(args.concurrency)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout)
        .clean_output(!args.raw);

    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = args.password {
        builder = builder.password(password);
    }
    if let Some(ref path) = args.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
