//! CLI binary for rxread.
//!
//! A thin shim over the library crate: maps flags to `AnalyzerConfig`, then
//! either runs the HTTP server or analyses / validates local files and prints
//! JSON to stdout.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rxread::{serve, validate, Analyzer, AnalyzerConfig, PrescriptionRecord, DEFAULT_MODEL};
use serde::Serialize;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on port 5000
  rxread serve

  # Analyse one photo and print the record
  rxread analyze prescription.jpg

  # Analyse a folder of scans, four at a time, with validation
  rxread analyze --concurrency 4 --validate scans/*.png

  # Re-check a record after a pharmacist edited it
  rxread validate edited.json

HTTP ENDPOINTS (serve):
  GET  /health     {status, timestamp, model}
  POST /analyze    multipart field "image" → PrescriptionRecord
  POST /validate   PrescriptionRecord JSON → {is_valid, warnings, errors}

ENVIRONMENT VARIABLES:
  GOOGLE_API_KEY      Gemini API key (GEMINI_API_KEY is also accepted)
  PORT                Listening port for `serve` (default 5000)
  RXREAD_MODEL        Override the vision model (default gemini-1.5-flash)
  RXREAD_PROVIDER     Use another edgequake-llm provider (openai, anthropic, ollama, ...)
  RUST_LOG            Override log filtering
"#;

/// Extract and validate prescription data from images with a vision model.
#[derive(Parser, Debug)]
#[command(
    name = "rxread",
    version,
    about = "Extract and validate prescription data from images with a vision model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Gemini API key.
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Vision model ID.
    #[arg(long, env = "RXREAD_MODEL", default_value = DEFAULT_MODEL, global = true)]
    model: String,

    /// Extraction provider: gemini (native), or any edgequake-llm provider.
    #[arg(long, env = "RXREAD_PROVIDER", global = true)]
    provider: Option<String>,

    /// Extraction call timeout in seconds.
    #[arg(long, env = "RXREAD_API_TIMEOUT", default_value_t = 60, global = true)]
    api_timeout: u64,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "RXREAD_SYSTEM_PROMPT", global = true)]
    system_prompt: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "RXREAD_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all logs except errors.
    #[arg(short, long, env = "RXREAD_QUIET", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve {
        /// Listening port.
        #[arg(long, env = "PORT", default_value_t = 5000)]
        port: u16,

        /// Bind address.
        #[arg(long, env = "RXREAD_HOST", default_value = "0.0.0.0")]
        host: IpAddr,
    },

    /// Analyse one or more local images and print the records as JSON.
    Analyze {
        /// Image files (JPEG, PNG, WebP).
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Concurrent extraction calls when several images are given.
        #[arg(short, long, default_value_t = 2)]
        concurrency: usize,

        /// Also run validation and include the verdict in the output.
        #[arg(long)]
        validate: bool,
    },

    /// Validate a record stored as JSON and print the verdict.
    Validate {
        /// JSON file holding a (possibly partial) prescription record.
        record: PathBuf,
    },
}

#[derive(Serialize)]
struct AnalyzeOutput<'a> {
    file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<&'a PrescriptionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation: Option<rxread::ValidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    duration_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
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

    match &cli.command {
        Command::Validate { record } => run_validate(record),
        Command::Serve { port, host } => {
            let analyzer = build_analyzer(&cli)?;
            serve(SocketAddr::new(*host, *port), analyzer)
                .await
                .context("HTTP server failed")
        }
        Command::Analyze {
            images,
            concurrency,
            validate,
        } => {
            let analyzer = build_analyzer(&cli)?;
            run_analyze(&analyzer, images, *concurrency, *validate).await
        }
    }
}

// ── Subcommands ──────────────────────────────────────────────────────────────

fn run_validate(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let record: PrescriptionRecord = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a prescription record", path.display()))?;
    let verdict = validate(&record);
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    if !verdict.is_valid {
        std::process::exit(2);
    }
    Ok(())
}

async fn run_analyze(
    analyzer: &Analyzer,
    images: &[PathBuf],
    concurrency: usize,
    with_validation: bool,
) -> Result<()> {
    let results = analyzer.analyze_batch(images, concurrency).await;
    let failed = results.iter().filter(|r| r.result.is_err()).count();

    let outputs: Vec<AnalyzeOutput<'_>> = results
        .iter()
        .map(|r| AnalyzeOutput {
            file: r.path.display().to_string(),
            record: r.result.as_ref().ok(),
            validation: match (&r.result, with_validation) {
                (Ok(record), true) => Some(validate(record)),
                _ => None,
            },
            error: r.result.as_ref().err().map(|e| e.to_string()),
            duration_ms: r.duration_ms,
        })
        .collect();

    let json = if outputs.len() == 1 {
        serde_json::to_string_pretty(&outputs[0])?
    } else {
        serde_json::to_string_pretty(&outputs)?
    };
    println!("{json}");

    if failed == results.len() {
        bail!("All {} image(s) failed to analyse", failed);
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn build_analyzer(cli: &Cli) -> Result<Analyzer> {
    let mut builder = AnalyzerConfig::builder()
        .model(&cli.model)
        .api_timeout_secs(cli.api_timeout);

    // GOOGLE_API_KEY is wired through clap; GEMINI_API_KEY is the fallback.
    if let Some(key) = cli
        .api_key
        .clone()
        .or_else(|| std::env::var("GEMINI_API_KEY").ok())
        .filter(|k| !k.trim().is_empty())
    {
        builder = builder.api_key(key);
    }

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }

    if let Some(ref path) = cli.system_prompt {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read system prompt from {}", path.display()))?;
        builder = builder.system_prompt(prompt);
    }

    let config = builder.build().context("Invalid configuration")?;
    Analyzer::new(config).context("Failed to set up the extraction provider")
}
