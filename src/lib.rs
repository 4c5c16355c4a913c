//! # rxread
//!
//! Read handwritten and printed medical prescriptions with a vision model and
//! return a structured, validated record.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image bytes
//!  │
//!  ├─ 1. Prepare    decode, bound to 2048 px, RGB JPEG, base64 (spawn_blocking)
//!  ├─ 2. Extract    one call to gemini-1.5-flash (or any edgequake-llm provider)
//!  ├─ 3. Normalize  strip fences, parse JSON, stamp time/model, fix confidence
//!  └─ 4. Validate   completeness rules → errors (invalid) / warnings (review)
//! ```
//!
//! Steps 1–3 run in [`Analyzer::analyze`]; step 4 is the separate, pure
//! [`validate`] function so a client can re-check a record it has edited.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rxread::{validate, Analyzer, AnalyzerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AnalyzerConfig::builder()
//!         .api_key(std::env::var("GOOGLE_API_KEY")?)
//!         .build()?;
//!     let analyzer = Analyzer::new(config)?;
//!
//!     let record = analyzer.analyze_file("prescription.jpg").await?;
//!     let verdict = validate(&record);
//!     println!("{} medications, valid: {}", record.medications.len(), verdict.is_valid);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `rxread` binary (clap + anyhow + tracing-subscriber) |
//!
//! The HTTP server ([`server`]) is part of the library and always available.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{resolve_extractor, Analyzer, FileAnalysis};
pub use config::{AnalyzerConfig, AnalyzerConfigBuilder, DEFAULT_MODEL};
pub use error::{AnalysisError, NormalizeError};
pub use pipeline::extract::{GeminiExtractor, PrescriptionExtractor, ProviderExtractor, RawExtraction};
pub use pipeline::normalize::normalize;
pub use pipeline::prepare::PreparedImage;
pub use pipeline::validate::{validate, REVIEW_CONFIDENCE_THRESHOLD};
pub use prompts::EXTRACTION_PROMPT;
pub use record::{MedicationEntry, PrescriptionRecord, ValidationResult, VerificationStatus};
pub use server::{router, serve, AppState};
