//! Analysis entry points: image bytes → [`PrescriptionRecord`].
//!
//! An [`Analyzer`] owns the resolved extraction backend and the config. It is
//! cheap to share behind an `Arc` and holds no per-request state, so the HTTP
//! server keeps exactly one.
//!
//! ```text
//! bytes ──▶ prepare ──▶ extract ──▶ normalize ──▶ PrescriptionRecord
//!          (blocking)  (timeout)   (pure)
//! ```
//!
//! Validation is a separate call ([`crate::pipeline::validate::validate`]).

use crate::config::AnalyzerConfig;
use crate::error::AnalysisError;
use crate::pipeline::extract::{GeminiExtractor, PrescriptionExtractor, ProviderExtractor};
use crate::pipeline::{normalize, prepare};
use crate::record::PrescriptionRecord;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of analysing one file in a batch.
#[derive(Debug)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub result: Result<PrescriptionRecord, AnalysisError>,
    pub duration_ms: u64,
}

/// Runs the prepare → extract → normalize pipeline.
pub struct Analyzer {
    config: AnalyzerConfig,
    extractor: Arc<dyn PrescriptionExtractor>,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("config", &self.config)
            .field("model", &self.extractor.model())
            .finish()
    }
}

impl Analyzer {
    /// Build an analyzer, resolving the extraction backend from `config`.
    pub fn new(config: AnalyzerConfig) -> Result<Self, AnalysisError> {
        let extractor = resolve_extractor(&config)?;
        Ok(Self { config, extractor })
    }

    /// Build an analyzer around a caller-supplied backend.
    pub fn with_extractor(config: AnalyzerConfig, extractor: Arc<dyn PrescriptionExtractor>) -> Self {
        Self { config, extractor }
    }

    /// Identifier of the extraction model.
    pub fn model(&self) -> &str {
        self.extractor.model()
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyse one prescription image.
    ///
    /// Makes exactly one extraction call, bounded by
    /// `config.api_timeout_secs`.
    ///
    /// # Errors
    /// - [`AnalysisError::InvalidInput`] for empty input
    /// - [`AnalysisError::ImageDecode`] when the bytes are not an image
    /// - upstream errors from the backend, or
    ///   [`AnalysisError::ExtractionTimeout`]
    /// - [`AnalysisError::Malformed`] when the answer is not a JSON record
    pub async fn analyze(&self, image_bytes: &[u8]) -> Result<PrescriptionRecord, AnalysisError> {
        if image_bytes.is_empty() {
            return Err(AnalysisError::InvalidInput("image is empty".into()));
        }
        if image_bytes.len() > self.config.max_upload_bytes {
            return Err(AnalysisError::InvalidInput(format!(
                "image is {} bytes, limit is {}",
                image_bytes.len(),
                self.config.max_upload_bytes
            )));
        }
        let start = Instant::now();

        // ── Step 1: Prepare image ────────────────────────────────────────────
        let bytes = image_bytes.to_vec();
        let max_dim = self.config.max_image_dimension;
        let quality = self.config.jpeg_quality;
        let prepared =
            tokio::task::spawn_blocking(move || prepare::prepare_image(&bytes, max_dim, quality))
                .await
                .map_err(|e| AnalysisError::Internal(format!("Image task panicked: {e}")))?
                .map_err(|e| AnalysisError::ImageDecode {
                    detail: e.to_string(),
                })?;
        let prepare_ms = start.elapsed().as_millis() as u64;

        // ── Step 2: Extract ──────────────────────────────────────────────────
        let llm_start = Instant::now();
        let secs = self.config.api_timeout_secs;
        let raw = tokio::time::timeout(
            Duration::from_secs(secs),
            self.extractor.extract(&prepared, self.config.prompt()),
        )
        .await
        .map_err(|_| AnalysisError::ExtractionTimeout { secs })?
        .inspect_err(|e| warn!("Extraction failed: {}", e))?;
        let llm_ms = llm_start.elapsed().as_millis() as u64;

        // ── Step 3: Normalize ────────────────────────────────────────────────
        let record = normalize::normalize(&raw.text, self.extractor.model()).inspect_err(|e| {
            warn!("Could not parse model output: {}", e.detail());
            debug!("Raw model output: {}", e.raw());
        })?;

        info!(
            "Analysed prescription with confidence {} ({} medications, {} in / {} out tokens, prepare {}ms, model {}ms)",
            record.confidence_score,
            record.medications.len(),
            raw.input_tokens,
            raw.output_tokens,
            prepare_ms,
            llm_ms
        );

        Ok(record)
    }

    /// Read a local image file and analyse it.
    pub async fn analyze_file(&self, path: impl AsRef<Path>) -> Result<PrescriptionRecord, AnalysisError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AnalysisError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => AnalysisError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => AnalysisError::InvalidInput(format!("cannot read '{}': {e}", path.display())),
        })?;
        debug!("Read {} bytes from {}", bytes.len(), path.display());
        self.analyze(&bytes).await
    }

    /// Analyse several files with at most `concurrency` in flight.
    ///
    /// One failure never aborts the others. Results come back in input order.
    pub async fn analyze_batch(&self, paths: &[PathBuf], concurrency: usize) -> Vec<FileAnalysis> {
        let mut results: Vec<(usize, FileAnalysis)> =
            stream::iter(paths.iter().cloned().enumerate().map(|(idx, path)| async move {
                let start = Instant::now();
                let result = self.analyze_file(&path).await;
                let duration_ms = start.elapsed().as_millis() as u64;
                if let Err(ref e) = result {
                    warn!("{}: {}", path.display(), e);
                }
                (
                    idx,
                    FileAnalysis {
                        path,
                        result,
                        duration_ms,
                    },
                )
            }))
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, r)| r).collect()
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────────

/// Resolve the extraction backend, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`): used as-is through
///    [`ProviderExtractor`].
/// 2. **Named provider** (`config.provider_name`, anything but `"gemini"`):
///    built with [`ProviderFactory::create_llm_provider`], which reads that
///    provider's own key variable (`OPENAI_API_KEY`, ...).
/// 3. **Native Gemini** with `config.api_key`.
pub fn resolve_extractor(config: &AnalyzerConfig) -> Result<Arc<dyn PrescriptionExtractor>, AnalysisError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::new(ProviderExtractor::new(Arc::clone(provider), config)));
    }

    if let Some(name) = config.provider_name.as_deref() {
        if !name.eq_ignore_ascii_case("gemini") {
            let provider = create_named_provider(name, &config.model)?;
            info!("Using provider '{}' with model '{}'", name, config.model);
            return Ok(Arc::new(ProviderExtractor::new(provider, config)));
        }
    }

    let gemini = GeminiExtractor::from_config(config)?;
    info!("Using Gemini model '{}'", config.model);
    Ok(Arc::new(gemini))
}

fn create_named_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, AnalysisError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        AnalysisError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}
