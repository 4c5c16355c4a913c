//! Error types for the rxread library.
//!
//! Two error types mirror the two layers of the pipeline:
//!
//! * [`NormalizeError`] is returned by [`crate::pipeline::normalize::normalize`]
//!   when the model output cannot be parsed. It always carries the text that
//!   was handed to the parser so callers can see what the model really said.
//!
//! * [`AnalysisError`] covers everything that can stop a single analysis
//!   request: bad input, an unreadable image, a failed or slow upstream call,
//!   or a malformed payload (wrapped [`NormalizeError`]).
//!
//! Validation never fails; it reports problems in
//! [`crate::record::ValidationResult`] instead.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn raw model output into a [`crate::record::PrescriptionRecord`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    /// The de-fenced text is not a JSON object.
    #[error("Model output is not a valid JSON object: {detail}")]
    MalformedPayload {
        /// The exact text that was fed to the JSON parser.
        raw: String,
        /// Parser diagnostic.
        detail: String,
    },
}

impl NormalizeError {
    /// The raw text the parser rejected.
    pub fn raw(&self) -> &str {
        match self {
            NormalizeError::MalformedPayload { raw, .. } => raw,
        }
    }

    /// The parser diagnostic, without the surrounding message.
    pub fn detail(&self) -> &str {
        match self {
            NormalizeError::MalformedPayload { detail, .. } => detail,
        }
    }
}

/// All errors that abort a single prescription analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Request input was missing or unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The uploaded bytes could not be decoded as an image.
    #[error("Could not decode image: {detail}")]
    ImageDecode { detail: String },

    /// Local image file was not found.
    #[error("Image file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// No extraction backend could be built (missing API key etc.).
    #[error("Extraction provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The extraction service returned an error or an unusable response.
    #[error("Extraction service error: {message}")]
    UpstreamError { message: String },

    /// The extraction service rejected the credential (401/403).
    #[error("Authentication error from provider '{provider}': {detail}")]
    AuthError { provider: String, detail: String },

    /// The extraction service returned HTTP 429.
    #[error("Rate limit exceeded for provider '{provider}'")]
    RateLimitExceeded {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// The extraction call did not finish within the configured bound.
    #[error("Extraction call timed out after {secs}s")]
    ExtractionTimeout { secs: u64 },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The model answered, but not with a parseable record.
    #[error(transparent)]
    Malformed(#[from] NormalizeError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// True when the caller supplied something unusable, as opposed to a
    /// failure on our side or upstream.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            AnalysisError::InvalidInput(_)
                | AnalysisError::ImageDecode { .. }
                | AnalysisError::FileNotFound { .. }
                | AnalysisError::PermissionDenied { .. }
        )
    }

    /// Raw model output, when the failure was a malformed payload.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            AnalysisError::Malformed(e) => Some(e.raw()),
            _ => None,
        }
    }
}
