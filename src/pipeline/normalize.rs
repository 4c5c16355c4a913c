//! Response normalisation: raw model text → [`PrescriptionRecord`].
//!
//! Even when told to "return ONLY valid JSON", vision models regularly wrap
//! their answer in a ```` ```json ```` fence, or open one and forget to
//! close it. This stage removes those wrappers, parses what is left and
//! stamps the record with provenance the model must not control.
//!
//! ## Trust boundary
//!
//! `analyzed_at`, `model_version` and `accuracy_percentage` are always
//! written here and never taken from the payload. The confidence score is
//! taken from the payload but sanitised first.

use crate::error::NormalizeError;
use crate::record::{accuracy_percentage, PrescriptionRecord};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Keys owned by the normaliser. Dropped from the payload before parsing so
/// a bogus value (say, `"analyzed_at": "yesterday"`) cannot fail the parse.
const NORMALISER_FIELDS: [&str; 3] = ["analyzed_at", "model_version", "accuracy_percentage"];

/// Parse raw model output into a record.
///
/// Steps: trim → strip leading/trailing fence independently → trim → parse
/// as a JSON object → default missing fields → stamp `analyzed_at` and
/// `model_version` → sanitise confidence and recompute the percentage.
///
/// # Errors
/// [`NormalizeError::MalformedPayload`] when the de-fenced text is not a JSON
/// object. `raw` holds exactly the text given to the parser.
pub fn normalize(raw_text: &str, model_version: &str) -> Result<PrescriptionRecord, NormalizeError> {
    let text = strip_fences(raw_text);

    let malformed = |detail: String| NormalizeError::MalformedPayload {
        raw: text.to_string(),
        detail,
    };

    let mut value: Value = serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| malformed(format!("expected a JSON object, found {}", json_kind(text))))?;
    for key in NORMALISER_FIELDS {
        object.remove(key);
    }

    let mut record: PrescriptionRecord =
        serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;

    record.analyzed_at = Some(Utc::now());
    record.model_version = model_version.to_string();
    record.confidence_score = sanitise_confidence(record.confidence_score);
    record.accuracy_percentage = accuracy_percentage(record.confidence_score);

    debug!(
        "Normalised record: {} medications, confidence {}",
        record.medications.len(),
        record.confidence_score
    );

    Ok(record)
}

// ── Fence stripping ──────────────────────────────────────────────────────────

static RE_LEADING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_+-]*").unwrap());

/// Remove an opening fence (bare or language-tagged) and a closing fence.
///
/// The two ends are handled independently: either, both or neither may be
/// present. Surrounding whitespace is trimmed before and after.
pub fn strip_fences(input: &str) -> &str {
    let s = input.trim();
    let s = match RE_LEADING_FENCE.find(s) {
        Some(m) => &s[m.end()..],
        None => s,
    };
    let s = s.strip_suffix("```").unwrap_or(s);
    s.trim()
}

// ── Confidence ───────────────────────────────────────────────────────────────

/// Non-finite scores become 0.0; finite out-of-range scores are clamped.
fn sanitise_confidence(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn json_kind(text: &str) -> &'static str {
    match text.chars().next() {
        Some('[') => "an array",
        Some('"') => "a string",
        Some('t' | 'f') => "a boolean",
        Some('n') => "null",
        _ => "a number",
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
