//! Rule engine: deterministic completeness and safety checks on a record.
//!
//! [`validate`] is total. Finding problems is its normal output, so it never
//! returns an error; every rule runs on every call so one pass reports all
//! issues. Errors make the record invalid, warnings never do.
//!
//! There is no date/number format checking and no drug-interaction logic
//! here. Interaction concerns come from the model's own `warnings` field.

use crate::record::{PrescriptionRecord, ValidationResult};

/// Confidence below which a record is flagged for manual review.
///
/// Shared with [`crate::prompts::EXTRACTION_PROMPT`], which asks the model
/// to self-report `needs_review` under the same bound.
pub const REVIEW_CONFIDENCE_THRESHOLD: f64 = 0.85;

pub const MSG_PATIENT_MISSING: &str = "Patient name is missing";
pub const MSG_DOCTOR_MISSING: &str = "Doctor name is missing";
pub const MSG_NO_MEDICATIONS: &str = "No medications found";
pub const MSG_MEDICATION_NAME_MISSING: &str = "Medication name missing";
pub const MSG_LOW_CONFIDENCE: &str = "Low confidence score - manual review recommended";

const UNKNOWN_MEDICATION: &str = "unknown medication";

/// Check a record and return the verdict.
pub fn validate(record: &PrescriptionRecord) -> ValidationResult {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    if is_blank(&record.patient_name) {
        warnings.push(MSG_PATIENT_MISSING.to_string());
    }

    if is_blank(&record.doctor_name) {
        warnings.push(MSG_DOCTOR_MISSING.to_string());
    }

    if record.medications.is_empty() {
        errors.push(MSG_NO_MEDICATIONS.to_string());
    }

    for med in &record.medications {
        if is_blank(&med.name) {
            errors.push(MSG_MEDICATION_NAME_MISSING.to_string());
        }
        if is_blank(&med.dosage) {
            let name = if is_blank(&med.name) {
                UNKNOWN_MEDICATION
            } else {
                med.name.as_str()
            };
            warnings.push(format!("Dosage missing for {name}"));
        }
    }

    let score = record.confidence_score;
    if score.is_nan() || score < REVIEW_CONFIDENCE_THRESHOLD {
        warnings.push(MSG_LOW_CONFIDENCE.to_string());
    }

    ValidationResult {
        is_valid: errors.is_empty(),
        warnings,
        errors,
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}
