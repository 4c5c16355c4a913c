//! Instruction prompt sent to the extraction model.
//!
//! Every prompt lives here so the field list the model is asked for can be
//! checked against [`crate::record::PrescriptionRecord`] in one place.
//! Callers can override it via [`crate::config::AnalyzerConfig::system_prompt`].

use crate::pipeline::validate::REVIEW_CONFIDENCE_THRESHOLD;
use once_cell::sync::Lazy;

/// Default extraction prompt.
///
/// Requests every record field except the three the normaliser owns
/// (`analyzed_at`, `model_version`, `accuracy_percentage`). The review
/// threshold is interpolated from [`REVIEW_CONFIDENCE_THRESHOLD`] so the
/// model and the rule engine agree on what "low confidence" means.
pub static EXTRACTION_PROMPT: Lazy<String> = Lazy::new(|| {
    format!(
        r#"Analyze this prescription image and extract the following information in JSON format:

{{
  "patient_name": "extracted patient name or empty string",
  "doctor_name": "extracted doctor name or empty string",
  "date": "prescription date in YYYY-MM-DD format or empty string",
  "medications": [
    {{
      "name": "medication name",
      "dosage": "dosage amount and unit",
      "frequency": "how often to take",
      "duration": "treatment duration"
    }}
  ],
  "special_instructions": "any special instructions",
  "warnings": ["list of any warnings or concerns"],
  "verification_status": "verified or needs_review",
  "confidence_score": 0.0 to 1.0
}}

Important guidelines:
1. Extract all visible text accurately
2. Identify medication names, dosages, and frequencies
3. Flag any unclear or ambiguous text
4. Provide a confidence score based on image quality and text clarity
5. Mark as "needs_review" if confidence is below {threshold}
6. List any potential drug interaction warnings if identifiable

Return ONLY valid JSON without any markdown formatting or explanations."#,
        threshold = REVIEW_CONFIDENCE_THRESHOLD
    )
});

/// Fields the model is asked to fill in, in prompt order.
pub const REQUESTED_FIELDS: &[&str] = &[
    "patient_name",
    "doctor_name",
    "date",
    "medications",
    "special_instructions",
    "warnings",
    "verification_status",
    "confidence_score",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PrescriptionRecord;

    #[test]
    fn prompt_names_every_requested_field() {
        for field in REQUESTED_FIELDS {
            assert!(
                EXTRACTION_PROMPT.contains(&format!("\"{field}\"")),
                "prompt is missing {field}"
            );
        }
    }

    #[test]
    fn prompt_does_not_request_normaliser_fields() {
        for field in ["analyzed_at", "model_version", "accuracy_percentage"] {
            assert!(!EXTRACTION_PROMPT.contains(field), "prompt asks for {field}");
        }
    }

    #[test]
    fn requested_fields_match_record_shape() {
        let record = serde_json::to_value(PrescriptionRecord::default()).unwrap();
        let keys: Vec<&str> = record
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .filter(|k| !matches!(*k, "analyzed_at" | "model_version" | "accuracy_percentage"))
            .collect();
        assert_eq!(keys.len(), REQUESTED_FIELDS.len());
        for key in keys {
            assert!(REQUESTED_FIELDS.contains(&key), "{key} not requested");
        }
    }

    #[test]
    fn prompt_uses_shared_review_threshold() {
        assert!(EXTRACTION_PROMPT.contains("below 0.85"));
        assert_eq!(REVIEW_CONFIDENCE_THRESHOLD, 0.85);
    }
}
