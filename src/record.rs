//! Prescription data model.
//!
//! [`PrescriptionRecord`] is the canonical structured output of an analysis.
//! Deserialisation is deliberately forgiving because the same shape arrives
//! from two untrusted places: the model's JSON answer and the body of a
//! `/validate` request. Every field has a default, a JSON `null` is read as
//! "absent", and a value of the wrong JSON type is coerced rather than
//! rejected, so a partially compliant payload still produces a record.
//! The one place that decides what "missing" means is this module.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A prescription as extracted and normalised.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrescriptionRecord {
    #[serde(deserialize_with = "lenient_text")]
    pub patient_name: String,

    #[serde(deserialize_with = "lenient_text")]
    pub doctor_name: String,

    /// Advisory `YYYY-MM-DD`; never parsed or enforced.
    #[serde(deserialize_with = "lenient_text")]
    pub date: String,

    /// Medications in the order the model listed them.
    #[serde(deserialize_with = "lenient_medications")]
    pub medications: Vec<MedicationEntry>,

    #[serde(deserialize_with = "lenient_text")]
    pub special_instructions: String,

    /// Concerns flagged by the model itself (e.g. interactions). Not the
    /// same thing as [`ValidationResult::warnings`].
    #[serde(deserialize_with = "lenient_list")]
    pub warnings: Vec<String>,

    pub verification_status: VerificationStatus,

    /// Model self-reported confidence, 0.0–1.0.
    #[serde(deserialize_with = "lenient_score")]
    pub confidence_score: f64,

    /// Set by the normaliser; `None` only for records that never went
    /// through it (e.g. a hand-written `/validate` body). Read leniently: a
    /// timestamp without offset is taken as UTC, anything unparseable is
    /// `None`.
    #[serde(deserialize_with = "lenient_timestamp")]
    pub analyzed_at: Option<DateTime<Utc>>,

    /// Identifier of the extraction model, set by the normaliser.
    #[serde(deserialize_with = "lenient_text")]
    pub model_version: String,

    /// `confidence_score * 100` rounded to two decimals.
    ///
    /// Serialised for clients but never read back: the normaliser is its
    /// only writer (see [`accuracy_percentage`]).
    #[serde(skip_deserializing)]
    pub accuracy_percentage: f64,
}

/// One medication line of a prescription. All fields are free text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MedicationEntry {
    #[serde(deserialize_with = "lenient_text")]
    pub name: String,
    /// Amount and unit combined, e.g. `"500 mg"`.
    #[serde(deserialize_with = "lenient_text")]
    pub dosage: String,
    #[serde(deserialize_with = "lenient_text")]
    pub frequency: String,
    #[serde(deserialize_with = "lenient_text")]
    pub duration: String,
}

/// Whether the model considered its own reading trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    /// Default, and the fallback for any value the model invents.
    #[default]
    NeedsReview,
}

impl<'de> Deserialize<'de> for VerificationStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) if s.trim().eq_ignore_ascii_case("verified") => {
                VerificationStatus::Verified
            }
            _ => VerificationStatus::NeedsReview,
        })
    }
}

/// Verdict of the rule engine. Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    /// `true` exactly when `errors` is empty.
    pub is_valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Percentage form of a confidence score, rounded to two decimals.
pub fn accuracy_percentage(confidence_score: f64) -> f64 {
    (confidence_score * 100.0 * 100.0).round() / 100.0
}

// ── Lenient field readers ────────────────────────────────────────────────────

/// Scalar → text. `null` is empty; numbers and booleans keep their JSON form.
fn scalar_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(items) => items
            .into_iter()
            .map(scalar_text)
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Free text that may arrive as a number, a boolean, a list or `null`.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(Value::deserialize(deserializer)?))
}

/// A list of strings that may arrive as a single string, a scalar or `null`.
fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .map(scalar_text)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        other => {
            let text = scalar_text(other);
            if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
    })
}

/// Medications as a list, a single entry object, or bare names.
fn lenient_medications<'de, D>(deserializer: D) -> Result<Vec<MedicationEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Value::deserialize(deserializer)? {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        single => vec![single],
    };

    items
        .into_iter()
        .filter(|item| !item.is_null())
        .map(|item| match item {
            Value::Object(_) => serde_json::from_value(item).map_err(serde::de::Error::custom),
            other => Ok(MedicationEntry {
                name: scalar_text(other),
                ..Default::default()
            }),
        })
        .collect()
}

/// RFC 3339, or an offset-less ISO timestamp read as UTC. Anything else is
/// `None`.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::String(text) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    Ok(NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc()))
}

/// Accept a JSON number, a numeric string (`"0.92"`) or `null`.
fn lenient_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Score {
        Number(f64),
        Text(String),
    }

    match Option::<Score>::deserialize(deserializer)? {
        None => Ok(0.0),
        Some(Score::Number(n)) => Ok(n),
        Some(Score::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid confidence_score '{s}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_gives_defaults() {
        let r: PrescriptionRecord = serde_json::from_value(json!({})).unwrap();
        assert_eq!(r, PrescriptionRecord::default());
        assert_eq!(r.verification_status, VerificationStatus::NeedsReview);
        assert!(r.analyzed_at.is_none());
    }

    #[test]
    fn nulls_read_as_absent() {
        let r: PrescriptionRecord = serde_json::from_value(json!({
            "patient_name": null,
            "medications": null,
            "confidence_score": null,
            "warnings": null
        }))
        .unwrap();
        assert_eq!(r.patient_name, "");
        assert!(r.medications.is_empty());
        assert_eq!(r.confidence_score, 0.0);
    }

    #[test]
    fn partial_medication_entry() {
        let m: MedicationEntry =
            serde_json::from_value(json!({ "name": "Amoxicillin", "dosage": null })).unwrap();
        assert_eq!(m.name, "Amoxicillin");
        assert_eq!(m.dosage, "");
        assert_eq!(m.frequency, "");
    }

    #[test]
    fn scalar_text_fields_are_coerced() {
        let r: PrescriptionRecord = serde_json::from_value(json!({
            "patient_name": 42,
            "date": ["2024", "03", "01"],
            "special_instructions": false,
            "medications": [{"name": "Aspirin", "dosage": 81, "frequency": 2.5, "duration": true}]
        }))
        .unwrap();
        assert_eq!(r.patient_name, "42");
        assert_eq!(r.date, "2024, 03, 01");
        assert_eq!(r.special_instructions, "false");
        assert_eq!(
            r.medications[0],
            MedicationEntry {
                name: "Aspirin".into(),
                dosage: "81".into(),
                frequency: "2.5".into(),
                duration: "true".into(),
            }
        );
    }

    #[test]
    fn single_string_warning_becomes_list() {
        let parse = |v: serde_json::Value| -> Vec<String> {
            serde_json::from_value::<PrescriptionRecord>(json!({ "warnings": v }))
                .unwrap()
                .warnings
        };
        assert_eq!(parse(json!("None")), vec!["None"]);
        assert_eq!(parse(json!("   ")), Vec::<String>::new());
        assert_eq!(parse(json!(["a", null, 3, ""])), vec!["a", "3"]);
    }

    #[test]
    fn medications_accept_single_entry_and_bare_names() {
        let r: PrescriptionRecord =
            serde_json::from_value(json!({ "medications": {"name": "Metformin"} })).unwrap();
        assert_eq!(r.medications.len(), 1);
        assert_eq!(r.medications[0].name, "Metformin");

        let r: PrescriptionRecord =
            serde_json::from_value(json!({ "medications": ["Ibuprofen", null] })).unwrap();
        assert_eq!(r.medications.len(), 1);
        assert_eq!(r.medications[0].name, "Ibuprofen");
        assert_eq!(r.medications[0].dosage, "");
    }

    #[test]
    fn analyzed_at_without_offset_is_utc() {
        let r: PrescriptionRecord =
            serde_json::from_value(json!({ "analyzed_at": "2024-03-01T10:00:00.123456" })).unwrap();
        let ts = r.analyzed_at.expect("parsed");
        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:00:00.123456+00:00");

        let r: PrescriptionRecord =
            serde_json::from_value(json!({ "analyzed_at": "2024-03-01T10:00:00" })).unwrap();
        assert!(r.analyzed_at.is_some());
    }

    #[test]
    fn unparseable_analyzed_at_is_none() {
        for v in [json!("yesterday"), json!(1709287200), json!(null), json!({})] {
            let r: PrescriptionRecord =
                serde_json::from_value(json!({ "analyzed_at": v, "patient_name": "Jane" })).unwrap();
            assert!(r.analyzed_at.is_none());
            assert_eq!(r.patient_name, "Jane");
        }
    }

    #[test]
    fn rfc3339_analyzed_at_round_trips() {
        let r = PrescriptionRecord {
            analyzed_at: Some(Utc::now()),
            ..Default::default()
        };
        let back: PrescriptionRecord =
            serde_json::from_value(serde_json::to_value(&r).unwrap()).unwrap();
        assert_eq!(back.analyzed_at, r.analyzed_at);
    }

    #[test]
    fn verification_status_is_lenient() {
        let parse = |v: serde_json::Value| -> VerificationStatus {
            serde_json::from_value(json!({ "verification_status": v }))
                .map(|r: PrescriptionRecord| r.verification_status)
                .unwrap()
        };
        assert_eq!(parse(json!("verified")), VerificationStatus::Verified);
        assert_eq!(parse(json!("Verified ")), VerificationStatus::Verified);
        assert_eq!(parse(json!("needs_review")), VerificationStatus::NeedsReview);
        assert_eq!(parse(json!("looks fine")), VerificationStatus::NeedsReview);
        assert_eq!(parse(json!(null)), VerificationStatus::NeedsReview);
        assert_eq!(parse(json!(true)), VerificationStatus::NeedsReview);
    }

    #[test]
    fn confidence_accepts_numeric_strings() {
        let r: PrescriptionRecord =
            serde_json::from_value(json!({ "confidence_score": " 0.92" })).unwrap();
        assert_eq!(r.confidence_score, 0.92);
        let bad = serde_json::from_value::<PrescriptionRecord>(json!({ "confidence_score": "high" }));
        assert!(bad.is_err());
    }

    #[test]
    fn accuracy_is_never_read_from_input() {
        let r: PrescriptionRecord =
            serde_json::from_value(json!({ "confidence_score": 0.5, "accuracy_percentage": 99.0 }))
                .unwrap();
        assert_eq!(r.accuracy_percentage, 0.0);
    }

    #[test]
    fn serialises_snake_case_status() {
        let r = PrescriptionRecord {
            verification_status: VerificationStatus::NeedsReview,
            ..Default::default()
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["verification_status"], "needs_review");
        assert!(v.get("accuracy_percentage").is_some());
    }

    #[test]
    fn accuracy_rounding() {
        assert_eq!(accuracy_percentage(0.0), 0.0);
        assert_eq!(accuracy_percentage(1.0), 100.0);
        assert_eq!(accuracy_percentage(0.87), 87.0);
        assert_eq!(accuracy_percentage(0.123456), 12.35);
        assert_eq!(accuracy_percentage(0.9999), 99.99);
    }
}
