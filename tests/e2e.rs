//! End-to-end tests for the rxread HTTP service.
//!
//! Most tests drive the real axum router in-process with a stub extractor, so
//! they exercise multipart parsing, image preparation, normalisation,
//! validation and the error mapping without network access.
//!
//! The live Gemini test is gated behind the `E2E_ENABLED` environment
//! variable (and needs `GOOGLE_API_KEY`) so it does not run in CI unless
//! explicitly requested.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture
//!
//! Live test:
//!   E2E_ENABLED=1 GOOGLE_API_KEY=... cargo test --test e2e live -- --nocapture

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rxread::{
    router, validate, AnalysisError, Analyzer, AnalyzerConfig, AppState, PreparedImage,
    PrescriptionExtractor, PrescriptionRecord, RawExtraction, VerificationStatus,
};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

const BOUNDARY: &str = "rxread-test-boundary";

/// Replays a canned model answer and counts calls.
struct StubExtractor {
    answer: Result<String, String>,
    calls: AtomicUsize,
}

impl StubExtractor {
    fn answering(text: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PrescriptionExtractor for StubExtractor {
    fn model(&self) -> &str {
        "stub-vision-1"
    }

    async fn extract(&self, image: &PreparedImage, prompt: &str) -> Result<RawExtraction, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(!image.data.is_empty());
        assert!(prompt.contains("medications"));
        match &self.answer {
            Ok(text) => Ok(RawExtraction::new(text.clone())),
            Err(message) => Err(AnalysisError::UpstreamError {
                message: message.clone(),
            }),
        }
    }
}

/// Route library logs to the test harness. `RUST_LOG=rxread=debug` shows the
/// pipeline steps under `--nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

fn app_with(stub: Arc<StubExtractor>) -> Router {
    init_tracing();
    let analyzer = Analyzer::with_extractor(AnalyzerConfig::default(), stub);
    router(AppState::new(analyzer))
}

fn sample_png() -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 32, |x, _| {
        if x % 8 == 0 {
            Rgb([20, 20, 20])
        } else {
            Rgb([245, 245, 240])
        }
    }));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("png encode");
    buf
}

/// Build a multipart body with one file part.
fn multipart_request(field: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"rx.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/analyze")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request")
}

fn json_request(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.expect("router never fails");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

const FENCED_ANSWER: &str = "```json\n{\n  \"patient_name\": \"Jane Doe\",\n  \"doctor_name\": \"Dr. X\",\n  \"date\": \"2024-03-01\",\n  \"medications\": [{\"name\": \"Amoxicillin\", \"dosage\": \"500 mg\", \"frequency\": \"3x daily\", \"duration\": \"7 days\"}],\n  \"special_instructions\": \"Take with food\",\n  \"warnings\": [],\n  \"verification_status\": \"verified\",\n  \"confidence_score\": 0.92\n}\n```";

// ── /health ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let req = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = send(app_with(StubExtractor::answering("{}")), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model"], "stub-vision-1");
    let ts = body["timestamp"].as_str().expect("timestamp");
    assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok(), "{ts}");
}

// ── /analyze ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_analyze_returns_normalised_record() {
    let stub = StubExtractor::answering(FENCED_ANSWER);
    let (status, body) = send(app_with(stub.clone()), multipart_request("image", &sample_png())).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    assert_eq!(body["patient_name"], "Jane Doe");
    assert_eq!(body["medications"][0]["name"], "Amoxicillin");
    assert_eq!(body["verification_status"], "verified");
    assert_eq!(body["model_version"], "stub-vision-1");
    assert_eq!(body["accuracy_percentage"], 92.0);
    assert!(body["analyzed_at"].as_str().is_some());

    // The response is itself a valid /validate input.
    let record: PrescriptionRecord = serde_json::from_value(body).expect("record");
    assert_eq!(record.verification_status, VerificationStatus::Verified);
    let verdict = validate(&record);
    assert!(verdict.is_valid);
    assert!(verdict.warnings.is_empty(), "{:?}", verdict.warnings);
}

#[tokio::test]
async fn test_analyze_without_image_field() {
    let stub = StubExtractor::answering("{}");
    let (status, body) = send(app_with(stub.clone()), multipart_request("file", &sample_png())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "No image file provided"}));
    assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_analyze_rejects_undecodable_image() {
    let stub = StubExtractor::answering("{}");
    let (status, body) = send(app_with(stub.clone()), multipart_request("image", b"%PDF-1.7 nope")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid image file");
    assert!(body["details"].as_str().is_some());
    assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_analyze_rejects_empty_image() {
    let (status, body) = send(
        app_with(StubExtractor::answering("{}")),
        multipart_request("image", b""),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid image file");
}

#[tokio::test]
async fn test_analyze_surfaces_unparseable_answer() {
    let answer = "I'm sorry, the handwriting is illegible.";
    let (status, body) = send(
        app_with(StubExtractor::answering(answer)),
        multipart_request("image", &sample_png()),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to parse response");
    assert_eq!(body["raw_response"], answer);
    assert!(body["details"].as_str().is_some());
}

#[tokio::test]
async fn test_analyze_surfaces_upstream_failure() {
    let (status, body) = send(
        app_with(StubExtractor::failing("HTTP 503: model overloaded")),
        multipart_request("image", &sample_png()),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to analyze prescription");
    assert!(body["details"]
        .as_str()
        .is_some_and(|d| d.contains("model overloaded")));
    assert!(body.get("raw_response").is_none());
}

#[tokio::test]
async fn test_analyze_empty_fenced_record() {
    let (status, body) = send(
        app_with(StubExtractor::answering(
            "```json\n{\"patient_name\":\"\",\"medications\":[]}\n```",
        )),
        multipart_request("image", &sample_png()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["patient_name"], "");
    assert_eq!(body["medications"], json!([]));
    assert_eq!(body["confidence_score"], 0.0);
    assert_eq!(body["accuracy_percentage"], 0.0);
    assert_eq!(body["verification_status"], "needs_review");
}

// ── /validate ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_validate_low_confidence_missing_dosage() {
    let record = json!({
        "patient_name": "Jane",
        "doctor_name": "Dr. X",
        "medications": [{"name": "Amoxicillin", "dosage": ""}],
        "confidence_score": 0.5
    });
    let (status, body) = send(
        app_with(StubExtractor::answering("{}")),
        json_request("/validate", &record.to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "is_valid": true,
            "warnings": [
                "Dosage missing for Amoxicillin",
                "Low confidence score - manual review recommended"
            ],
            "errors": []
        })
    );
}

#[tokio::test]
async fn test_validate_no_medications() {
    let record = json!({
        "patient_name": "Jane",
        "doctor_name": "Dr. X",
        "medications": [],
        "confidence_score": 0.95
    });
    let (status, body) = send(
        app_with(StubExtractor::answering("{}")),
        json_request("/validate", &record.to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_valid"], false);
    assert_eq!(body["errors"], json!(["No medications found"]));
    assert_eq!(body["warnings"], json!([]));
}

#[tokio::test]
async fn test_validate_tolerates_nulls() {
    let (status, body) = send(
        app_with(StubExtractor::answering("{}")),
        json_request(
            "/validate",
            r#"{"patient_name": null, "medications": [{"name": "Aspirin", "dosage": null}], "confidence_score": "0.9"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["is_valid"], true);
    assert_eq!(
        body["warnings"],
        json!([
            "Patient name is missing",
            "Doctor name is missing",
            "Dosage missing for Aspirin"
        ])
    );
}

#[tokio::test]
async fn test_validate_coerces_numeric_dosage() {
    let record = json!({
        "patient_name": "Jane",
        "doctor_name": "Dr. X",
        "medications": [{"name": "Aspirin", "dosage": 81}],
        "confidence_score": 0.9
    });
    let (status, body) = send(
        app_with(StubExtractor::answering("{}")),
        json_request("/validate", &record.to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body, json!({"is_valid": true, "warnings": [], "errors": []}));
}

#[tokio::test]
async fn test_validate_accepts_string_warnings() {
    let record = json!({
        "patient_name": "Jane",
        "doctor_name": "Dr. X",
        "medications": [{"name": "Aspirin", "dosage": "81 mg"}],
        "warnings": "None",
        "confidence_score": 0.9
    });
    let (status, body) = send(
        app_with(StubExtractor::answering("{}")),
        json_request("/validate", &record.to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["is_valid"], true);
}

#[tokio::test]
async fn test_validate_accepts_offsetless_timestamp() {
    for analyzed_at in ["2024-03-01T10:00:00.123456", "not a date"] {
        let record = json!({
            "patient_name": "Jane",
            "doctor_name": "Dr. X",
            "medications": [{"name": "Aspirin", "dosage": "81 mg"}],
            "confidence_score": 0.9,
            "analyzed_at": analyzed_at
        });
        let (status, body) = send(
            app_with(StubExtractor::answering("{}")),
            json_request("/validate", &record.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{analyzed_at}: {body}");
        assert_eq!(body["is_valid"], true);
    }
}

#[tokio::test]
async fn test_analyze_coerces_wrong_typed_fields() {
    let answer = r#"{"patient_name": "Jane", "doctor_name": "Dr. X", "medications": [{"name": "Aspirin", "dosage": 81}], "warnings": "None", "confidence_score": 0.9}"#;
    let (status, body) = send(
        app_with(StubExtractor::answering(answer)),
        multipart_request("image", &sample_png()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["medications"][0]["dosage"], "81");
    assert_eq!(body["warnings"], json!(["None"]));
}

#[tokio::test]
async fn test_validate_rejects_garbage() {
    let (status, body) = send(
        app_with(StubExtractor::answering("{}")),
        json_request("/validate", "[1, 2"),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Validation failed");
    assert!(body["details"].as_str().is_some());
}

#[test]
fn test_analyze_file_outside_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rx.png");
    std::fs::write(&path, sample_png()).unwrap();

    let analyzer = Analyzer::with_extractor(
        AnalyzerConfig::default(),
        StubExtractor::answering(FENCED_ANSWER),
    );
    let record = tokio_test::block_on(analyzer.analyze_file(&path)).expect("analysis");
    assert_eq!(record.doctor_name, "Dr. X");
}

// ── Live ─────────────────────────────────────────────────────────────────────

/// Sends a synthetic image to the real Gemini endpoint. The image carries no
/// prescription, so this checks the round trip rather than extraction quality.
#[tokio::test]
async fn test_live_gemini_round_trip() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let Ok(key) = std::env::var("GOOGLE_API_KEY") else {
        println!("SKIP: GOOGLE_API_KEY not set");
        return;
    };
    init_tracing();

    let config = AnalyzerConfig::builder()
        .api_key(key)
        .build()
        .expect("config");
    let analyzer = Analyzer::new(config).expect("analyzer");

    match analyzer.analyze(&sample_png()).await {
        Ok(record) => {
            println!("{}", serde_json::to_string_pretty(&record).unwrap());
            assert_eq!(record.model_version, "gemini-1.5-flash");
            assert!((0.0..=1.0).contains(&record.confidence_score));
        }
        Err(AnalysisError::Malformed(e)) => {
            println!("Model answered with prose: {}", e.raw());
        }
        Err(e) => panic!("live call failed: {e}"),
    }
}
