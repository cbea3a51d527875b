use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use base64::Engine;
use dx_core::{LoaderConfig, ServerConfig, ValidationLimits};
use dx_inference::testing::{encode_image, fast_config, MockSource, ScriptedBackend, MOCK_MODEL};
use dx_inference::{ArtifactSource, Classifier, InterpreterBackend, ModelLoader, OutputTensor};
use dx_web::{create_app, AppState};
use image::ImageFormat;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "dx-test-boundary";

fn app_with(source: &Arc<MockSource>, backend: &Arc<ScriptedBackend>, config: LoaderConfig) -> Router {
    let loader = ModelLoader::new(
        Arc::clone(source) as Arc<dyn ArtifactSource>,
        Arc::clone(backend) as Arc<dyn InterpreterBackend>,
        config,
    );
    let classifier = Classifier::new(Arc::new(loader), ValidationLimits::default());
    create_app(AppState::new(Arc::new(classifier)), &ServerConfig::default())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_predict(payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn multipart_predict(field: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"scan\"\r\nContent-Type: {}\r\n\r\n",
            field, content_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn png_base64(width: u32, height: u32) -> String {
    let png = encode_image(width, height, ImageFormat::Png, [200, 30, 30]);
    base64::engine::general_purpose::STANDARD.encode(png)
}

#[tokio::test]
async fn test_root_and_health_before_load() {
    let source = Arc::new(MockSource::new());
    let backend = Arc::new(ScriptedBackend::two_class([0.2, 0.8]));
    let app = app_with(&source, &backend, fast_config());

    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("/predict"));

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "loading");
    assert_eq!(body["model_status"], "unloaded");
    assert_eq!(body["model_loaded"], false);

    // Health checks never trigger a load.
    assert_eq!(source.fetch_count(MOCK_MODEL), 0);
}

#[tokio::test]
async fn test_model_meta_unavailable_until_loaded() {
    let source = Arc::new(MockSource::new());
    let backend = Arc::new(ScriptedBackend::two_class([0.2, 0.8]));
    let app = app_with(&source, &backend, fast_config());

    let (status, body) = send(&app, get("/debug/model_meta")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["detail"], "Model not loaded");

    let (status, _) = send(&app, json_predict(json!({ "image": png_base64(64, 64) }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get("/debug/model_meta")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["labels"], json!(["No Tumor", "Tumor"]));
    assert_eq!(body["threshold"], 0.5);
    assert_eq!(body["backend"], "scripted");
    assert_eq!(body["sha256"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_base64_predict() {
    let source = Arc::new(MockSource::new());
    let backend = Arc::new(ScriptedBackend::two_class([0.2, 0.8]));
    let app = app_with(&source, &backend, fast_config());

    let (status, body) = send(&app, json_predict(json!({ "image": png_base64(64, 64) }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["prediction"], "Tumor");
    assert_eq!(body["confidence"], 0.8);
    assert_eq!(body["labels"], json!(["No Tumor", "Tumor"]));
    assert_eq!(body["degraded"], false);
    assert!(body["processing_times"]["total_ms"].is_number());

    let (_, health) = send(&app, get("/health")).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["model_loaded"], true);
}

#[tokio::test]
async fn test_data_url_predict() {
    let source = Arc::new(MockSource::new());
    let backend = Arc::new(ScriptedBackend::scalar(0.3));
    let app = app_with(&source, &backend, fast_config());

    let data_url = format!("data:image/png;base64,{}", png_base64(48, 48));
    let (status, body) = send(&app, json_predict(json!({ "image_base64": data_url }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], "No Tumor");
    assert_eq!(body["confidence"], 0.7);
}

#[tokio::test]
async fn test_multipart_predict() {
    let source = Arc::new(MockSource::new());
    let backend = Arc::new(ScriptedBackend::two_class([0.9, 0.1]));
    let app = app_with(&source, &backend, fast_config());

    let jpeg = encode_image(128, 96, ImageFormat::Jpeg, [90, 90, 90]);
    let (status, body) = send(&app, multipart_predict("file", "image/jpeg", &jpeg)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], "No Tumor");
    assert_eq!(body["confidence"], 0.9);
    assert_eq!(backend.invocation_count(), 1);
}

#[tokio::test]
async fn test_unsupported_content_type_is_rejected() {
    let source = Arc::new(MockSource::new());
    let backend = Arc::new(ScriptedBackend::two_class([0.2, 0.8]));
    let app = app_with(&source, &backend, fast_config());

    let (status, body) = send(&app, multipart_predict("file", "application/pdf", b"%PDF-1.4")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("application/pdf"));
    assert_eq!(source.fetch_count(MOCK_MODEL), 0);
}

#[tokio::test]
async fn test_missing_file_field() {
    let source = Arc::new(MockSource::new());
    let backend = Arc::new(ScriptedBackend::two_class([0.2, 0.8]));
    let app = app_with(&source, &backend, fast_config());

    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tiny_image_is_rejected() {
    let source = Arc::new(MockSource::new());
    let backend = Arc::new(ScriptedBackend::two_class([0.2, 0.8]));
    let app = app_with(&source, &backend, fast_config());

    let (status, body) = send(&app, json_predict(json!({ "image": png_base64(1, 1) }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(backend.invocation_count(), 0);
}

#[tokio::test]
async fn test_malformed_base64_is_rejected() {
    let source = Arc::new(MockSource::new());
    let backend = Arc::new(ScriptedBackend::two_class([0.2, 0.8]));
    let app = app_with(&source, &backend, fast_config());

    let (status, _) = send(&app, json_predict(json!({ "image": "%%%not base64%%%" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, json_predict(json!({ "picture": png_base64(64, 64) }))).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_load_failure_is_service_unavailable() {
    let source = Arc::new(MockSource::new().failing(u32::MAX));
    let backend = Arc::new(ScriptedBackend::two_class([0.2, 0.8]));
    let app = app_with(&source, &backend, fast_config());

    let (status, body) = send(&app, json_predict(json!({ "image": png_base64(64, 64) }))).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].as_str().unwrap().starts_with("Model not ready"));

    let (_, health) = send(&app, get("/health")).await;
    assert_eq!(health["model_status"], "failed");
}

#[tokio::test]
async fn test_unexpected_output_is_internal_error() {
    let source = Arc::new(MockSource::new());
    let backend = Arc::new(ScriptedBackend::new(OutputTensor::new(vec![1, 5], vec![0.2; 5])));
    let app = app_with(&source, &backend, fast_config());

    let (status, _) = send(&app, json_predict(json!({ "image": png_base64(64, 64) }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (_, health) = send(&app, get("/health")).await;
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn test_body_beyond_transport_limit() {
    let source = Arc::new(MockSource::new());
    let backend = Arc::new(ScriptedBackend::two_class([0.2, 0.8]));
    let app = app_with(&source, &backend, fast_config());

    let huge = "A".repeat(dx_web::body_limit(&ValidationLimits::default()) + 1);
    let (status, _) = send(&app, json_predict(json!({ "image": huge }))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
