use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::header::CONTENT_TYPE,
    Json,
};
use base64::Engine;
use dx_core::{ModelMeta, ModelStatus, PredictionRequest, PredictionResult, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use crate::error::ApiError;
use crate::AppState;

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Tumor classifier API. POST an image to /predict, see /health." }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_status: ModelStatus,
    pub model_loaded: bool,
    pub degraded: bool,
    pub model_load_time_ms: Option<f64>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let model_status = state.classifier.status();
    let snapshot = state.classifier.loader().snapshot();
    Json(HealthResponse {
        status: if model_status.is_ready() { "ok" } else { "loading" }.to_string(),
        model_status,
        model_loaded: snapshot.is_some(),
        degraded: snapshot.as_ref().map(|m| m.degraded).unwrap_or(false),
        model_load_time_ms: snapshot.map(|m| m.meta().model_load_time_ms),
    })
}

pub async fn model_meta(State(state): State<Arc<AppState>>) -> Result<Json<ModelMeta>, ApiError> {
    state
        .classifier
        .model_meta()
        .map(Json)
        .ok_or_else(|| ApiError::NotReady("Model not loaded".to_string()))
}

/// JSON upload: a base64 string or a `data:` URL.
#[derive(Debug, Deserialize)]
pub struct Base64Image {
    #[serde(alias = "image_base64")]
    pub image: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl Base64Image {
    pub fn into_request(self) -> Result<PredictionRequest, ValidationError> {
        let raw = self.image.trim();
        let (url_type, payload) = match raw.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest.split_once(',').ok_or_else(|| {
                    ValidationError::InvalidBase64("data URL without ',' separator".to_string())
                })?;
                let media_type = header.split(';').next().unwrap_or_default();
                let media_type = (!media_type.is_empty()).then(|| media_type.to_string());
                (media_type, payload)
            }
            None => (None, raw),
        };

        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(ValidationError::MissingImage("empty 'image' field".to_string()));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| ValidationError::InvalidBase64(e.to_string()))?;

        Ok(PredictionRequest::new(bytes, self.content_type.or(url_type)))
    }
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: PredictionResult,
}

pub async fn predict(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<PredictResponse>, ApiError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let upload = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|r| ApiError::Rejection(r.status(), r.body_text()))?;
        read_multipart(multipart).await?
    } else {
        let Json(payload) = Json::<Base64Image>::from_request(request, &state)
            .await
            .map_err(|r| ApiError::Rejection(r.status(), r.body_text()))?;
        payload.into_request()?
    };

    let result = state.classifier.predict(upload).await?;
    Ok(Json(PredictResponse {
        success: true,
        result,
    }))
}

/// Takes the `file` field, or failing that the first field carrying a filename.
async fn read_multipart(mut multipart: Multipart) -> Result<PredictionRequest, ApiError> {
    let mut fallback = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Rejection(e.status(), e.body_text()))?
    {
        let is_file_field = field.name() == Some("file");
        let has_filename = field.file_name().is_some();
        if !is_file_field && (!has_filename || fallback.is_some()) {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Rejection(e.status(), e.body_text()))?;
        let upload = PredictionRequest::new(bytes.to_vec(), content_type);
        if is_file_field {
            return Ok(upload);
        }
        fallback = Some(upload);
    }

    fallback.ok_or_else(|| {
        ValidationError::MissingImage("expected a multipart field named 'file'".to_string()).into()
    })
}
