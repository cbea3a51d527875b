use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dx_core::{Error, ValidationError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] Error),

    #[error("{1}")]
    Rejection(StatusCode, String),

    #[error("{0}")]
    NotReady(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Service(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Service(Error::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Service(Error::Load(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Rejection(status, _) => *status,
            ApiError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.to_string();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", detail);
        } else {
            tracing::debug!(status = status.as_u16(), "{}", detail);
        }
        (status, Json(json!({ "success": false, "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dx_core::{InferenceError, LoadError};

    #[test]
    fn test_status_mapping() {
        let validation: ApiError = ValidationError::EmptyFile.into();
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);

        let load = ApiError::Service(LoadError::Timeout(std::time::Duration::from_secs(1)).into());
        assert_eq!(load.status(), StatusCode::SERVICE_UNAVAILABLE);

        let inference = ApiError::Service(InferenceError::UnexpectedOutputShape(vec![1, 3]).into());
        assert_eq!(inference.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let rejection = ApiError::Rejection(StatusCode::PAYLOAD_TOO_LARGE, "too big".to_string());
        assert_eq!(rejection.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(rejection.to_string(), "too big");
    }
}
