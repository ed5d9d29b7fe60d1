use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::stream::StreamError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("payload exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("stream cannot be finalized: {0}")]
    Unprocessable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Unprocessable(_) => "UNPROCESSABLE_STREAM",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::InvalidKey(_)
            | StreamError::InvalidRecord(_)
            | StreamError::MissingRecordId { .. }
            | StreamError::Serialization(_) => ApiError::InvalidPayload(err.to_string()),
            StreamError::StreamNotFound(key) => ApiError::NotFound(format!("stream {key}")),
            StreamError::Parse { .. } => ApiError::Unprocessable(err.to_string()),
            StreamError::Io(_)
            | StreamError::TaskPanicked(_)
            | StreamError::ChainClosed(_)
            | StreamError::Closed => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_errors_map_to_status_codes() {
        let cases = [
            (StreamError::InvalidKey("a/b".into()), StatusCode::BAD_REQUEST),
            (
                StreamError::MissingRecordId { field: "id".into() },
                StatusCode::BAD_REQUEST,
            ),
            (StreamError::StreamNotFound("s".into()), StatusCode::NOT_FOUND),
            (StreamError::Closed, StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_parse_failure_is_unprocessable() {
        let source = serde_json::from_str::<serde_json::Value>("{broken").unwrap_err();
        let err = ApiError::from(StreamError::Parse {
            key: "s".into(),
            line: 2,
            source,
        });

        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "UNPROCESSABLE_STREAM");
    }
}
