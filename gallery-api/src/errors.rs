use crate::http::{ApiBody, full_body};
use http::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode};
use settings_store::{Operation, StoreError};
use thiserror::Error;

/// Errors that can occur while serving the settings API
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found")]
    NotFound,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Response serialization error: {0}")]
    ResponseSerializationError(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RequestBodyError(_) | ApiError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::InvalidPayload(_) | StoreError::InvalidProjectId(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Store(StoreError::Io { .. } | StoreError::Task(_))
            | ApiError::ResponseSerializationError(_)
            | ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned to the client. Server-side failures are reported
    /// without backend details; those only go to the log.
    fn client_message(&self) -> String {
        match self {
            ApiError::Store(StoreError::Io { operation, .. }) => match operation {
                Operation::Load => "Failed to load project settings".to_string(),
                Operation::Save => "Failed to update settings".to_string(),
            },
            ApiError::Store(StoreError::Task(_))
            | ApiError::ResponseSerializationError(_)
            | ApiError::Io(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn into_response(self) -> Response<ApiBody> {
        let body = serde_json::json!({ "error": self.client_message() }).to_string();

        let mut response = Response::new(full_body(body));
        *response.status_mut() = self.status();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}
