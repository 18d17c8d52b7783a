use crate::errors::ApiError;
use http::header::{CONTENT_TYPE, HeaderValue};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub type ApiBody = BoxBody<Bytes, ApiError>;

/// Largest request body accepted by the API.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Deserializes a JSON request body into the specified type.
pub async fn deserialize_body<T, B>(body: B) -> Result<T, ApiError>
where
    T: DeserializeOwned,
    B: Body<Data = Bytes> + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                ApiError::PayloadTooLarge(MAX_BODY_BYTES)
            } else {
                ApiError::RequestBodyError(e.to_string())
            }
        })?
        .to_bytes();

    serde_json::from_slice(&bytes).map_err(|e| ApiError::InvalidJson(e.to_string()))
}

pub fn full_body<T: Into<Bytes>>(data: T) -> ApiBody {
    Full::new(data.into()).map_err(|e| match e {}).boxed()
}

/// Serializes a value into a JSON response with the given status.
pub fn json_response<T: Serialize>(
    status: StatusCode,
    value: &T,
) -> Result<Response<ApiBody>, ApiError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| ApiError::ResponseSerializationError(e.to_string()))?;

    let mut response = Response::new(full_body(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}
