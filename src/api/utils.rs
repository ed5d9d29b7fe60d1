//! Request body helpers shared by the stream handlers

use axum::body::Body;
use axum::http::{HeaderMap, header};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde_json::Value;

use crate::api::error::ApiError;

/// Accept `application/json`, with or without parameters
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type
        .parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid Content-Type: {content_type}")))?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

pub fn require_json_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    parse_content_type(content_type)?;
    Ok(())
}

/// Collect a (possibly decompressed) request body, enforcing `max_size`
///
/// Reading stops as soon as the limit is passed, so an oversized or endless
/// body is never buffered past `max_size` bytes.
pub async fn read_body(body: Body, max_size: usize) -> Result<Bytes, ApiError> {
    let collected = Limited::new(body, max_size)
        .collect()
        .await
        .map_err(|err| {
            if err.is::<LengthLimitError>() {
                ApiError::PayloadTooLarge(max_size)
            } else {
                ApiError::InvalidPayload(format!("failed to read body: {err}"))
            }
        })?;

    Ok(collected.to_bytes())
}

/// Body of a record request: exactly one JSON value
pub async fn read_json(headers: &HeaderMap, body: Body, max_size: usize) -> Result<Value, ApiError> {
    require_json_content_type(headers)?;
    let data = read_body(body, max_size).await?;
    Ok(serde_json::from_slice(&data)?)
}

/// Body of a finalize request: empty, or a JSON object
pub async fn read_optional_object(
    headers: &HeaderMap,
    body: Body,
    max_size: usize,
) -> Result<Option<serde_json::Map<String, Value>>, ApiError> {
    let data = read_body(body, max_size).await?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    require_json_content_type(headers)?;
    match serde_json::from_slice::<Value>(&data)? {
        Value::Object(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        other => Err(ApiError::InvalidPayload(format!(
            "metadata must be a JSON object, got: {other}"
        ))),
    }
}
