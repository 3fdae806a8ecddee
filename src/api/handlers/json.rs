//! Strict JSON request bodies: at most 1 MiB, exactly one object, no unknown
//! fields, and a readable reason when any of that is violated.

use crate::error::{Error, Result};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit},
    http::StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::error::Category;

pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Layer capping request bodies read through [`decode`].
#[must_use]
pub fn body_limit() -> DefaultBodyLimit {
    DefaultBodyLimit::max(MAX_BODY_BYTES)
}

/// Decode a buffered request body into `T`.
///
/// # Errors
/// Returns `MalformedInput` (413 for oversized bodies, 400 otherwise).
pub fn decode<T: DeserializeOwned>(body: Result<Bytes, BytesRejection>) -> Result<T> {
    let bytes = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::MalformedInput {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                message: "request body is larger than maximum size of 1MB".to_string(),
            }
        } else {
            Error::malformed(rejection.body_text())
        }
    })?;

    decode_slice(&bytes)
}

fn decode_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::malformed("request body cannot be empty"));
    }

    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    let value = T::deserialize(&mut deserializer).map_err(|e| describe(bytes, &e))?;

    deserializer
        .end()
        .map_err(|_| Error::malformed("only one JSON object is allowed in the request body"))?;

    Ok(value)
}

fn describe(bytes: &[u8], err: &serde_json::Error) -> Error {
    let position = position(bytes, err.line(), err.column());

    let message = match err.classify() {
        Category::Syntax => format!("request body contains invalid JSON at position {position}"),
        Category::Eof | Category::Io => "request body contains invalid JSON".to_string(),
        Category::Data => {
            let text = err.to_string();
            match unknown_field(&text) {
                Some(name) => format!("request body contains unknown field \"{name}\""),
                None => format!("request body contains an invalid value at position {position}"),
            }
        }
    };

    Error::malformed(message)
}

// serde_json's message reads "unknown field `name`, expected ..."
fn unknown_field(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("unknown field `")?;
    rest.split('`').next()
}

/// Byte offset of a 1-based line/column pair.
fn position(bytes: &[u8], line: usize, column: usize) -> usize {
    let line_start: usize = bytes
        .split(|b| *b == b'\n')
        .take(line.saturating_sub(1))
        .map(|l| l.len() + 1)
        .sum();
    line_start + column
}
