//! Error classification for Etsy API responses
//!
//! Maps non-success statuses to typed errors with a human-readable,
//! status-specific prefix. 403 bodies mentioning a missing scope get
//! their own variant so callers can steer the user toward reconnecting
//! with the full scope list. 429 never reaches here — the pipeline
//! handles it with sleep-and-retry.

use crate::error::Error;

/// Classify a non-429, non-success response into a typed error.
pub fn classify_response(status: u16, body: &str) -> Error {
    let message = error_detail(status, body);
    match status {
        400 => Error::BadRequest(message),
        401 => Error::Unauthorized(message),
        403 if message.contains("insufficient_scope") => Error::InsufficientScope(message),
        403 => Error::Forbidden(message),
        404 => Error::NotFound(message),
        _ => Error::Api { status, message },
    }
}

/// Extract `error`/`error_description` from a JSON error body, falling
/// back to the raw response text.
fn error_detail(status: u16, body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        let error = v.get("error").and_then(|e| e.as_str());
        let description = v.get("error_description").and_then(|d| d.as_str());
        match (error, description) {
            (Some(e), Some(d)) if !d.is_empty() => return format!("{e}: {d}"),
            (Some(e), _) => return e.to_string(),
            _ => {}
        }
    }
    format!("HTTP {status}: {body}")
}
