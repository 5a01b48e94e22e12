//! Maps provider HTTP statuses, error bodies and transport failures onto [`ErrorKind`].

use super::{ErrorKind, ProviderError};

const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "quota",
    "too many requests",
    "resource exhausted",
    "resource_exhausted",
];

const MODEL_UNAVAILABLE_MARKERS: &[&str] = &[
    "model not found",
    "model_not_found",
    "does not exist",
    "decommissioned",
    "no longer supported",
];

/// Classify a message by keyword alone. `None` when nothing matches.
pub fn classify_message(message: &str) -> Option<ErrorKind> {
    let lower = message.to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        Some(ErrorKind::RateLimited)
    } else if MODEL_UNAVAILABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        Some(ErrorKind::ModelUnavailable)
    } else {
        None
    }
}

/// Classify a non-success HTTP response.
///
/// Rate limiting wins over everything else because some providers report quota exhaustion with
/// 400 or 403.
pub fn classify_status(status: u16, body: &str) -> ErrorKind {
    if status == 429 {
        return ErrorKind::RateLimited;
    }
    if let Some(kind) = classify_message(body) {
        return kind;
    }
    match status {
        404 => ErrorKind::ModelUnavailable,
        401 | 403 => ErrorKind::Fatal,
        500..=599 => ErrorKind::Transient,
        400..=499 => ErrorKind::Fatal,
        _ => ErrorKind::Transient,
    }
}

/// Build the error for a non-success HTTP response, truncating large bodies.
pub fn http_error(provider: &str, status: u16, body: &str) -> ProviderError {
    let kind = classify_status(status, body);
    let snippet: String = body.chars().take(300).collect();
    ProviderError::new(kind, format!("{provider} returned HTTP {status}: {snippet}"))
}

/// Transport failures never reached the model, so they are always worth retrying.
pub fn transport_error(provider: &str, err: &reqwest::Error) -> ProviderError {
    let what = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    ProviderError::transient(format!("{provider} {what}: {err}"))
}
