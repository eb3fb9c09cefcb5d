//! HTTP response shapes: the caller-facing error body and downstream
//! response classification.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::DownstreamError;

/// JSON error body returned to HTTP callers: `{status, error, message}`.
///
/// Every failure path yields this shape. The `message` is the classified
/// failure's public message -- never a cause chain, never an internal type
/// name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Numeric HTTP status, duplicated in the body for log scrapers.
    pub status: u16,
    /// Reason phrase for the status.
    pub error: String,
    /// Human-readable failure message.
    pub message: String,
}

impl ErrorBody {
    /// Builds an error body from status, reason phrase, and message.
    #[must_use]
    pub fn new(status: u16, reason: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            error: reason.to_string(),
            message: message.into(),
        }
    }
}

fn is_2xx(status: u16) -> bool {
    (200..300).contains(&status)
}

fn is_4xx(status: u16) -> bool {
    (400..500).contains(&status)
}

/// Classifies a downstream HTTP response into a typed value or a
/// [`DownstreamError`].
///
/// 2xx parses the body (an empty body yields `None`); 4xx raises the
/// client-fault kind carrying the body as its message; anything else raises
/// `Upstream`.
///
/// # Errors
///
/// `BadRequest` for 4xx statuses, `Upstream` for everything outside 2xx/4xx,
/// `Decode` when a 2xx body fails to parse.
pub fn classify_response<T: DeserializeOwned>(
    status: u16,
    body: &str,
) -> Result<Option<T>, DownstreamError> {
    if is_2xx(status) {
        parse_body(body)
    } else if is_4xx(status) {
        Err(DownstreamError::BadRequest {
            status,
            message: body.to_string(),
        })
    } else {
        Err(DownstreamError::Upstream {
            status,
            message: body.to_string(),
        })
    }
}

/// Lenient variant of [`classify_response`]: 4xx bodies are parsed like 2xx
/// bodies instead of raised, for downstreams that return structured error
/// payloads the caller wants to inspect.
///
/// # Errors
///
/// `Upstream` for statuses outside 2xx/4xx, `Decode` when the body fails to
/// parse.
pub fn classify_response_lenient<T: DeserializeOwned>(
    status: u16,
    body: &str,
) -> Result<Option<T>, DownstreamError> {
    if is_2xx(status) || is_4xx(status) {
        parse_body(body)
    } else {
        Err(DownstreamError::Upstream {
            status,
            message: body.to_string(),
        })
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<Option<T>, DownstreamError> {
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|err| DownstreamError::Decode {
            message: err.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
