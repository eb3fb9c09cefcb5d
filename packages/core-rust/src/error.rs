//! Failure taxonomy and root-cause resolution for downstream calls.
//!
//! Failures cross layer boundaries as boxed error chains ([`BoxError`]).
//! The instrumentation layers never inspect intermediate wrappers; they walk
//! the chain to its origin with [`root_cause`] and classify that terminal
//! failure. Cause chains are assumed acyclic -- this is a documented
//! assumption, not something enforced at runtime.

use std::error::Error as StdError;

use thiserror::Error;

/// Boxed error chain, the common failure currency between layers.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Failure raised by an outbound call to another service.
///
/// Carries the downstream HTTP status where one is known so fallback
/// instrumentation can tag metrics with it. `BadRequest` is the one
/// designated client-fault kind: it is the only kind the inbound boundary
/// maps to a 400 response.
#[derive(Debug, Error)]
pub enum DownstreamError {
    /// The downstream rejected the request as malformed (4xx).
    #[error("downstream rejected request ({status}): {message}")]
    BadRequest {
        /// HTTP status returned by the downstream.
        status: u16,
        /// Response body or reason reported by the downstream.
        message: String,
    },
    /// The downstream failed internally (5xx), or the transport failed.
    #[error("downstream call failed ({status}): {message}")]
    Upstream {
        /// HTTP status returned by the downstream.
        status: u16,
        /// Response body or reason reported by the downstream.
        message: String,
    },
    /// Transient HTTP failure eligible for retry by a resilience layer.
    #[error("retryable downstream failure ({status})")]
    Retryable {
        /// HTTP status returned by the downstream.
        status: u16,
        /// Raw response body, preserved for the retry decision.
        body: String,
    },
    /// The downstream response body could not be decoded.
    #[error("malformed downstream response: {message}")]
    Decode {
        /// Decoder error message.
        message: String,
    },
}

impl DownstreamError {
    /// Structured HTTP status carried by this failure, when known.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::BadRequest { status, .. }
            | Self::Upstream { status, .. }
            | Self::Retryable { status, .. } => Some(*status),
            Self::Decode { .. } => None,
        }
    }

    /// True for the designated client-fault kind.
    #[must_use]
    pub fn is_client_fault(&self) -> bool {
        matches!(self, Self::BadRequest { .. })
    }

    /// Short kind name used as a metric tag value.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "BadRequest",
            Self::Upstream { .. } => "Upstream",
            Self::Retryable { .. } => "Retryable",
            Self::Decode { .. } => "Decode",
        }
    }
}

/// Follows the cause chain from `err` to the deepest failure with no further
/// source, returning that terminal failure.
///
/// Pure and idempotent: a failure with no cause resolves to itself.
#[must_use]
pub fn root_cause<'a>(err: &'a (dyn StdError + 'static)) -> &'a (dyn StdError + 'static) {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current
}

/// Structured status of the root cause, when the root cause carries one.
#[must_use]
pub fn downstream_status(err: &(dyn StdError + 'static)) -> Option<u16> {
    root_cause(err)
        .downcast_ref::<DownstreamError>()
        .and_then(DownstreamError::status)
}

/// Short classification label for a failure, used as a metric tag value.
///
/// Downstream failures report their kind name; everything else collapses to
/// `"Unclassified"` -- metric tag cardinality stays bounded that way.
#[must_use]
pub fn kind_label(err: &(dyn StdError + 'static)) -> &'static str {
    match err.downcast_ref::<DownstreamError>() {
        Some(downstream) => downstream.kind_name(),
        None => "Unclassified",
    }
}

/// Renders the full cause chain for error logs.
///
/// Log-only: this string never appears in an HTTP response body.
#[must_use]
pub fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err;
    while let Some(source) = current.source() {
        rendered.push_str("; caused by: ");
        rendered.push_str(&source.to_string());
        current = source;
    }
    rendered
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
