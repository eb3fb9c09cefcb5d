//! Loggable value model for downstream call instrumentation.
//!
//! Request/response values are captured once at the call site into a
//! [`Loggable`] and rendered uniformly: absent values as literal `null`,
//! plain text verbatim, structured values as compact JSON. A value the
//! structural serializer cannot handle degrades to the fixed
//! [`UNSERIALIZABLE`] placeholder instead of failing the log call.

use serde::Serialize;

/// Placeholder rendered for values the structural serializer rejects.
pub const UNSERIALIZABLE: &str = "<unserializable>";

/// A value captured for structured logging.
#[derive(Debug, Clone, PartialEq)]
pub enum Loggable {
    /// No value present; renders as literal `null`.
    Absent,
    /// Plain text; renders verbatim.
    Text(String),
    /// Structured value; renders as compact JSON.
    Structured(serde_json::Value),
}

impl Loggable {
    /// Captures an arbitrary value through the structural serializer.
    ///
    /// A serialized string collapses to `Text` and a serialized null to
    /// `Absent`, so rendering matches what the value would have logged as if
    /// the call site had picked the variant itself. Serializer failure
    /// degrades to the [`UNSERIALIZABLE`] placeholder.
    #[must_use]
    pub fn capture<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(serde_json::Value::Null) => Self::Absent,
            Ok(serde_json::Value::String(text)) => Self::Text(text),
            Ok(other) => Self::Structured(other),
            Err(_) => Self::Text(UNSERIALIZABLE.to_string()),
        }
    }

    /// Renders this value for a log line.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Absent => "null".to_string(),
            Self::Text(text) => text.clone(),
            Self::Structured(value) => value.to_string(),
        }
    }
}

impl From<&str> for Loggable {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Loggable {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Absent,
            serde_json::Value::String(text) => Self::Text(text),
            other => Self::Structured(other),
        }
    }
}

/// Renders an argument list for a log line.
///
/// An empty list renders as the empty-array literal `[]`; absent entries
/// render as `null`.
#[must_use]
pub fn render_args(args: &[Loggable]) -> String {
    if args.is_empty() {
        return "[]".to_string();
    }
    let parts: Vec<String> = args.iter().map(Loggable::render).collect();
    format!("[{}]", parts.join(", "))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
