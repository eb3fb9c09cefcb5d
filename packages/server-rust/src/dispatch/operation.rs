//! Operation model: dispatch requests, erased operation handles, and the
//! dispatch failure taxonomy.
//!
//! Handlers register statically-typed closures; the registry erases them
//! behind a coercion step (untyped payload -> declared input type) and an
//! invocation step (typed input -> immediate value or deferred handle).
//! Coercion failure is distinguishable from invocation failure so the
//! boundary can classify it before the operation ever runs.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;

use switchboard_core::{root_cause, BoxError, DownstreamError};

/// Process-wide dispatch call counter for log correlation.
static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// One dispatch call: handler key, operation name, untyped payload.
///
/// Transient; exactly one outcome is produced per request.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Stable key of the registered handler.
    pub handler: String,
    /// Name of the operation on that handler.
    pub operation: String,
    /// Untyped key-value payload, coerced into the operation's input type.
    pub payload: serde_json::Map<String, Value>,
    /// Process-unique identifier for correlating log lines of this call.
    pub call_id: u64,
}

impl DispatchRequest {
    /// Builds a request with a freshly assigned call id.
    #[must_use]
    pub fn new(
        handler: impl Into<String>,
        operation: impl Into<String>,
        payload: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            handler: handler.into(),
            operation: operation.into(),
            payload,
            call_id: NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// Marker for how an operation produces its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// The value is produced synchronously by the invocation.
    Blocking,
    /// The invocation hands back a deferred handle that settles later.
    Deferred,
}

/// Failure reported from inside an operation body.
///
/// Carries an optional cause so deferred operations can attach the failure
/// that actually triggered them. The dispatch boundary unwraps exactly one
/// level: the attached cause when present, otherwise the failure itself.
#[derive(Debug, Error)]
#[error("{context}")]
pub struct OperationFailure {
    context: String,
    #[source]
    source: Option<BoxError>,
}

impl OperationFailure {
    /// A failure with a message and no cause.
    #[must_use]
    pub fn message(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            source: None,
        }
    }

    /// A failure with an explicit message and an attached cause.
    #[must_use]
    pub fn caused_by(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    /// Wraps a triggering error, reusing its rendering as the message.
    #[must_use]
    pub fn wrap(source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self {
            context: source.to_string(),
            source: Some(source),
        }
    }

    /// Unwraps the wrapper one level: the attached cause when present,
    /// otherwise the failure itself.
    pub(crate) fn into_cause(self) -> BoxError {
        match self.source {
            Some(cause) => cause,
            None => Box::new(Self {
                context: self.context,
                source: None,
            }),
        }
    }
}

/// Payload shape mismatch raised before invocation.
#[derive(Debug, Error)]
#[error("cannot convert payload into {target}: {message}")]
pub struct CoerceError {
    /// Name of the operation's declared input type.
    pub target: &'static str,
    /// Structural converter error message.
    pub message: String,
}

/// Raw result of invoking an operation.
#[derive(Debug)]
pub enum OperationOutput {
    /// The operation produced its value (or failure) synchronously.
    Ready(Result<Value, OperationFailure>),
    /// The operation handed back a deferred handle settling later.
    Deferred(JoinHandle<Result<Value, OperationFailure>>),
}

type CoerceFn = Box<dyn Fn(Value) -> Result<Box<dyn Any + Send>, CoerceError> + Send + Sync>;
type InvokeFn = Box<dyn Fn(Box<dyn Any + Send>) -> OperationOutput + Send + Sync>;

/// One registered operation: identity, declared input type, and the erased
/// coerce/invoke steps. Immutable once built.
pub struct OperationHandle {
    handler_key: String,
    name: String,
    input_type: &'static str,
    kind: OperationKind,
    coerce: CoerceFn,
    invoke: InvokeFn,
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("handler_key", &self.handler_key)
            .field("name", &self.name)
            .field("input_type", &self.input_type)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl OperationHandle {
    /// Builds a handle for a synchronous operation.
    pub(crate) fn blocking<I, O, F>(handler_key: &str, name: &str, op: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I) -> Result<O, OperationFailure> + Send + Sync + 'static,
    {
        Self {
            handler_key: handler_key.to_string(),
            name: name.to_string(),
            input_type: std::any::type_name::<I>(),
            kind: OperationKind::Blocking,
            coerce: Box::new(coerce_into::<I>),
            invoke: Box::new(move |argument| {
                let result = downcast_argument::<I>(argument)
                    .and_then(|input| op(input))
                    .and_then(|output| serialize_output(&output));
                OperationOutput::Ready(result)
            }),
        }
    }

    /// Builds a handle for an operation that settles through a deferred
    /// handle. Invocation spawns the future onto the runtime.
    pub(crate) fn deferred<I, O, F, Fut>(handler_key: &str, name: &str, op: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, OperationFailure>> + Send + 'static,
    {
        Self {
            handler_key: handler_key.to_string(),
            name: name.to_string(),
            input_type: std::any::type_name::<I>(),
            kind: OperationKind::Deferred,
            coerce: Box::new(coerce_into::<I>),
            invoke: Box::new(move |argument| match downcast_argument::<I>(argument) {
                Ok(input) => {
                    let fut = op(input);
                    OperationOutput::Deferred(tokio::spawn(async move {
                        let output = fut.await?;
                        serialize_output(&output)
                    }))
                }
                Err(failure) => OperationOutput::Ready(Err(failure)),
            }),
        }
    }

    /// Key of the owning handler.
    #[must_use]
    pub fn handler_key(&self) -> &str {
        &self.handler_key
    }

    /// Operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the declared input type, captured at registration.
    #[must_use]
    pub fn input_type(&self) -> &'static str {
        self.input_type
    }

    /// Whether the result is produced synchronously or deferred.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Coerces the untyped payload into the declared input type.
    pub(crate) fn coerce(&self, payload: Value) -> Result<Box<dyn Any + Send>, CoerceError> {
        (self.coerce)(payload)
    }

    /// Invokes the operation with a previously coerced argument.
    pub(crate) fn invoke(&self, argument: Box<dyn Any + Send>) -> OperationOutput {
        (self.invoke)(argument)
    }
}

fn coerce_into<I>(payload: Value) -> Result<Box<dyn Any + Send>, CoerceError>
where
    I: DeserializeOwned + Send + 'static,
{
    serde_json::from_value::<I>(payload)
        .map(|input| Box::new(input) as Box<dyn Any + Send>)
        .map_err(|err| CoerceError {
            target: std::any::type_name::<I>(),
            message: err.to_string(),
        })
}

fn downcast_argument<I: 'static>(argument: Box<dyn Any + Send>) -> Result<I, OperationFailure> {
    argument.downcast::<I>().map(|boxed| *boxed).map_err(|_| {
        OperationFailure::message("argument type does not match the registered operation")
    })
}

fn serialize_output<O: Serialize>(output: &O) -> Result<Value, OperationFailure> {
    serde_json::to_value(output)
        .map_err(|err| OperationFailure::message(format!("response serialization failed: {err}")))
}

/// Failure classified at the dispatch boundary.
///
/// The HTTP mapping is two-tier for operation failures: the designated
/// client-fault root cause maps to 400, everything else to 500. Lookup and
/// coercion failures get their own statuses because they are resolved before
/// any operation runs.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler is registered under the requested key.
    #[error("handler not found: {name}")]
    HandlerNotFound {
        /// The unresolvable handler key.
        name: String,
    },
    /// The handler exists but has no operation with the requested name.
    #[error("operation not found: {name}")]
    OperationNotFound {
        /// The unresolvable operation name.
        name: String,
    },
    /// The payload could not be coerced into the declared input type.
    #[error("invalid request payload: {message}")]
    InvalidPayload {
        /// Structural converter error message.
        message: String,
    },
    /// Waiting on a deferred result was interrupted (handle cancelled).
    #[error("deferred result resolution interrupted")]
    ResolutionInterrupted,
    /// The operation ran and reported a failure.
    #[error("operation failed: {0}")]
    Operation(#[source] BoxError),
    /// Unclassified failure inside the dispatch machinery itself.
    #[error("internal dispatch error")]
    Internal(#[source] BoxError),
}

impl DispatchError {
    /// HTTP status for the boundary response.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::HandlerNotFound { .. } | Self::OperationNotFound { .. } => 404,
            Self::InvalidPayload { .. } => 400,
            Self::Operation(cause) => {
                let client_fault = root_cause(cause.as_ref())
                    .downcast_ref::<DownstreamError>()
                    .is_some_and(DownstreamError::is_client_fault);
                if client_fault {
                    400
                } else {
                    500
                }
            }
            Self::ResolutionInterrupted | Self::Internal(_) => 500,
        }
    }

    /// Short kind name used as a metric tag value.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::HandlerNotFound { .. } => "HandlerNotFound",
            Self::OperationNotFound { .. } => "OperationNotFound",
            Self::InvalidPayload { .. } => "InvalidPayload",
            Self::ResolutionInterrupted => "ResolutionInterrupted",
            Self::Operation(_) => "OperationFailed",
            Self::Internal(_) => "Internal",
        }
    }

    /// Message safe for the HTTP response body.
    ///
    /// Internal failures collapse to a fixed opaque message; their chains go
    /// to the logs only. Operation failures surface the root cause's message.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            Self::Operation(cause) => root_cause(cause.as_ref()).to_string(),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
