//! Operation dispatch framework.
//!
//! 1. **Registration** (`registry`): handlers register named, typed operations
//!    at startup under stable string keys
//! 2. **Dispatch** (`dispatcher`): resolve handler and operation by name,
//!    coerce the payload, invoke, settle deferred results
//! 3. **Lifecycle** (`lifecycle`): managed component init/shutdown around
//!    serving

pub mod config;
pub mod dispatcher;
pub mod lifecycle;
pub mod operation;
pub mod registry;

// Re-export key types for convenient access.
pub use config::GatewayConfig;
pub use dispatcher::Dispatcher;
pub use lifecycle::{GatewayContext, LifecycleRegistry, ManagedComponent};
pub use operation::{
    CoerceError, DispatchError, DispatchRequest, OperationFailure, OperationHandle, OperationKind,
    OperationOutput,
};
pub use registry::{HandlerRegistry, OperationTable, RegisteredHandler};
