//! HTTP surface: configuration, middleware, handlers, module lifecycle, and
//! shutdown control.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::{NetworkConfig, TlsConfig};
pub use handlers::AppState;
pub use module::GatewayModule;
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
