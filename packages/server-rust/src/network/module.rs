//! Gateway module with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener (and
//! installs the Prometheus exporter when configured), and `serve()` accepts
//! connections until the shutdown future fires. The split lets the embedder
//! register handlers and lifecycle components between construction and
//! serving.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::dispatch::{
    Dispatcher, GatewayConfig, GatewayContext, HandlerRegistry, LifecycleRegistry,
};
use crate::instrument::{
    build_dispatch_pipeline, DownstreamInstrument, MapPropertySource, MetricsRecorder,
    MetricsSink, PrometheusSink,
};

use super::config::NetworkConfig;
use super::handlers::{
    dispatch_handler, health_handler, liveness_handler, readiness_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;

/// Manages the gateway HTTP server lifecycle.
pub struct GatewayModule {
    config: NetworkConfig,
    gateway: Arc<GatewayConfig>,
    registry: Arc<HandlerRegistry>,
    lifecycle: Arc<LifecycleRegistry>,
    recorder: MetricsRecorder,
    shutdown: Arc<ShutdownController>,
    listener: Option<TcpListener>,
}

impl GatewayModule {
    /// Creates a gateway module without binding any port.
    ///
    /// Metrics flow through the `metrics` facade by default; tests swap the
    /// sink with [`with_sink`](Self::with_sink).
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        gateway: GatewayConfig,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            config,
            gateway: Arc::new(gateway),
            registry,
            lifecycle: Arc::new(LifecycleRegistry::new()),
            recorder: MetricsRecorder::new(Arc::new(PrometheusSink)),
            shutdown: Arc::new(ShutdownController::new()),
            listener: None,
        }
    }

    /// Replaces the metrics sink (used by tests and embedders with their own
    /// backend).
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.recorder = MetricsRecorder::new(sink);
        self
    }

    /// Shared lifecycle registry for managed components.
    #[must_use]
    pub fn lifecycle(&self) -> Arc<LifecycleRegistry> {
        Arc::clone(&self.lifecycle)
    }

    /// Shared shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Downstream call instrument wired to this gateway's recorder and
    /// property source. Handlers use it to wrap their outbound calls.
    #[must_use]
    pub fn downstream(&self) -> DownstreamInstrument {
        DownstreamInstrument::new(
            self.recorder.clone(),
            Arc::new(MapPropertySource::new(self.gateway.properties.clone())),
        )
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `POST /api/1.0/dev/downstream/{service}/{method}` -- dispatch
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- liveness probe
    /// - `GET /health/ready` -- readiness probe
    #[must_use]
    pub fn build_router(&self) -> Router {
        let pipeline = build_dispatch_pipeline(
            Dispatcher::new(Arc::clone(&self.registry)),
            self.recorder.clone(),
            self.gateway.latency_metric.clone(),
        );

        let state = AppState {
            pipeline,
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        };

        Router::new()
            .route(
                "/api/1.0/dev/downstream/{service}/{method}",
                post(dispatch_handler),
            )
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the TCP listener and, when configured, installs the Prometheus
    /// exporter.
    ///
    /// Returns the actual bound port (relevant when port 0 requested an
    /// OS-assigned one).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the exporter
    /// fails to install.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        if let Some(addr) = self.config.metrics_listen {
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .map_err(|err| anyhow::anyhow!("failed to install metrics exporter: {err}"))?;
            info!(address = %addr, "Prometheus exporter listening");
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until the shutdown future fires, then drains.
    ///
    /// Initializes lifecycle components before accepting traffic and shuts
    /// them down in reverse order after the drain.
    ///
    /// # Errors
    ///
    /// Returns an error on fatal I/O failures or component init/shutdown
    /// failures.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .expect("start() must be called before serve()");
        let router = self.build_router();

        let ctx = GatewayContext {
            config: Arc::clone(&self.gateway),
        };
        self.lifecycle.init_all(&ctx).await?;
        self.shutdown.set_ready();

        if let Some(ref tls) = self.config.tls {
            serve_tls(listener, router, tls, shutdown).await?;
        } else {
            serve_plain(listener, router, shutdown).await?;
        }

        self.shutdown.trigger_shutdown();
        let drained = self.shutdown.wait_for_drain(self.config.drain_timeout).await;
        if drained {
            info!("all in-flight requests drained");
        } else {
            warn!("drain timeout expired with in-flight requests remaining");
        }

        self.lifecycle.shutdown_all().await?;
        Ok(())
    }
}

/// Serves plain HTTP using axum's built-in server.
async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("serving plain HTTP connections");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Serves TLS connections via `axum-server` with rustls, reusing the
/// pre-bound listener.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &super::config::TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|err| anyhow::anyhow!("failed to load TLS certificates: {err}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!(address = %addr, "serving TLS connections");
    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
