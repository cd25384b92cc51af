//! API server.
//!
//! Serves the submission, status and download routes plus the local
//! artifact directory.

use axum::Router;
use axum::extract::Request;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::config::AppConfig;
use crate::database::DbPool;
use crate::error::{Error, Result};
use crate::pipeline::{StatusStore, SubmissionGateway};

/// Health endpoints are polled constantly; keep them out of the request log.
const HEALTH_PATH_PREFIX: &str = "/health";

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: crate::config::DEFAULT_BIND_ADDRESS.to_string(),
            port: crate::config::DEFAULT_PORT,
            enable_cors: true,
        }
    }
}

impl From<&AppConfig> for ApiServerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            port: config.port,
            enable_cors: true,
        }
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub status: Arc<StatusStore>,
    pub gateway: Arc<SubmissionGateway>,
    /// Directory served under `/files`.
    pub storage_dir: PathBuf,
    /// Name of the active storage backend.
    pub storage_name: &'static str,
    /// Checked by the readiness endpoint when present.
    pub pool: Option<DbPool>,
}

impl AppState {
    pub fn new(
        status: Arc<StatusStore>,
        gateway: Arc<SubmissionGateway>,
        storage_dir: impl Into<PathBuf>,
        storage_name: &'static str,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            status,
            gateway,
            storage_dir: storage_dir.into(),
            storage_name,
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: DbPool) -> Self {
        self.pool = Some(pool);
        self
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Share the shutdown signal with the caller.
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware applied.
    pub fn router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if req.uri().path().starts_with(HEALTH_PATH_PREFIX) {
                        Span::none()
                    } else {
                        let mut make_span =
                            tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                        use tower_http::trace::MakeSpan;
                        make_span.make_span(req)
                    }
                })
                .on_request(|req: &Request, span: &Span| {
                    if span.is_disabled() {
                        return;
                    }
                    let mut on_request =
                        tower_http::trace::DefaultOnRequest::new().level(tracing::Level::INFO);
                    use tower_http::trace::OnRequest;
                    on_request.on_request(req, span);
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let on_response =
                            tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                        use tower_http::trace::OnResponse;
                        on_response.on_response(res, latency, span);
                    },
                )
                .on_failure(
                    |class: tower_http::classify::ServerErrorsFailureClass,
                     latency: Duration,
                     span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let mut on_failure =
                            tower_http::trace::DefaultOnFailure::new().level(tracing::Level::ERROR);
                        use tower_http::trace::OnFailure;
                        on_failure.on_failure(class, latency, span);
                    },
                ),
        )
    }

    /// Bind and serve until the cancel token fires.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid bind address: {}", e)))?;

        let router = self.router();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("API server listening on {}", addr);

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down");
            })
            .await?;

        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
