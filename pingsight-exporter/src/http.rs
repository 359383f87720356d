//! HTTP server for the metrics endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::HEALTH_PATH;
use crate::exposition;
use crate::registry::SharedRegistry;

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: SharedRegistry,
}

/// Create the HTTP router.
fn create_router(registry: SharedRegistry, metrics_path: &str) -> Router {
    let state = AppState { registry };

    Router::new()
        .route(metrics_path, get(handle_scrape))
        .route(HEALTH_PATH, get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint. Request body and query are ignored.
async fn handle_scrape(State(state): State<AppState>) -> Response {
    let body = exposition::render(&state.registry.snapshot());

    (StatusCode::OK, [(CONTENT_TYPE, exposition::CONTENT_TYPE)], body).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler(State(state): State<AppState>) -> Response {
    let body = serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "series": state.registry.series_count(),
    });

    (StatusCode::OK, axum::Json(body)).into_response()
}

/// A bound metrics server, not yet serving.
pub struct HttpServer {
    registry: SharedRegistry,
    listener: TcpListener,
    metrics_path: String,
}

impl HttpServer {
    /// Bind the listener.
    ///
    /// Binding happens up front so that an unavailable port is reported before
    /// any prober starts.
    pub async fn bind(
        registry: SharedRegistry,
        listen_addr: SocketAddr,
        metrics_path: String,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|source| ServerError::Listen {
                addr: listen_addr,
                source,
            })?;

        Ok(Self {
            registry,
            listener,
            metrics_path,
        })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the shutdown signal turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        let router = create_router(self.registry, &self.metrics_path);

        info!(
            addr = %addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if *shutdown.borrow_and_update() {
                        break;
                    }
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}
