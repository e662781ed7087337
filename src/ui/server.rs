//! Gateway HTTP server

use axum::{routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::AppConfig;
use crate::proxy::{RetryPolicy, RouteResolver};
use crate::ui::{handlers, websocket};

/// Shared application state
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub resolver: RouteResolver,
    pub retry: RetryPolicy,
}

/// Serves the WebSocket gateway, the JSON API and the static web client
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self::with_retry_policy(config, RetryPolicy::default())
    }

    pub fn with_retry_policy(config: Arc<AppConfig>, retry: RetryPolicy) -> Self {
        let resolver = RouteResolver::new(&config);
        Self {
            state: Arc::new(AppState {
                config,
                resolver,
                retry,
            }),
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        let static_dir = &self.state.config.gateway.static_dir;

        Router::new()
            .route("/ws/*path", get(websocket::ws_handler))
            .route("/api/engine/instances", get(handlers::get_instances))
            .route("/api/engine/scan", get(handlers::scan_library))
            .route("/api/settings", get(handlers::get_settings))
            .fallback_service(ServeDir::new(static_dir).append_index_html_on_directories(true))
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(&self.state))
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let gateway = &self.state.config.gateway;
        let listener = TcpListener::bind((gateway.bind_address.as_str(), gateway.port)).await?;
        tracing::info!("Gateway listening on http://{}", listener.local_addr()?);
        Ok(listener)
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
