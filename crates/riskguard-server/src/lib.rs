//! RiskGuard Server - HTTP API server.
//!
//! This crate exposes the decision pipeline over HTTP and WebSocket.
//!
//! ## Endpoints
//!
//! - `POST /api/v1/check` - Check standalone content
//! - `POST /api/v1/check_with_context` - Check content with its conversation
//! - `POST /api/v1/batch_check` - Check many items concurrently
//! - `GET /api/v1/stream` - WebSocket stream, one reply per request frame
//! - `GET /api/v1/health` - Service health and remote detector state
//! - `GET /api/v1/rules` - Active rule set
//! - `POST /api/v1/rules/reload` - Re-read the rule file
//! - `GET|POST|DELETE /api/v1/words` - Word list administration
//! - `POST /api/v1/words/reload` - Re-read the word files
//!
//! ## Example
//!
//! ```no_run
//! use riskguard_server::{AppState, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let state = AppState::with_words(&["spam"]);
//!     let server = Server::new(ServerConfig::default(), state).unwrap();
//!     server.run(std::future::pending()).await.unwrap();
//! }
//! ```

pub mod error;
mod handlers;
pub mod models;
pub mod state;

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use error::{ApiError, Result};
pub use handlers::default_batch_id;
pub use state::AppState;

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1).
    pub host: String,
    /// Port to bind to (default: 8080).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// Invalid listen address.
    #[error("invalid address {0}: {1}")]
    InvalidAddress(String, std::net::AddrParseError),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/check", post(handlers::check))
        .route("/api/v1/check_with_context", post(handlers::check_with_context))
        .route("/api/v1/batch_check", post(handlers::batch_check))
        .route("/api/v1/stream", get(handlers::stream))
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/rules", get(handlers::get_rules))
        .route("/api/v1/rules/reload", post(handlers::reload_rules))
        .route(
            "/api/v1/words",
            get(handlers::list_words)
                .post(handlers::add_word)
                .delete(handlers::remove_word),
        )
        .route("/api/v1/words/reload", post(handlers::reload_words))
        .with_state(state)
}

/// The HTTP API server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a server around existing application state.
    pub fn new(config: ServerConfig, state: AppState) -> std::result::Result<Self, ServerError> {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let router = router(state).layer(cors);

        let raw = format!("{}:{}", config.host, config.port);
        let addr = raw
            .parse()
            .map_err(|e| ServerError::InvalidAddress(raw, e))?;

        Ok(Self { router, addr })
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn bind(&self) -> std::result::Result<tokio::net::TcpListener, ServerError> {
        let bind_err = |e| ServerError::BindError(self.addr, e);
        let domain = if self.addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
        // Allow quick restarts while old sockets sit in TIME_WAIT
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&self.addr.into()).map_err(bind_err)?;
        socket.listen(1024).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        let std_listener: std::net::TcpListener = socket.into();
        tokio::net::TcpListener::from_std(std_listener).map_err(bind_err)
    }

    /// Runs the server until `shutdown` completes, then drains connections.
    pub async fn run<F>(self, shutdown: F) -> std::result::Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind()?;
        info!(addr = %self.addr, "Starting RiskGuard API server");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        info!("API server stopped");
        Ok(())
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}
