//! HTTP gateway for the sensorcast daemon.
//!
//! The server:
//! - Listens on a TCP socket for HTTP clients
//! - Serves the sensor list and per-sensor reading streams
//! - Ends open streams and stops accepting on cancellation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  GatewayServer  │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ axum::serve
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │     router      │────▶│ StreamRegistry  │
//! │  (per request)  │     │  (read-only)    │
//! └───────┬─────────┘     └────────┬────────┘
//!         │                        │ subscribe
//!         ▼                        ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  ndjson body    │◀────│  Subscription   │
//! │  (per client)   │     │  (per client)   │
//! └─────────────────┘     └─────────────────┘
//! ```

mod routes;

pub use routes::{router, GatewayState};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::registry::StreamRegistry;

/// HTTP server exposing the registry's streams.
pub struct GatewayServer {
    /// Address to bind
    addr: SocketAddr,

    /// Sensor streams
    registry: Arc<StreamRegistry>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,
}

impl GatewayServer {
    /// Creates a new gateway server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the server will listen on
    /// * `registry` - Streams to serve
    /// * `cancel_token` - Token for graceful shutdown
    pub fn new(
        addr: SocketAddr,
        registry: Arc<StreamRegistry>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            addr,
            registry,
            cancel_token,
        }
    }

    /// Returns the configured listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Binds the listen address and serves until cancelled.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: self.addr,
                error: e.to_string(),
            })?;

        self.serve(listener).await
    }

    /// Serves on an already bound listener until cancelled.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr().unwrap_or(self.addr);
        info!(
            addr = %local_addr,
            sensors = self.registry.len(),
            "Gateway listening"
        );

        let app = router(GatewayState::new(
            Arc::clone(&self.registry),
            self.cancel_token.clone(),
        ));

        let shutdown = self.cancel_token.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Gateway shutdown requested");
            })
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        info!("Gateway stopped");
        Ok(())
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Server error: {0}")]
    Serve(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:9000".parse().unwrap(),
            error: "address in use".to_string(),
        };
        assert!(err.to_string().contains("127.0.0.1:9000"));
        assert!(err.to_string().contains("address in use"));
    }
}
