//! @acp:module "Application State"
//! @acp:summary "Shared publisher connection state with a readiness gate"
//! @acp:domain mcp
//! @acp:layer service
//!
//! Holds the one publisher session for the process and its lifecycle.
//! Handlers only read it; the bootstrap and shutdown paths write it.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::bootstrap::{connect_with_retry, Connected};
use crate::config::ServerConfig;
use crate::error::MalloyError;
use crate::publisher::{BoundedSession, Connector, PublisherSession};

/// Lifecycle of the publisher connection
#[derive(Clone)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Ready(Arc<dyn PublisherSession>),
    Failed(String),
    Closed,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
            Self::Closed => "closed",
        }
    }
}

/// Shared application state for request handlers
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    connection: RwLock<ConnectionState>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                connection: RwLock::new(ConnectionState::Uninitialized),
            }),
        }
    }

    /// Create AppState that is already connected to the given session
    #[cfg(test)]
    pub fn for_testing(session: Arc<dyn PublisherSession>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config: ServerConfig::default(),
                connection: RwLock::new(ConnectionState::Ready(session)),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Connect to the publisher, moving Uninitialized → Connecting → Ready | Failed
    pub async fn connect(&self, connector: &dyn Connector) -> Result<Connected, MalloyError> {
        self.set(ConnectionState::Connecting).await;

        let config = &self.inner.config;
        match connect_with_retry(connector, &config.publisher_url, &config.retry).await {
            Ok(connected) => {
                let bounded: Arc<dyn PublisherSession> = Arc::new(BoundedSession::new(
                    connected.session.clone(),
                    config.request_timeout,
                ));
                self.set(ConnectionState::Ready(bounded)).await;
                Ok(connected)
            }
            Err(e) => {
                self.set(ConnectionState::Failed(e.message().to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Session for a handler, or a ConnectionError if not Ready
    pub async fn session(&self) -> Result<Arc<dyn PublisherSession>, MalloyError> {
        match &*self.inner.connection.read().await {
            ConnectionState::Ready(session) => Ok(session.clone()),
            other => Err(MalloyError::not_ready(other.label())),
        }
    }

    /// Current lifecycle label
    pub async fn connection_label(&self) -> &'static str {
        self.inner.connection.read().await.label()
    }

    /// Close the session if one is open. Safe to call on every exit path.
    pub async fn shutdown(&self) {
        let previous = {
            let mut guard = self.inner.connection.write().await;
            std::mem::replace(&mut *guard, ConnectionState::Closed)
        };

        if let ConnectionState::Ready(session) = previous {
            session.close().await;
            info!("Publisher session closed");
        }
    }

    async fn set(&self, next: ConnectionState) {
        let mut guard = self.inner.connection.write().await;
        info!("Publisher connection: {} -> {}", guard.label(), next.label());
        if let ConnectionState::Failed(reason) = &next {
            warn!("Publisher connection failed: {}", reason);
        }
        *guard = next;
    }
}
