//! @acp:module "Connection Bootstrap"
//! @acp:summary "Bounded retry for establishing the publisher session at startup"
//! @acp:domain publisher
//! @acp:layer service

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::redact_url;
use crate::error::{MalloyError, Operation};
use crate::publisher::{Connector, Project, PublisherSession};

/// Retry schedule: exponential backoff from `initial_delay`, capped at `max_delay`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts, including the first. Never below 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            ..Self::default()
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// A validated publisher session
pub struct Connected {
    pub session: Arc<dyn PublisherSession>,
    pub projects: Vec<Project>,
    pub attempts: u32,
}

/// Open and validate a session, retrying per `policy`.
///
/// An attempt succeeds when the publisher answers a project listing with at
/// least one project. A session that fails validation is closed before the
/// next attempt. No delay follows the final attempt.
pub async fn connect_with_retry(
    connector: &dyn Connector,
    base_url: &str,
    policy: &RetryPolicy,
) -> Result<Connected, MalloyError> {
    let max_attempts = policy.max_attempts.max(1);
    let display_url = redact_url(base_url);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match try_connect(connector, base_url).await {
            Ok((session, projects)) => {
                info!(
                    "Connected to Malloy publisher at {} ({} projects, attempt {}/{})",
                    display_url,
                    projects.len(),
                    attempt,
                    max_attempts
                );
                return Ok(Connected {
                    session,
                    projects,
                    attempts: attempt,
                });
            }
            Err(e) => {
                warn!(
                    "Connection attempt {}/{} to {} failed: {}",
                    attempt, max_attempts, display_url, e
                );
                last_error = Some(e);
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(policy.delay_after(attempt)).await;
        }
    }

    let reason = last_error
        .map(|e| e.message().to_string())
        .unwrap_or_else(|| "unknown error".to_string());

    Err(MalloyError::connection(format!(
        "Failed to connect to Malloy publisher after {} attempts: {}",
        max_attempts, reason
    ))
    .with_context("attempts", max_attempts)
    .with_context("url", display_url))
}

async fn try_connect(
    connector: &dyn Connector,
    base_url: &str,
) -> Result<(Arc<dyn PublisherSession>, Vec<Project>), MalloyError> {
    let session = connector
        .connect(base_url)
        .await
        .map_err(|e| MalloyError::from_publisher(&e, Operation::Metadata))?;

    let projects = match session.list_projects().await {
        Ok(projects) if !projects.is_empty() => projects,
        Ok(_) => {
            session.close().await;
            return Err(MalloyError::connection("No projects found in Malloy publisher"));
        }
        Err(e) => {
            session.close().await;
            return Err(MalloyError::from_publisher(&e, Operation::Metadata));
        }
    };

    Ok((session, projects))
}
