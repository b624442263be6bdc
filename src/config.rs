//! @acp:module "Server Configuration"
//! @acp:summary "Runtime settings resolved from CLI flags and environment"
//! @acp:domain config
//! @acp:layer model

use std::time::Duration;

use crate::bootstrap::RetryPolicy;

/// Default publisher location when `MALLOY_PUBLISHER_ROOT_URL` is unset
pub const DEFAULT_PUBLISHER_URL: &str = "http://localhost:4000";

/// Project used when a request does not name one
pub const DEFAULT_PROJECT: &str = "home";

/// Immutable settings handed to the server at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base URL of the Malloy Publisher service
    pub publisher_url: String,
    /// Project used by the tool and prompt when none is given
    pub default_project: String,
    /// Connection retry schedule for startup
    pub retry: RetryPolicy,
    /// Upper bound on any single publisher call
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            publisher_url: DEFAULT_PUBLISHER_URL.to_string(),
            default_project: DEFAULT_PROJECT.to_string(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Publisher URL with any embedded credentials removed, safe for logs and errors
    pub fn display_url(&self) -> String {
        redact_url(&self.publisher_url)
    }
}

/// Strip `user:password@` from a URL.
pub fn redact_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            if !parsed.username().is_empty() || parsed.password().is_some() {
                // Both setters only fail for cannot-be-a-base URLs, which have no user-info.
                let _ = parsed.set_username("");
                let _ = parsed.set_password(None);
            }
            parsed.to_string().trim_end_matches('/').to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}
