//! @acp:module "Publisher HTTP Client"
//! @acp:summary "PublisherSession over the Malloy Publisher REST API"
//! @acp:domain publisher
//! @acp:layer transport

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{Connector, ModelPath, Project, PublisherError, PublisherSession};

/// Longest backend error message passed on to callers
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Builds [`HttpSession`]s with a shared timeout configuration
#[derive(Debug, Clone)]
pub struct HttpConnector {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl HttpConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout,
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, base_url: &str) -> Result<Arc<dyn PublisherSession>, PublisherError> {
        let base = Url::parse(base_url).map_err(|e| PublisherError::Unreachable {
            detail: format!("invalid publisher URL: {}", e),
        })?;
        if base.cannot_be_a_base() {
            return Err(PublisherError::Unreachable {
                detail: "publisher URL cannot be used as a base".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| PublisherError::Unreachable {
                detail: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Arc::new(HttpSession {
            client,
            base,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Session backed by a pooled `reqwest::Client`
pub struct HttpSession {
    client: reqwest::Client,
    base: Url,
    closed: AtomicBool,
}

impl HttpSession {
    /// `{base}/api/v0/{segments...}`, each segment percent-encoded
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        // cannot_be_a_base was rejected in connect, so this always succeeds
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v0"]).extend(segments);
        }
        url
    }

    fn model_endpoint(&self, project: &str, model: &ModelPath, leaf: &str) -> Url {
        let prefix = ["projects", project, "packages", model.package(), leaf];
        self.endpoint(prefix.into_iter().chain(model.path().split('/')))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
        resource: impl FnOnce() -> String,
    ) -> Result<T, PublisherError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublisherError::Unreachable {
                detail: "session closed".to_string(),
            });
        }

        debug!("GET {}", url.path());

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, resource));
        }

        let body = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&body).map_err(|e| PublisherError::Decode {
            detail: e.to_string(),
        })
    }
}

#[async_trait]
impl PublisherSession for HttpSession {
    async fn list_projects(&self) -> Result<Vec<Project>, PublisherError> {
        self.get_json(self.endpoint(["projects"]), &[], || "project list".to_string())
            .await
    }

    async fn get_project(&self, project: &str) -> Result<Value, PublisherError> {
        self.get_json(self.endpoint(["projects", project]), &[], || {
            format!("project '{}'", project)
        })
        .await
    }

    async fn list_packages(&self, project: &str) -> Result<Vec<Value>, PublisherError> {
        self.get_json(self.endpoint(["projects", project, "packages"]), &[], || {
            format!("project '{}'", project)
        })
        .await
    }

    async fn get_package(&self, project: &str, package: &str) -> Result<Value, PublisherError> {
        let url = self.endpoint(["projects", project, "packages", package]);
        self.get_json(url, &[], || format!("package '{}'", package))
            .await
    }

    async fn list_models(
        &self,
        project: &str,
        package: &str,
    ) -> Result<Vec<Value>, PublisherError> {
        let url = self.endpoint(["projects", project, "packages", package, "models"]);
        self.get_json(url, &[], || format!("package '{}'", package))
            .await
    }

    async fn get_model(&self, project: &str, model: &ModelPath) -> Result<Value, PublisherError> {
        let url = self.model_endpoint(project, model, "models");
        self.get_json(url, &[], || format!("model '{}'", model)).await
    }

    async fn execute_query(
        &self,
        project: &str,
        model: &ModelPath,
        query: &str,
    ) -> Result<Value, PublisherError> {
        let url = self.model_endpoint(project, model, "queryResults");
        self.get_json(url, &[("query", query)], || format!("model '{}'", model))
            .await
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Publisher session closed");
        }
    }
}

fn transport_error(e: reqwest::Error) -> PublisherError {
    if e.is_timeout() {
        PublisherError::Timeout
    } else {
        // Strip the URL so query strings never reach the error text
        PublisherError::Unreachable {
            detail: e.without_url().to_string(),
        }
    }
}

fn status_error(
    status: StatusCode,
    body: &str,
    resource: impl FnOnce() -> String,
) -> PublisherError {
    if status == StatusCode::NOT_FOUND {
        return PublisherError::NotFound {
            resource: resource(),
        };
    }

    let message = backend_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    });

    if status.is_client_error() {
        PublisherError::Rejected {
            status: status.as_u16(),
            message,
        }
    } else {
        PublisherError::Backend {
            status: status.as_u16(),
            message,
        }
    }
}

/// Publisher errors look like `{"code": 400, "message": "..."}`; fall back to raw text.
fn backend_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string());

    Some(truncate(&message, MAX_ERROR_MESSAGE_LEN))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
