//! @acp:module "Bounded Session"
//! @acp:summary "PublisherSession decorator enforcing a per-call deadline"
//! @acp:domain publisher
//! @acp:layer service

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{ModelPath, Project, PublisherError, PublisherSession};

/// Fails any call that runs past `limit` with [`PublisherError::Timeout`]
pub struct BoundedSession {
    inner: Arc<dyn PublisherSession>,
    limit: Duration,
}

impl BoundedSession {
    pub fn new(inner: Arc<dyn PublisherSession>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T>(
        &self,
        call: &str,
        fut: impl Future<Output = Result<T, PublisherError>>,
    ) -> Result<T, PublisherError> {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Publisher call {} timed out after {:?}", call, self.limit);
                Err(PublisherError::Timeout)
            }
        }
    }
}

#[async_trait]
impl PublisherSession for BoundedSession {
    async fn list_projects(&self) -> Result<Vec<Project>, PublisherError> {
        self.bounded("list_projects", self.inner.list_projects()).await
    }

    async fn get_project(&self, project: &str) -> Result<Value, PublisherError> {
        self.bounded("get_project", self.inner.get_project(project))
            .await
    }

    async fn list_packages(&self, project: &str) -> Result<Vec<Value>, PublisherError> {
        self.bounded("list_packages", self.inner.list_packages(project))
            .await
    }

    async fn get_package(&self, project: &str, package: &str) -> Result<Value, PublisherError> {
        self.bounded("get_package", self.inner.get_package(project, package))
            .await
    }

    async fn list_models(
        &self,
        project: &str,
        package: &str,
    ) -> Result<Vec<Value>, PublisherError> {
        self.bounded("list_models", self.inner.list_models(project, package))
            .await
    }

    async fn get_model(&self, project: &str, model: &ModelPath) -> Result<Value, PublisherError> {
        self.bounded("get_model", self.inner.get_model(project, model))
            .await
    }

    async fn execute_query(
        &self,
        project: &str,
        model: &ModelPath,
        query: &str,
    ) -> Result<Value, PublisherError> {
        self.bounded(
            "execute_query",
            self.inner.execute_query(project, model, query),
        )
        .await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::testing::FakeSession;

    struct StalledSession;

    #[async_trait]
    impl PublisherSession for StalledSession {
        async fn list_projects(&self) -> Result<Vec<Project>, PublisherError> {
            std::future::pending().await
        }
        async fn get_project(&self, _: &str) -> Result<Value, PublisherError> {
            std::future::pending().await
        }
        async fn list_packages(&self, _: &str) -> Result<Vec<Value>, PublisherError> {
            std::future::pending().await
        }
        async fn get_package(&self, _: &str, _: &str) -> Result<Value, PublisherError> {
            std::future::pending().await
        }
        async fn list_models(&self, _: &str, _: &str) -> Result<Vec<Value>, PublisherError> {
            std::future::pending().await
        }
        async fn get_model(&self, _: &str, _: &ModelPath) -> Result<Value, PublisherError> {
            std::future::pending().await
        }
        async fn execute_query(
            &self,
            _: &str,
            _: &ModelPath,
            _: &str,
        ) -> Result<Value, PublisherError> {
            std::future::pending().await
        }
        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_stalled_call_times_out() {
        let session = BoundedSession::new(Arc::new(StalledSession), Duration::from_millis(20));
        let model = ModelPath::parse("demo/basic").unwrap();

        let err = session
            .execute_query("home", &model, "run: orders -> { aggregate: c is count() }")
            .await
            .unwrap_err();
        assert!(matches!(err, PublisherError::Timeout));
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let inner = Arc::new(FakeSession::demo());
        let session = BoundedSession::new(inner.clone(), Duration::from_secs(5));

        let projects = session.list_projects().await.unwrap();
        assert_eq!(projects[0].name, "home");

        session.close().await;
        assert!(inner.is_closed());
    }
}
