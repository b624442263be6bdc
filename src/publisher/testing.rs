//! In-memory publisher doubles for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{Connector, Model, ModelPath, Project, PublisherError, PublisherSession};

/// Session serving fixed documents and recording every call
pub struct FakeSession {
    pub projects: Vec<Project>,
    /// Package documents by project
    pub packages: HashMap<String, Vec<Value>>,
    /// Model listings by package name
    pub model_listings: HashMap<String, Vec<Value>>,
    /// Model documents by `<package>/<path>`
    pub models: HashMap<String, Value>,
    pub query_outcome: Mutex<Option<Result<Value, PublisherError>>>,
    calls: AtomicUsize,
    closed: AtomicBool,
    last_model: Mutex<Option<String>>,
    last_query: Mutex<Option<(String, String, String)>>,
}

impl FakeSession {
    pub fn empty() -> Self {
        Self {
            projects: Vec::new(),
            packages: HashMap::new(),
            model_listings: HashMap::new(),
            models: HashMap::new(),
            query_outcome: Mutex::new(None),
            calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            last_model: Mutex::new(None),
            last_query: Mutex::new(None),
        }
    }

    /// Project `home` with package `demo` holding model `demo/basic`
    pub fn demo() -> Self {
        let mut session = Self::empty();
        session.projects = vec![project("home")];
        session
            .packages
            .insert("home".to_string(), vec![package("demo", "Demo package")]);
        session.model_listings.insert(
            "demo".to_string(),
            vec![json!({"packageName": "demo", "path": "basic", "type": "source"})],
        );
        session
            .models
            .insert("demo/basic".to_string(), demo_model_document());
        session
    }

    pub fn with_query_result(self, result: Value) -> Self {
        *self.query_outcome.lock().unwrap() = Some(Ok(result));
        self
    }

    pub fn with_query_error(self, error: PublisherError) -> Self {
        *self.query_outcome.lock().unwrap() = Some(Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Model path of the last `get_model` call
    pub fn last_model(&self) -> Option<String> {
        self.last_model.lock().unwrap().clone()
    }

    /// (project, model path, query) of the last `execute_query` call
    pub fn last_query(&self) -> Option<(String, String, String)> {
        self.last_query.lock().unwrap().clone()
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PublisherSession for FakeSession {
    async fn list_projects(&self) -> Result<Vec<Project>, PublisherError> {
        self.record();
        Ok(self.projects.clone())
    }

    async fn get_project(&self, project: &str) -> Result<Value, PublisherError> {
        self.record();
        self.projects
            .iter()
            .find(|p| p.name == project)
            .map(|p| {
                let mut doc = p.extra.clone();
                doc.insert("name".to_string(), json!(p.name));
                Value::Object(doc)
            })
            .ok_or_else(|| PublisherError::NotFound {
                resource: format!("project '{}'", project),
            })
    }

    async fn list_packages(&self, project: &str) -> Result<Vec<Value>, PublisherError> {
        self.record();
        self.packages
            .get(project)
            .cloned()
            .ok_or_else(|| PublisherError::NotFound {
                resource: format!("project '{}'", project),
            })
    }

    async fn get_package(&self, project: &str, package: &str) -> Result<Value, PublisherError> {
        self.record();
        self.packages
            .get(project)
            .and_then(|pkgs| pkgs.iter().find(|p| p["name"] == package))
            .cloned()
            .ok_or_else(|| PublisherError::NotFound {
                resource: format!("package '{}'", package),
            })
    }

    async fn list_models(
        &self,
        _project: &str,
        package: &str,
    ) -> Result<Vec<Value>, PublisherError> {
        self.record();
        self.model_listings
            .get(package)
            .cloned()
            .ok_or_else(|| PublisherError::NotFound {
                resource: format!("package '{}'", package),
            })
    }

    async fn get_model(&self, _project: &str, model: &ModelPath) -> Result<Value, PublisherError> {
        self.record();
        *self.last_model.lock().unwrap() = Some(model.to_string());
        self.models
            .get(&model.to_string())
            .cloned()
            .ok_or_else(|| PublisherError::NotFound {
                resource: format!("model '{}'", model),
            })
    }

    async fn execute_query(
        &self,
        project: &str,
        model: &ModelPath,
        query: &str,
    ) -> Result<Value, PublisherError> {
        self.record();
        *self.last_query.lock().unwrap() =
            Some((project.to_string(), model.to_string(), query.to_string()));

        match self.query_outcome.lock().unwrap().take() {
            Some(outcome) => outcome,
            None => Ok(sample_query_result()),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector whose first `failures` attempts fail
pub struct FakeConnector {
    failures: usize,
    session: Arc<FakeSession>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn failing(failures: usize, session: Arc<FakeSession>) -> Self {
        Self {
            failures,
            session,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn never_succeeds() -> Self {
        Self::failing(usize::MAX, Arc::new(FakeSession::empty()))
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _base_url: &str) -> Result<Arc<dyn PublisherSession>, PublisherError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(PublisherError::Unreachable {
                detail: format!("connection refused (attempt {})", attempt + 1),
            });
        }
        let session: Arc<dyn PublisherSession> = self.session.clone();
        Ok(session)
    }
}

pub fn project(name: &str) -> Project {
    Project {
        name: name.to_string(),
        extra: Map::new(),
    }
}

pub fn package(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "location": null,
    })
}

/// Model document for `demo/basic`, including a `null` field the publisher may send
pub fn demo_model_document() -> Value {
    let model_def = json!({
        "contents": {
            "orders": {
                "type": "source",
                "name": "orders",
                "fields": [
                    {"name": "order_id", "type": "number"},
                    {"name": "category", "type": "string"},
                    {"name": "created_at", "type": "timestamp"},
                    {"name": "order_count", "type": "number", "expressionType": "aggregate"}
                ]
            }
        }
    });

    json!({
        "packageName": "demo",
        "path": "basic",
        "type": "source",
        "dataStyles": null,
        "sources": [{
            "name": "orders",
            "description": "Customer orders",
            "views": [{"name": "by_category"}]
        }],
        "queries": [{"name": "top_categories"}],
        "modelDef": model_def.to_string(),
    })
}

pub fn demo_model() -> Model {
    serde_json::from_value(demo_model_document()).unwrap()
}

pub fn sample_query_result() -> Value {
    json!({
        "dataStyles": null,
        "modelDef": "{\"contents\":{}}",
        "queryResult": "{\"data\":{\"array_value\":[{\"one\":1}]}}",
        "warnings": []
    })
}
