//! @acp:module "Publisher Client"
//! @acp:summary "Session interface and data shapes for the Malloy Publisher service"
//! @acp:domain publisher
//! @acp:layer service
//!
//! Handlers talk to the publisher only through [`PublisherSession`], obtained
//! from a [`Connector`]. The HTTP implementation lives in [`http`]; every
//! session handed to handlers is wrapped in a [`BoundedSession`] deadline.

pub mod http;
#[cfg(test)]
pub mod testing;
pub mod timeout;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

pub use http::HttpConnector;
pub use timeout::BoundedSession;

/// Failures reported by a publisher session
#[derive(Debug, Error)]
pub enum PublisherError {
    /// Transport-level failure; `detail` is for logs only
    #[error("publisher service is unreachable")]
    Unreachable { detail: String },

    #[error("{resource} was not found")]
    NotFound { resource: String },

    /// 4xx other than 404
    #[error("publisher rejected the request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// 5xx
    #[error("publisher failed to handle the request (status {status}): {message}")]
    Backend { status: u16, message: String },

    #[error("publisher request timed out")]
    Timeout,

    /// Response body did not match the expected shape; `detail` is for logs only
    #[error("publisher returned a response that could not be read")]
    Decode { detail: String },
}

impl PublisherError {
    /// HTTP status reported by the publisher, if the failure carried one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } | Self::Backend { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            _ => None,
        }
    }
}

/// Malformed model path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelPathError {
    #[error("model path must not be empty")]
    Empty,
    #[error("model path must have the form <package>/<model>")]
    MissingPackage,
    #[error("model path contains an empty segment")]
    EmptySegment,
    #[error("model path must not contain '.' or '..' segments")]
    RelativeSegment,
}

/// A model location: `<package>/<path within package>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPath {
    package: String,
    path: String,
}

impl ModelPath {
    pub fn parse(raw: &str) -> Result<Self, ModelPathError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ModelPathError::Empty);
        }

        let (package, path) = raw.split_once('/').ok_or(ModelPathError::MissingPackage)?;

        for segment in std::iter::once(package).chain(path.split('/')) {
            match segment {
                "" => return Err(ModelPathError::EmptySegment),
                "." | ".." => return Err(ModelPathError::RelativeSegment),
                _ => {}
            }
        }

        Ok(Self {
            package: package.to_string(),
            path: path.to_string(),
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// Path of the model inside its package
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for ModelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.path)
    }
}

/// Project entry from the project listing; only the name is interpreted
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Compiled model metadata, as far as query guidance needs it.
///
/// Handlers that return model documents pass the publisher's JSON through
/// untouched; this shape is only parsed out of it for prompt rendering.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[serde(default, deserialize_with = "null_as_default")]
    pub sources: Vec<Source>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub queries: Vec<NamedQuery>,
    /// Malloy model definition; the publisher sends it as a JSON-encoded string
    #[serde(default)]
    pub model_def: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Source {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub views: Vec<NamedQuery>,
}

/// A named query or view
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NamedQuery {
    pub name: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// An open session with the publisher service.
///
/// Documents (`Value`) are returned exactly as the publisher sent them.
#[async_trait]
pub trait PublisherSession: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<Project>, PublisherError>;

    async fn get_project(&self, project: &str) -> Result<Value, PublisherError>;

    async fn list_packages(&self, project: &str) -> Result<Vec<Value>, PublisherError>;

    async fn get_package(&self, project: &str, package: &str) -> Result<Value, PublisherError>;

    /// Models contained in a package
    async fn list_models(
        &self,
        project: &str,
        package: &str,
    ) -> Result<Vec<Value>, PublisherError>;

    async fn get_model(&self, project: &str, model: &ModelPath) -> Result<Value, PublisherError>;

    /// Run a query; the result (`dataStyles`, `modelDef`, `queryResult`, ...) is opaque
    async fn execute_query(
        &self,
        project: &str,
        model: &ModelPath,
        query: &str,
    ) -> Result<Value, PublisherError>;

    /// Release the session. Must be safe to call more than once.
    async fn close(&self);
}

/// Opens publisher sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, base_url: &str) -> Result<Arc<dyn PublisherSession>, PublisherError>;
}
