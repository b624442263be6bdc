//! @acp:module "Error Translation"
//! @acp:summary "Caller-facing error taxonomy and mapping from publisher failures"
//! @acp:domain errors
//! @acp:layer service
//!
//! Every failure a caller can see is a [`MalloyError`] of one of four kinds.
//! Messages are written for humans; diagnostics go into the context map,
//! which is returned as structured MCP error data.

use std::collections::BTreeMap;
use std::fmt;

use rmcp::ErrorData as McpError;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::publisher::{ModelPathError, PublisherError};

/// Diagnostic fields attached to an error
pub type ErrorContext = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Publisher unreachable or connection not ready
    Connection,
    /// Caller input is malformed
    Validation,
    /// Referenced project, package or model does not exist
    NotFound,
    /// Publisher could not run a query
    QueryExecution,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "ConnectionError",
            Self::Validation => "ValidationError",
            Self::NotFound => "NotFoundError",
            Self::QueryExecution => "QueryExecutionError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the failing publisher call was doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Metadata,
    Query,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct MalloyError {
    kind: ErrorKind,
    message: String,
    context: ErrorContext,
}

impl MalloyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Handler called while the publisher connection is not ready
    pub fn not_ready(state: &str) -> Self {
        Self::connection("Publisher connection is not ready").with_context("connection", state)
    }

    /// Invalid `model_path` argument
    pub fn invalid_model_path(raw: &str, err: ModelPathError) -> Self {
        Self::validation(format!("Invalid model path: {}", err)).with_context("model_path", raw)
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// `Error: <message>` followed by an indented context listing
    pub fn render(&self) -> String {
        let mut out = format!("Error: {}", self.message);
        if !self.context.is_empty() {
            out.push_str("\nContext:");
            for (key, value) in &self.context {
                match value {
                    Value::String(s) => out.push_str(&format!("\n  {}: {}", key, s)),
                    other => out.push_str(&format!("\n  {}: {}", key, other)),
                }
            }
        }
        out
    }

    /// Map a publisher failure to the caller-facing taxonomy.
    ///
    /// A query that fails for any reason other than an unreachable
    /// publisher is an execution failure, unknown models included. Metadata
    /// reads keep NotFound and treat timeouts and backend failures as
    /// connection problems.
    pub fn from_publisher(err: &PublisherError, operation: Operation) -> Self {
        let kind = match (err, operation) {
            (PublisherError::Unreachable { .. }, _) => ErrorKind::Connection,
            (_, Operation::Query) => ErrorKind::QueryExecution,
            (PublisherError::NotFound { .. }, Operation::Metadata) => ErrorKind::NotFound,
            (PublisherError::Rejected { .. }, Operation::Metadata) => ErrorKind::Validation,
            (
                PublisherError::Backend { .. }
                | PublisherError::Timeout
                | PublisherError::Decode { .. },
                Operation::Metadata,
            ) => ErrorKind::Connection,
        };

        if let PublisherError::Unreachable { detail } | PublisherError::Decode { detail } = err {
            debug!("Publisher failure detail: {}", detail);
        }

        let message = match kind {
            ErrorKind::QueryExecution => format!("Failed to execute Malloy query: {}", err),
            _ => capitalize(&err.to_string()),
        };

        let mut error = Self::new(kind, message);
        if let Some(status) = err.status() {
            error = error.with_context("status", status);
        }
        error
    }
}

impl From<MalloyError> for McpError {
    fn from(err: MalloyError) -> Self {
        let data = Some(json!({
            "kind": err.kind.as_str(),
            "context": err.context,
        }));

        match err.kind {
            ErrorKind::Validation => McpError::invalid_params(err.message, data),
            ErrorKind::NotFound => McpError::resource_not_found(err.message, data),
            ErrorKind::Connection | ErrorKind::QueryExecution => {
                McpError::internal_error(err.message, data)
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
