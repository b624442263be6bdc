//! @acp:module "MCP Tools"
//! @acp:summary "Query execution tool"
//! @acp:domain mcp
//! @acp:layer service

use rmcp::schemars;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{MalloyError, Operation};
use crate::publisher::{ModelPath, PublisherError};
use crate::state::AppState;

pub const EXECUTE_MALLOY_QUERY: &str = "execute_malloy_query";

/// Arguments of `execute_malloy_query`
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ExecuteQueryParams {
    /// Malloy query text, e.g. "run: orders -> { group_by: status aggregate: order_count }"
    #[serde(default)]
    pub query: String,
    /// Model to run against, as <package>/<model file> (e.g. "faa/flights.malloy")
    #[serde(default)]
    pub model_path: String,
    /// Publisher project (defaults to the server's configured project)
    #[serde(default)]
    pub project: Option<String>,
}

/// Run a query and return the publisher's result unmodified.
///
/// Input is validated before the connection is consulted, so malformed
/// requests never reach the publisher.
pub async fn execute_malloy_query(
    state: &AppState,
    params: ExecuteQueryParams,
) -> Result<Value, MalloyError> {
    if params.query.trim().is_empty() {
        return Err(MalloyError::validation("Query must not be empty").with_context("field", "query"));
    }
    let model = ModelPath::parse(&params.model_path)
        .map_err(|e| MalloyError::invalid_model_path(&params.model_path, e))?;

    let project = params
        .project
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(&state.config().default_project)
        .to_string();

    let session = state.session().await?;

    info!("Executing query against {}/{}", project, model);

    match session.execute_query(&project, &model, &params.query).await {
        Ok(result) => {
            info!("Query against {} succeeded", model);
            Ok(result)
        }
        Err(e) => {
            let mut err = MalloyError::from_publisher(&e, Operation::Query)
                .with_context("query", params.query.as_str())
                .with_context("model_path", model.to_string())
                .with_context("project", project.as_str());
            if matches!(e, PublisherError::Timeout) {
                err = err.with_context("timeout_secs", state.config().request_timeout.as_secs());
            }
            warn!("Query against {} failed: {}", model, err.message());
            Err(err)
        }
    }
}
