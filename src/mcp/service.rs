//! @acp:module "MCP Service"
//! @acp:summary "Core MCP service implementation using rmcp SDK"
//! @acp:domain mcp
//! @acp:layer service
//!
//! Implements the ServerHandler trait for the Malloy publisher adapter.
//! Routes tool, resource and prompt requests to their handlers and turns
//! every failure into a structured MCP error.

use rmcp::{model::*, schemars, ErrorData as McpError, ServerHandler};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use super::resources::{self, HEALTHCHECK_URI, RESOURCE_ROUTES};
use super::tools::{self, ExecuteQueryParams, EXECUTE_MALLOY_QUERY};
use crate::error::MalloyError;
use crate::prompt::{PromptError, QueryPromptGenerator};
use crate::state::AppState;

pub const CREATE_MALLOY_QUERY: &str = "create_malloy_query";

/// Malloy MCP Service - exposes a Malloy Publisher to AI agents
#[derive(Clone)]
pub struct MalloyMcpService {
    state: AppState,
    prompts: Arc<QueryPromptGenerator>,
}

/// Arguments of the `create_malloy_query` prompt
#[derive(Debug, Default, Deserialize)]
pub struct CreateQueryPromptArgs {
    #[serde(default)]
    pub model_path: String,
    #[serde(default)]
    pub requirements: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
}

/// Convert a schemars Schema to a JsonObject for rmcp Tool
fn schema_to_json_object<T: JsonSchema>() -> Arc<serde_json::Map<String, serde_json::Value>> {
    let schema = schemars::schema_for!(T);
    let json_value = serde_json::to_value(&schema).unwrap_or_default();
    if let serde_json::Value::Object(map) = json_value {
        Arc::new(map)
    } else {
        Arc::new(serde_json::Map::new())
    }
}

/// Build an rmcp model value from its JSON wire form
fn from_wire<T: DeserializeOwned>(value: serde_json::Value) -> Option<T> {
    serde_json::from_value(value)
        .map_err(|e| warn!("Failed to build MCP descriptor: {}", e))
        .ok()
}

impl MalloyMcpService {
    pub fn new(state: AppState) -> Result<Self, PromptError> {
        Ok(Self {
            state,
            prompts: Arc::new(QueryPromptGenerator::new()?),
        })
    }

    fn build_tools() -> Vec<Tool> {
        vec![Tool::new(
            EXECUTE_MALLOY_QUERY,
            "Execute a Malloy query against a model hosted by the Malloy Publisher and return \
             the raw result (dataStyles, modelDef, queryResult). Read the model resource or use \
             the create_malloy_query prompt first to learn the available sources and fields.",
            schema_to_json_object::<ExecuteQueryParams>(),
        )]
    }

    fn build_resource_templates() -> Vec<ResourceTemplate> {
        RESOURCE_ROUTES
            .iter()
            .filter(|route| route.is_templated())
            .filter_map(|route| {
                from_wire(serde_json::json!({
                    "uriTemplate": route.template,
                    "name": route.name,
                    "description": route.description,
                    "mimeType": "application/json",
                }))
            })
            .collect()
    }

    fn build_resources(&self) -> Vec<Resource> {
        let project = &self.state.config().default_project;
        let descriptors = [
            serde_json::json!({
                "uri": HEALTHCHECK_URI,
                "name": "healthcheck",
                "description": "Server health and publisher connection status",
                "mimeType": "application/json",
            }),
            serde_json::json!({
                "uri": format!("malloy://project/{}/metadata", project),
                "name": format!("{}-metadata", project),
                "description": format!("Metadata for the default project '{}'", project),
                "mimeType": "application/json",
            }),
        ];

        descriptors.into_iter().filter_map(from_wire).collect()
    }

    fn build_prompts() -> Vec<Prompt> {
        let arguments: Vec<PromptArgument> = [
            serde_json::json!({
                "name": "model_path",
                "description": "Model to write the query for, as <package>/<model file>",
                "required": true,
            }),
            serde_json::json!({
                "name": "requirements",
                "description": "What the query should answer",
                "required": false,
            }),
            serde_json::json!({
                "name": "project",
                "description": "Publisher project (defaults to the server's configured project)",
                "required": false,
            }),
        ]
        .into_iter()
        .filter_map(from_wire)
        .collect();

        vec![Prompt::new(
            CREATE_MALLOY_QUERY,
            Some("Guidance for writing a Malloy query against a model's schema"),
            Some(arguments),
        )]
    }

    /// Execute a Malloy query
    async fn handle_execute_query(
        &self,
        params: ExecuteQueryParams,
    ) -> Result<CallToolResult, McpError> {
        let result = tools::execute_malloy_query(&self.state, params)
            .await
            .map_err(reject)?;

        let json = serde_json::to_string_pretty(&result)
            .map_err(|e| McpError::internal_error(format!("JSON error: {}", e), None))?;

        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    /// Read a metadata resource
    async fn handle_read_resource(&self, uri: String) -> Result<ReadResourceResult, McpError> {
        let doc = resources::read(&self.state, &uri).await.map_err(reject)?;

        let text = serde_json::to_string_pretty(&doc)
            .map_err(|e| McpError::internal_error(format!("JSON error: {}", e), None))?;

        let contents = from_wire(serde_json::json!({
            "uri": uri,
            "mimeType": "application/json",
            "text": text,
        }))
        .unwrap_or_else(|| ResourceContents::text(text, uri));

        Ok(ReadResourceResult {
            contents: vec![contents],
        })
    }

    /// Build the query-creation prompt
    async fn handle_create_query_prompt(
        &self,
        args: CreateQueryPromptArgs,
    ) -> Result<GetPromptResult, McpError> {
        let project = args
            .project
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.state.config().default_project)
            .to_string();

        // Malformed paths are rejected before the connection is consulted
        let model_path = args.model_path.trim();
        crate::publisher::ModelPath::parse(model_path)
            .map_err(|e| reject(MalloyError::invalid_model_path(model_path, e)))?;

        let session = self.state.session().await.map_err(reject)?;
        let schema = self
            .prompts
            .load_schema(session.as_ref(), &project, model_path)
            .await
            .map_err(reject)?;

        let prompt = self
            .prompts
            .render(&schema, args.requirements.as_deref())
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        Ok(GetPromptResult {
            description: Some(prompt.description),
            messages: vec![PromptMessage::new_text(PromptMessageRole::User, prompt.text)],
        })
    }

    /// Parse tool arguments from request
    fn parse_args<T: DeserializeOwned>(
        args: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<T, McpError> {
        let value = serde_json::Value::Object(args.unwrap_or_default());
        serde_json::from_value(value).map_err(|e| {
            reject(
                MalloyError::validation(format!("Invalid arguments: {}", e))
                    .with_context("field", "arguments"),
            )
        })
    }
}

/// Log a handler failure and convert it for the MCP layer
fn reject(err: MalloyError) -> McpError {
    warn!(
        kind = err.kind().as_str(),
        context = %serde_json::Value::Object(err.context().clone().into_iter().collect()),
        "{}",
        err.message()
    );
    err.into()
}

#[allow(clippy::manual_async_fn)]
impl ServerHandler for MalloyMcpService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .enable_prompts()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Malloy MCP server backed by a Malloy Publisher. Read \
                 malloy://project/{project}/metadata to discover packages, \
                 malloy://project/{project}/model/{package}/{model} to see a model's schema, \
                 then run queries with execute_malloy_query. The create_malloy_query prompt \
                 summarizes a model's sources and fields."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            Ok(ListToolsResult {
                tools: Self::build_tools(),
                next_cursor: None,
            })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            let tool_name: &str = &request.name;
            match tool_name {
                EXECUTE_MALLOY_QUERY => {
                    let params: ExecuteQueryParams = Self::parse_args(request.arguments)?;
                    self.handle_execute_query(params).await
                }
                _ => Err(reject(
                    MalloyError::validation(format!("Unknown tool: {}", request.name))
                        .with_context("tool", tool_name),
                )),
            }
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        async move {
            Ok(ListResourcesResult {
                resources: self.build_resources(),
                next_cursor: None,
            })
        }
    }

    fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourceTemplatesResult, McpError>> + Send + '_
    {
        async move {
            Ok(ListResourceTemplatesResult {
                resource_templates: Self::build_resource_templates(),
                next_cursor: None,
            })
        }
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        async move { self.handle_read_resource(request.uri).await }
    }

    fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListPromptsResult, McpError>> + Send + '_ {
        async move {
            Ok(ListPromptsResult {
                prompts: Self::build_prompts(),
                next_cursor: None,
            })
        }
    }

    fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<GetPromptResult, McpError>> + Send + '_ {
        async move {
            match request.name.as_str() {
                CREATE_MALLOY_QUERY => {
                    let args: CreateQueryPromptArgs = Self::parse_args(request.arguments)?;
                    self.handle_create_query_prompt(args).await
                }
                _ => Err(reject(
                    MalloyError::validation(format!("Unknown prompt: {}", request.name))
                        .with_context("prompt", request.name.as_str()),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::publisher::testing::{sample_query_result, FakeSession};

    fn create_test_service() -> (MalloyMcpService, Arc<FakeSession>) {
        let session = Arc::new(FakeSession::demo());
        let state = AppState::for_testing(session.clone());
        (MalloyMcpService::new(state).unwrap(), session)
    }

    fn disconnected_service() -> MalloyMcpService {
        MalloyMcpService::new(AppState::new(ServerConfig::default())).unwrap()
    }

    fn error_kind(err: &McpError) -> Option<String> {
        err.data
            .as_ref()
            .and_then(|d| d.get("kind"))
            .and_then(|k| k.as_str())
            .map(str::to_string)
    }

    fn first_text(result: &CallToolResult) -> String {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_descriptors() {
        let tools = MalloyMcpService::build_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, EXECUTE_MALLOY_QUERY);

        let templates = MalloyMcpService::build_resource_templates();
        assert_eq!(templates.len(), 3);
        assert!(templates
            .iter()
            .any(|t| t.raw.uri_template == "malloy://project/{project}/model/{model_path}"));

        let prompts = MalloyMcpService::build_prompts();
        assert_eq!(prompts[0].name, CREATE_MALLOY_QUERY);
        assert_eq!(prompts[0].arguments.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn test_listed_resources() {
        let (service, _) = create_test_service();
        let resources = service.build_resources();
        let uris: Vec<&str> = resources.iter().map(|r| r.raw.uri.as_str()).collect();
        assert_eq!(uris, vec!["malloy://healthcheck", "malloy://project/home/metadata"]);
    }

    #[tokio::test]
    async fn test_execute_query_scenario_healthy() {
        let (service, session) = create_test_service();

        let result = service
            .handle_execute_query(ExecuteQueryParams {
                query: "select 1".to_string(),
                model_path: "demo/basic".to_string(),
                project: None,
            })
            .await
            .unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&first_text(&result)).unwrap();
        assert_eq!(parsed, sample_query_result());
        assert!(parsed.as_object().unwrap().contains_key("dataStyles"));
        assert_eq!(session.calls(), 1);
    }

    #[tokio::test]
    async fn test_execute_query_scenario_unreachable() {
        let service = disconnected_service();

        let err = service
            .handle_execute_query(ExecuteQueryParams {
                query: "select 1".to_string(),
                model_path: "demo/basic".to_string(),
                project: None,
            })
            .await
            .unwrap_err();

        assert_eq!(error_kind(&err).as_deref(), Some("ConnectionError"));
    }

    #[tokio::test]
    async fn test_execute_query_validation() {
        let (service, session) = create_test_service();

        let err = service
            .handle_execute_query(ExecuteQueryParams {
                query: String::new(),
                model_path: "demo/basic".to_string(),
                project: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert_eq!(error_kind(&err).as_deref(), Some("ValidationError"));
        assert_eq!(session.calls(), 0);
    }

    #[tokio::test]
    async fn test_read_resource_contents() {
        let (service, _) = create_test_service();

        let result = service
            .handle_read_resource("malloy://project/home/package/demo".to_string())
            .await
            .unwrap();

        assert_eq!(result.contents.len(), 1);
        match &result.contents[0] {
            ResourceContents::TextResourceContents { uri, text, .. } => {
                assert_eq!(uri, "malloy://project/home/package/demo");
                let doc: serde_json::Value = serde_json::from_str(text).unwrap();
                assert_eq!(doc["name"], "demo");
            }
            _ => panic!("expected text contents"),
        }
    }

    #[tokio::test]
    async fn test_read_missing_package() {
        let (service, _) = create_test_service();

        let err = service
            .handle_read_resource("malloy://project/home/package/ghost".to_string())
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::RESOURCE_NOT_FOUND);
        let data = err.data.unwrap();
        assert_eq!(data["context"]["package"], "ghost");
    }

    #[tokio::test]
    async fn test_handlers_fail_fast_when_not_ready() {
        let service = disconnected_service();

        let err = service
            .handle_read_resource("malloy://project/home/metadata".to_string())
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err).as_deref(), Some("ConnectionError"));

        let err = service
            .handle_create_query_prompt(CreateQueryPromptArgs {
                model_path: "demo/basic".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err).as_deref(), Some("ConnectionError"));
    }

    #[tokio::test]
    async fn test_create_query_prompt() {
        let (service, _) = create_test_service();

        let result = service
            .handle_create_query_prompt(CreateQueryPromptArgs {
                model_path: "demo/basic".to_string(),
                requirements: Some("orders per category".to_string()),
                project: None,
            })
            .await
            .unwrap();

        assert!(result.description.unwrap().contains("demo/basic"));
        assert_eq!(result.messages.len(), 1);
        match &result.messages[0].content {
            PromptMessageContent::Text { text } => {
                assert!(text.contains("group_by: category"));
                assert!(text.contains("Create a Malloy query for: orders per category"));
            }
            _ => panic!("expected text prompt"),
        }
    }

    #[tokio::test]
    async fn test_create_query_prompt_errors() {
        let (service, session) = create_test_service();

        let err = service
            .handle_create_query_prompt(CreateQueryPromptArgs {
                model_path: "demo/unknown".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err).as_deref(), Some("NotFoundError"));

        let calls = session.calls();
        let err = service
            .handle_create_query_prompt(CreateQueryPromptArgs::default())
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err).as_deref(), Some("ValidationError"));
        assert_eq!(session.calls(), calls);
    }

    #[test]
    fn test_parse_args_rejects_wrong_types() {
        let mut args = serde_json::Map::new();
        args.insert("query".to_string(), serde_json::json!(42));

        let err = MalloyMcpService::parse_args::<ExecuteQueryParams>(Some(args)).unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert_eq!(error_kind(&err).as_deref(), Some("ValidationError"));
        assert_eq!(err.data.unwrap()["context"]["field"], "arguments");

        let mut args = serde_json::Map::new();
        args.insert("model_path".to_string(), serde_json::json!(["demo", "basic"]));
        let err =
            MalloyMcpService::parse_args::<CreateQueryPromptArgs>(Some(args)).unwrap_err();
        assert_eq!(error_kind(&err).as_deref(), Some("ValidationError"));
    }
}
