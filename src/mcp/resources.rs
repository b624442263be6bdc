//! @acp:module "MCP Resources"
//! @acp:summary "Declarative table of read-only Malloy metadata resources"
//! @acp:domain mcp
//! @acp:layer service
//!
//! Each route pairs a URI template with the handler kind that serves it.
//! Handlers receive the publisher session explicitly and never mutate state.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::{MalloyError, Operation};
use crate::publisher::{ModelPath, PublisherSession};
use crate::state::AppState;

pub const HEALTHCHECK_URI: &str = "malloy://healthcheck";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    ProjectMetadata,
    Package,
    Model,
    Healthcheck,
}

/// One entry of the resource table
#[derive(Debug)]
pub struct ResourceRoute {
    pub template: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ResourceKind,
}

impl ResourceRoute {
    pub fn is_templated(&self) -> bool {
        self.template.contains('{')
    }
}

pub const RESOURCE_ROUTES: &[ResourceRoute] = &[
    ResourceRoute {
        template: "malloy://project/{project}/metadata",
        name: "project-metadata",
        description: "Metadata for a Malloy project, including its packages and models",
        kind: ResourceKind::ProjectMetadata,
    },
    ResourceRoute {
        template: "malloy://project/{project}/package/{package_name}",
        name: "package-metadata",
        description: "Metadata for a package within a Malloy project",
        kind: ResourceKind::Package,
    },
    ResourceRoute {
        template: "malloy://project/{project}/model/{model_path}",
        name: "model-metadata",
        description: "Compiled model metadata: sources, views, named queries and schema. \
                      model_path has the form <package>/<model file>.",
        kind: ResourceKind::Model,
    },
    ResourceRoute {
        template: HEALTHCHECK_URI,
        name: "healthcheck",
        description: "Server health and publisher connection status",
        kind: ResourceKind::Healthcheck,
    },
];

/// Placeholders whose value may span several path segments
const MULTI_SEGMENT_PARAMS: &[&str] = &["model_path"];

/// Parameters captured from a URI, percent-decoded
pub type RouteParams = BTreeMap<&'static str, String>;

/// Find the route serving `uri`. Unknown addresses are NotFound; captured
/// values that are badly encoded, or contain `/` where a single segment is
/// expected, are ValidationErrors.
pub fn resolve(uri: &str) -> Result<(&'static ResourceRoute, RouteParams), MalloyError> {
    let (route, raw) = RESOURCE_ROUTES
        .iter()
        .find_map(|route| match_template(route.template, uri).map(|params| (route, params)))
        .ok_or_else(|| {
            MalloyError::not_found(format!("Unknown resource: {}", uri)).with_context("uri", uri)
        })?;

    let mut params = RouteParams::new();
    for (name, value) in raw {
        params.insert(name, decode_param(name, value)?);
    }
    Ok((route, params))
}

fn decode_param(name: &'static str, raw: &str) -> Result<String, MalloyError> {
    let decoded = urlencoding::decode(raw).map_err(|_| {
        MalloyError::validation(format!("Resource address has a malformed '{}'", name))
            .with_context("field", name)
            .with_context("value", raw)
    })?;

    if decoded.contains('/') && !MULTI_SEGMENT_PARAMS.contains(&name) {
        return Err(
            MalloyError::validation(format!("'{}' must be a single path segment", name))
                .with_context("field", name)
                .with_context("value", &*decoded),
        );
    }
    Ok(decoded.into_owned())
}

/// Match `uri` against a `{placeholder}` template.
///
/// Placeholders match one path segment, except a trailing placeholder which
/// takes the rest of the URI. Values are returned still encoded.
fn match_template<'u>(
    template: &'static str,
    uri: &'u str,
) -> Option<BTreeMap<&'static str, &'u str>> {
    let mut params = BTreeMap::new();
    let mut tpl = template;
    let mut rest = uri;

    loop {
        let Some(open) = tpl.find('{') else {
            return (tpl == rest).then_some(params);
        };

        let literal = &tpl[..open];
        rest = rest.strip_prefix(literal)?;

        let close = open + tpl[open..].find('}')?;
        let name = &tpl[open + 1..close];
        tpl = &tpl[close + 1..];

        if tpl.is_empty() {
            params.insert(name, rest);
            return Some(params);
        }

        let next_literal = match tpl.find('{') {
            Some(i) => &tpl[..i],
            None => tpl,
        };
        let end = rest.find(next_literal)?;
        let value = &rest[..end];
        if value.contains('/') {
            return None;
        }
        params.insert(name, value);
        rest = &rest[end..];
    }
}

/// Read a resource, returning its JSON document
pub async fn read(state: &AppState, uri: &str) -> Result<Value, MalloyError> {
    let (route, params) = resolve(uri)?;
    debug!("Reading resource {} via {:?}", uri, route.kind);

    if route.kind == ResourceKind::Healthcheck {
        return Ok(healthcheck(state).await);
    }

    let project = required_param(&params, "project")?;

    // Validate inputs before touching the connection
    let model = match route.kind {
        ResourceKind::Model => {
            let raw = params.get("model_path").map(String::as_str).unwrap_or("");
            Some(ModelPath::parse(raw).map_err(|e| MalloyError::invalid_model_path(raw, e))?)
        }
        _ => None,
    };
    let package = match route.kind {
        ResourceKind::Package => Some(required_param(&params, "package_name")?),
        _ => None,
    };

    let session = state.session().await?;

    match (route.kind, package, model) {
        (ResourceKind::Package, Some(package), _) => {
            package_metadata(session.as_ref(), project, package).await
        }
        (ResourceKind::Model, _, Some(model)) => {
            model_metadata(session.as_ref(), project, &model).await
        }
        _ => project_metadata(session.as_ref(), project).await,
    }
}

fn required_param<'a>(params: &'a RouteParams, name: &str) -> Result<&'a str, MalloyError> {
    match params.get(name).map(|v| v.trim()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(MalloyError::validation(format!("Resource address is missing '{}'", name))
            .with_context("field", name)),
    }
}

/// Project document plus its packages and the models they contain.
///
/// A package whose models cannot be listed is logged and left out of
/// `models`; the project read itself still succeeds.
pub async fn project_metadata(
    session: &dyn PublisherSession,
    project: &str,
) -> Result<Value, MalloyError> {
    let translate = |e| {
        MalloyError::from_publisher(&e, Operation::Metadata).with_context("project", project)
    };

    let details = session.get_project(project).await.map_err(translate)?;
    let packages = session.list_packages(project).await.map_err(translate)?;

    let mut models = Vec::new();
    for package in &packages {
        let Some(name) = package.get("name").and_then(Value::as_str) else {
            continue;
        };
        match session.list_models(project, name).await {
            Ok(listing) => models.extend(listing),
            Err(e) => warn!(
                "Skipping models of package '{}' in project '{}': {}",
                name, project, e
            ),
        }
    }

    let mut doc = match details {
        Value::Object(map) => map,
        _ => Map::from_iter([("name".to_string(), json!(project))]),
    };
    doc.insert("packages".to_string(), Value::Array(packages));
    doc.insert("models".to_string(), Value::Array(models));
    Ok(Value::Object(doc))
}

pub async fn package_metadata(
    session: &dyn PublisherSession,
    project: &str,
    package: &str,
) -> Result<Value, MalloyError> {
    session.get_package(project, package).await.map_err(|e| {
        MalloyError::from_publisher(&e, Operation::Metadata)
            .with_context("project", project)
            .with_context("package", package)
    })
}

pub async fn model_metadata(
    session: &dyn PublisherSession,
    project: &str,
    model: &ModelPath,
) -> Result<Value, MalloyError> {
    session.get_model(project, model).await.map_err(|e| {
        MalloyError::from_publisher(&e, Operation::Metadata)
            .with_context("project", project)
            .with_context("model_path", model.to_string())
    })
}

/// Served without the readiness gate so clients can see why calls fail
pub async fn healthcheck(state: &AppState) -> Value {
    let connection = state.connection_label().await;
    let status = if connection == "ready" {
        "healthy"
    } else {
        "unavailable"
    };
    json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "publisher_url": state.config().display_url(),
        "connection": connection,
        "checked_at": chrono::Utc::now().to_rfc3339(),
    })
}
