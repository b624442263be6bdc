//! @acp:module "Query Prompt"
//! @acp:summary "Query-creation guidance generated from a model's schema"
//! @acp:domain prompt
//! @acp:layer service
//!
//! # Query Creation Prompt
//!
//! Fetches a compiled model from the publisher, flattens it into a
//! [`ModelSchema`] (sources, dimensions, measures, views, named queries) and
//! renders natural-language guidance for writing a query against it.

pub mod rendering;
pub mod schema;

use thiserror::Error;

use crate::error::{MalloyError, Operation};
use crate::publisher::{Model, ModelPath, PublisherError, PublisherSession};

use rendering::PromptRenderer;
pub use schema::ModelSchema;

/// Prompt generation errors
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to compile prompt template: {0}")]
    Template(String),
    #[error("failed to render prompt: {0}")]
    Render(String),
}

/// Query-creation prompt output
#[derive(Debug, Clone)]
pub struct QueryPrompt {
    pub description: String,
    pub text: String,
}

/// Builds query-creation prompts
pub struct QueryPromptGenerator {
    renderer: PromptRenderer,
}

impl QueryPromptGenerator {
    pub fn new() -> Result<Self, PromptError> {
        Ok(Self {
            renderer: PromptRenderer::new()?,
        })
    }

    /// Fetch the model's schema. Fails with ValidationError for a malformed
    /// path and NotFoundError when the publisher does not know the model.
    pub async fn load_schema(
        &self,
        session: &dyn PublisherSession,
        project: &str,
        model_path: &str,
    ) -> Result<ModelSchema, MalloyError> {
        let parsed = ModelPath::parse(model_path)
            .map_err(|e| MalloyError::invalid_model_path(model_path, e))?;

        let translate = |e: PublisherError| {
            MalloyError::from_publisher(&e, Operation::Metadata)
                .with_context("model_path", parsed.to_string())
                .with_context("project", project)
        };

        let document = session.get_model(project, &parsed).await.map_err(translate)?;
        let model: Model = serde_json::from_value(document).map_err(|e| {
            translate(PublisherError::Decode {
                detail: e.to_string(),
            })
        })?;

        Ok(ModelSchema::from_model(&parsed.to_string(), &model))
    }

    pub fn render(
        &self,
        schema: &ModelSchema,
        requirements: Option<&str>,
    ) -> Result<QueryPrompt, PromptError> {
        let text = self.renderer.render(schema, requirements)?;
        Ok(QueryPrompt {
            description: format!("Guidance for writing a Malloy query against {}", schema.model_path),
            text,
        })
    }
}
