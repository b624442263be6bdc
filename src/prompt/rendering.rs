//! @acp:module "Prompt Rendering"
//! @acp:summary "Handlebars template for query-creation guidance"
//! @acp:domain prompt
//! @acp:layer service

use handlebars::Handlebars;
use serde::Serialize;

use super::schema::ModelSchema;
use super::PromptError;

const TEMPLATE_NAME: &str = "create_malloy_query";

const QUERY_PROMPT_TEMPLATE: &str = r#"You are writing a Malloy query against the model `{{schema.model_path}}`.

{{#if schema.sources}}
## Sources
{{#each schema.sources}}

### {{name}}{{#if description}} - {{description}}{{/if}}
{{#if dimensions}}
Dimensions:
{{#each dimensions}}
- {{name}} ({{field_type}})
{{/each}}
{{/if}}
{{#if measures}}
Measures:
{{#each measures}}
- {{name}}
{{/each}}
{{/if}}
{{#if views}}
Views: {{#each views}}{{this}}{{#unless @last}}, {{/unless}}{{/each}}
{{/if}}
{{/each}}
{{else}}
The model does not define any sources.
{{/if}}
{{#if schema.queries}}

Named queries: {{#each schema.queries}}{{this}}{{#unless @last}}, {{/unless}}{{/each}}
{{/if}}
{{#if example}}

## Example query shape
```malloy
{{example}}
```
{{/if}}

## Guidelines
{{#each best_practices}}
- {{this}}
{{/each}}
{{#if requirements}}

Create a Malloy query for: {{requirements}}
{{else}}

Use only the sources and fields listed above when composing the query.
{{/if}}
"#;

const BEST_PRACTICES: &[&str] = &[
    "Use clear and descriptive names for dimensions and measures",
    "Leverage Malloy's nested queries for complex analysis",
    "Use appropriate aggregations based on data types",
    "Include relevant filters to focus the analysis",
    "Consider performance implications of joins and aggregations",
];

#[derive(Serialize)]
struct PromptData<'a> {
    schema: &'a ModelSchema,
    example: Option<String>,
    best_practices: &'static [&'static str],
    requirements: Option<&'a str>,
}

/// Renderer for query-creation prompts
pub struct PromptRenderer {
    handlebars: Handlebars<'static>,
}

impl PromptRenderer {
    pub fn new() -> Result<Self, PromptError> {
        let mut handlebars = Handlebars::new();
        // Prompt text is not HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
            .register_template_string(TEMPLATE_NAME, QUERY_PROMPT_TEMPLATE)
            .map_err(|e| PromptError::Template(e.to_string()))?;

        Ok(Self { handlebars })
    }

    pub fn render(
        &self,
        schema: &ModelSchema,
        requirements: Option<&str>,
    ) -> Result<String, PromptError> {
        let data = PromptData {
            schema,
            example: schema.example_query(),
            best_practices: BEST_PRACTICES,
            requirements: requirements.map(str::trim).filter(|r| !r.is_empty()),
        };

        self.handlebars
            .render(TEMPLATE_NAME, &data)
            .map_err(|e| PromptError::Render(e.to_string()))
    }
}
