//! @acp:module "Model Schema"
//! @acp:summary "Flattened view of a compiled model's sources and fields"
//! @acp:domain prompt
//! @acp:layer model

use serde::Serialize;
use serde_json::Value;

use crate::publisher::Model;

/// Everything the prompt needs to know about a model
#[derive(Debug, Clone, Serialize)]
pub struct ModelSchema {
    pub model_path: String,
    pub sources: Vec<SourceSchema>,
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSchema {
    pub name: String,
    pub description: Option<String>,
    pub dimensions: Vec<FieldInfo>,
    pub measures: Vec<FieldInfo>,
    pub views: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub field_type: String,
}

impl ModelSchema {
    pub fn from_model(model_path: &str, model: &Model) -> Self {
        let contents = model_contents(model);

        let mut sources: Vec<SourceSchema> = model
            .sources
            .iter()
            .map(|source| {
                let mut schema = SourceSchema {
                    name: source.name.clone(),
                    description: source.description.clone(),
                    dimensions: Vec::new(),
                    measures: Vec::new(),
                    views: source.views.iter().map(|v| v.name.clone()).collect(),
                };
                if let Some(def) = contents.as_ref().and_then(|c| c.get(&source.name)) {
                    schema.absorb_fields(def);
                }
                schema
            })
            .collect();

        // Older publishers only ship the model definition
        if sources.is_empty() {
            if let Some(Value::Object(entries)) = &contents {
                for (name, def) in entries {
                    if def.get("type").and_then(Value::as_str) != Some("source") {
                        continue;
                    }
                    let mut schema = SourceSchema {
                        name: name.clone(),
                        description: None,
                        dimensions: Vec::new(),
                        measures: Vec::new(),
                        views: Vec::new(),
                    };
                    schema.absorb_fields(def);
                    sources.push(schema);
                }
            }
        }

        Self {
            model_path: model_path.to_string(),
            sources,
            queries: model.queries.iter().map(|q| q.name.clone()).collect(),
        }
    }

    /// Example query over the first source, if there is one
    pub fn example_query(&self) -> Option<String> {
        let source = self.sources.first()?;

        let group_by = source
            .dimensions
            .iter()
            .find(|f| f.field_type == "string")
            .or_else(|| source.dimensions.first());

        let mut body = Vec::new();
        if let Some(field) = group_by {
            body.push(format!("  group_by: {}", field.name));
        }
        match source.measures.first() {
            Some(measure) => body.push(format!("  aggregate: {}", measure.name)),
            None => body.push("  aggregate: row_count is count()".to_string()),
        }
        if group_by.is_some() {
            body.push("  limit: 10".to_string());
        }

        Some(format!("run: {} -> {{\n{}\n}}", source.name, body.join("\n")))
    }
}

impl SourceSchema {
    fn absorb_fields(&mut self, def: &Value) {
        let Some(fields) = def.get("fields").and_then(Value::as_array) else {
            return;
        };

        for field in fields {
            let Some(name) = field
                .get("as")
                .or_else(|| field.get("name"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let field_type = field
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();

            // Joins are nested sources, not columns
            if field.get("join").is_some() {
                continue;
            }

            if field_type == "turtle" {
                if !self.views.iter().any(|v| v == name) {
                    self.views.push(name.to_string());
                }
                continue;
            }

            let info = FieldInfo {
                name: name.to_string(),
                field_type,
            };
            if field.get("expressionType").and_then(Value::as_str) == Some("aggregate") {
                self.measures.push(info);
            } else {
                self.dimensions.push(info);
            }
        }
    }
}

/// `contents` of the model definition, which may arrive as a JSON string or an object
fn model_contents(model: &Model) -> Option<Value> {
    let def = match model.model_def.as_ref()? {
        Value::String(raw) => serde_json::from_str::<Value>(raw).ok()?,
        other => other.clone(),
    };
    match def.get("contents") {
        Some(contents @ Value::Object(_)) => Some(contents.clone()),
        _ => None,
    }
}
