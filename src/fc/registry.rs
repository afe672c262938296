use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::config::ToolConfig;

/// A tool the model may invoke inline.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub argument_schema: Value,
}

/// A single argument validation problem, keyed by JSON path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Read-only set of registered tools, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: FxHashMap<String, ToolSpec>,
}

impl ToolRegistry {
    #[must_use]
    pub fn from_config(tools: &[ToolConfig]) -> Self {
        let tools = tools
            .iter()
            .map(|tool| {
                (
                    tool.name.clone(),
                    ToolSpec {
                        name: tool.name.clone(),
                        argument_schema: tool.argument_schema.clone(),
                    },
                )
            })
            .collect();
        Self { tools }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check completed arguments against the tool's schema.
    ///
    /// Only structural checks are made: arguments must be an object and
    /// carry every key listed in the schema's `required` array.
    #[must_use]
    pub fn validate_arguments(&self, name: &str, arguments: &Value) -> Vec<ValidationError> {
        let Some(tool) = self.get(name) else {
            return vec![ValidationError {
                path: name.to_string(),
                message: format!("unknown tool '{name}'"),
            }];
        };
        let Some(object) = arguments.as_object() else {
            return vec![ValidationError {
                path: name.to_string(),
                message: format!("arguments must be a JSON object, got {}", json_type_name(arguments)),
            }];
        };

        tool.argument_schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter(|key| !object.contains_key(*key))
            .map(|key| ValidationError {
                path: format!("{name}.{key}"),
                message: "missing required argument".to_string(),
            })
            .collect()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
