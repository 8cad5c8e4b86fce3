//! Tool declarations and dispatch
//!
//! The turn pipeline does not know what any tool does. It sees two things:
//!
//! - a list of [`ToolDeclaration`]s sent with every turn request, and
//! - a [`ToolDispatcher`] it calls with `(name, arguments)` when the model has
//!   finished writing the arguments of a function call.
//!
//! [`ToolRegistry`] is the stock dispatcher: a set of [`Tool`]s, each an async
//! handler plus a JSON schema, optionally joined by the hosted search tools.
//!
//! ```rust,no_run
//! use turnstream::{tool, ToolRegistry};
//! use serde_json::json;
//!
//! let weather = tool("get_weather", "Current weather for a city")
//!     .param("city", "string")
//!     .build(|args| async move {
//!         let city = args["city"].as_str().unwrap_or("unknown").to_string();
//!         Ok(json!({"city": city, "temp": 21}))
//!     });
//!
//! let registry = ToolRegistry::new().with_tool(weather).with_web_search();
//! ```

use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Async handler behind a function tool
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// Tool entry of a turn request, in the Responses flat format
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDeclaration {
    Function {
        name: String,
        description: String,
        parameters: Value,
    },
    #[serde(rename = "web_search_preview")]
    WebSearch,
    FileSearch { vector_store_ids: Vec<String> },
}

/// Executes function calls requested by the model.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Runs `name` with strictly parsed `arguments`.
    async fn dispatch(&self, name: &str, arguments: Value) -> Result<Value>;

    /// Tools to advertise on each turn request.
    fn declarations(&self) -> Vec<ToolDeclaration> {
        Vec::new()
    }
}

/// A function tool the model can call
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: ToolHandler,
}

impl Tool {
    /// Creates a tool.
    ///
    /// `input_schema` is either a full JSON schema (`{"type": "object",
    /// "properties": ...}`) or the shorthand `{"param": "type"}`, which is
    /// expanded with every parameter required.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: expand_schema(input_schema),
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub async fn execute(&self, arguments: Value) -> Result<Value> {
        (self.handler)(arguments).await
    }

    pub fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration::Function {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

fn expand_schema(schema: Value) -> Value {
    let Value::Object(obj) = schema else {
        return serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        });
    };
    if obj.contains_key("type") && obj.contains_key("properties") {
        return Value::Object(obj);
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for (param_name, param_type) in obj {
        match param_type {
            Value::String(type_str) => {
                properties.insert(param_name.clone(), type_to_json_schema(&type_str));
                required.push(param_name);
            }
            Value::Object(mut prop) => {
                // "optional"/"required" are shorthand flags, not schema keywords
                let is_optional = prop
                    .remove("optional")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let is_required = prop.remove("required").and_then(|v| v.as_bool());
                let has_default = prop.contains_key("default");
                properties.insert(param_name.clone(), Value::Object(prop));

                let required_here = match is_required {
                    Some(flag) => flag,
                    None => !is_optional && !has_default,
                };
                if required_here {
                    required.push(param_name);
                }
            }
            _ => log::warn!("ignoring parameter {} with unsupported schema", param_name),
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

fn type_to_json_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        _ => "string",
    };
    serde_json::json!({ "type": json_type })
}

/// Builder for [`Tool`]
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: serde_json::Map<String, Value>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::Map::new(),
        }
    }

    /// Replaces the schema. Non-object schemas are ignored.
    pub fn schema(mut self, schema: Value) -> Self {
        match schema {
            Value::Object(map) => self.schema = map,
            other => log::warn!("tool {}: ignoring non-object schema {}", self.name, other),
        }
        self
    }

    /// Adds a required parameter using the shorthand type names.
    pub fn param(mut self, name: &str, type_str: &str) -> Self {
        self.schema
            .insert(name.to_string(), Value::String(type_str.to_string()));
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> Tool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Tool::new(self.name, self.description, Value::Object(self.schema), handler)
    }
}

/// Starts building a tool.
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}

/// Function tools plus hosted tool declarations
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    hosted: Vec<ToolDeclaration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function tool, replacing any tool with the same name.
    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.retain(|t| t.name != tool.name);
        self.tools.push(tool);
        self
    }

    pub fn with_web_search(mut self) -> Self {
        self.hosted.push(ToolDeclaration::WebSearch);
        self
    }

    pub fn with_file_search(mut self, vector_store_ids: Vec<String>) -> Self {
        self.hosted
            .push(ToolDeclaration::FileSearch { vector_store_ids });
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.hosted.is_empty()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn dispatch(&self, name: &str, arguments: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::tool(format!("unknown tool '{}'", name)))?;
        log::debug!("executing tool {} with {}", name, arguments);
        tool.execute(arguments).await
    }

    fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools
            .iter()
            .map(Tool::declaration)
            .chain(self.hosted.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_tool() -> Tool {
        tool("add", "Add two numbers")
            .param("a", "number")
            .param("b", "number")
            .build(|args| async move {
                let a = args
                    .get("a")
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| Error::tool("Parameter 'a' must be a number"))?;
                let b = args
                    .get("b")
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| Error::tool("Parameter 'b' must be a number"))?;
                Ok(json!({"result": a + b}))
            })
    }

    #[test]
    fn test_type_to_json_schema() {
        assert_eq!(type_to_json_schema("string"), json!({"type": "string"}));
        assert_eq!(type_to_json_schema("i64"), json!({"type": "integer"}));
        assert_eq!(type_to_json_schema("bool"), json!({"type": "boolean"}));
        assert_eq!(type_to_json_schema("whatever"), json!({"type": "string"}));
    }

    #[test]
    fn test_expand_shorthand_schema() {
        let result = expand_schema(json!({
            "city": "string",
            "units": {"type": "string", "optional": true},
            "days": {"type": "integer", "default": 1}
        }));
        assert_eq!(result["type"], "object");
        assert_eq!(result["properties"]["units"], json!({"type": "string"}));
        assert_eq!(result["required"], json!(["city"]));
    }

    #[test]
    fn test_full_schema_is_kept() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        assert_eq!(expand_schema(schema.clone()), schema);
    }

    #[test]
    fn test_declaration_wire_format() {
        let registry = ToolRegistry::new()
            .with_tool(add_tool())
            .with_web_search()
            .with_file_search(vec!["vs_1".into()]);
        let value = serde_json::to_value(registry.declarations()).unwrap();
        assert_eq!(value[0]["type"], "function");
        assert_eq!(value[0]["name"], "add");
        assert_eq!(value[0]["parameters"]["required"], json!(["a", "b"]));
        assert_eq!(value[1], json!({"type": "web_search_preview"}));
        assert_eq!(
            value[2],
            json!({"type": "file_search", "vector_store_ids": ["vs_1"]})
        );
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let registry = ToolRegistry::new().with_tool(add_tool());
        let result = registry
            .dispatch("add", json!({"a": 5.0, "b": 3.0}))
            .await
            .unwrap();
        assert_eq!(result["result"], 8.0);

        let err = registry.dispatch("add", json!({"a": 1})).await.unwrap_err();
        assert!(matches!(err, Error::Tool(_)));

        let err = registry.dispatch("missing", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "tool failed: unknown tool 'missing'");
    }

    #[test]
    fn test_non_object_schema_ignored() {
        let tool = tool("test", "Test tool")
            .schema(json!("string"))
            .param("key", "number")
            .build(|_| async { Ok(json!({})) });
        assert_eq!(tool.input_schema()["properties"]["key"]["type"], "number");
    }

    #[test]
    fn test_later_registration_replaces() {
        let registry = ToolRegistry::new()
            .with_tool(add_tool())
            .with_tool(tool("add", "Replacement").build(|_| async { Ok(json!(0)) }));
        assert_eq!(registry.declarations().len(), 1);
        assert_eq!(registry.get("add").unwrap().description(), "Replacement");
    }
}
