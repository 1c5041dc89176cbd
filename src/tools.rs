//! Callable tools offered to the language model.
//!
//! Implement [`Tool`] to expose a capability the model may invoke during
//! its own turn. Tools are collected in a [`ToolRegistry`], which is passed
//! into [`GenerationProvider`](crate::llm::GenerationProvider) calls and
//! advertised to the model as function schemas.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use lexcase::error::Result;
//! use lexcase::tools::{Tool, ToolRegistry};
//!
//! pub struct StatuteLookupTool;
//!
//! #[async_trait]
//! impl Tool for StatuteLookupTool {
//!     fn name(&self) -> &str { "statute_lookup" }
//!     fn description(&self) -> &str { "Look up a statute by short title" }
//!
//!     fn parameters_schema(&self) -> Value {
//!         json!({
//!             "type": "object",
//!             "properties": { "title": { "type": "string" } },
//!             "required": ["title"]
//!         })
//!     }
//!
//!     async fn execute(&self, _params: Value) -> Result<Value> {
//!         Ok(json!("Not found"))
//!     }
//! }
//!
//! let mut tools = ToolRegistry::with_builtins();
//! tools.register(Box::new(StatuteLookupTool));
//! assert_eq!(tools.len(), 2);
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Returned by lookup tools when nothing matches.
pub const NOT_FOUND: &str = "Not found";

/// A function the model can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores (e.g. `"citation_lookup"`).
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call the tool.
    fn description(&self) -> &str;

    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;

    /// Execute with the model-supplied parameters (always a JSON object).
    async fn execute(&self, params: Value) -> Result<Value>;
}

/// Closed table of case names and their formal citations.
const MOCK_CITATIONS: [(&str, &str); 3] = [
    ("Hadley v. Baxendale", "9 Exch 341 (1854)"),
    ("Carlill v Carbolic Smoke Ball Co", "[1893] 1 QB 256"),
    ("Donoghue v Stevenson", "[1932] AC 562"),
];

/// Resolve a case name to its citation. Matching is exact after trimming.
pub fn lookup_citation(case_name: &str) -> &'static str {
    let name = case_name.trim();
    MOCK_CITATIONS
        .iter()
        .find(|(case, _)| *case == name)
        .map(|(_, citation)| *citation)
        .unwrap_or(NOT_FOUND)
}

/// Built-in citation lookup tool.
pub struct CitationLookupTool;

#[async_trait]
impl Tool for CitationLookupTool {
    fn name(&self) -> &str {
        "citation_lookup"
    }

    fn description(&self) -> &str {
        "Check the citation of a given case name. Returns the formal citation if found, else 'Not found'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "case_name": {
                    "type": "string",
                    "description": "Legal case name to look up, e.g., 'Hadley v. Baxendale'"
                }
            },
            "required": ["case_name"]
        })
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let case_name = params["case_name"].as_str().ok_or_else(|| Error::Tool {
            name: self.name().to_string(),
            message: "case_name must be a string".into(),
        })?;
        Ok(Value::String(lookup_citation(case_name).to_string()))
    }
}

/// Registry of tools bound to a generation call.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty tool registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Create a registry pre-loaded with the built-in `citation_lookup` tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CitationLookupTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    /// Find a tool by name.
    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Tool definitions in the shape Ollama's chat API expects.
    pub fn ollama_schemas(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.parameters_schema(),
                    }
                })
            })
            .collect()
    }

    /// Invoke a tool by name and render its result as text for the model.
    ///
    /// Some models send arguments as a JSON-encoded string; those are
    /// decoded before dispatch.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<String> {
        let tool = self.find(name).ok_or_else(|| Error::Tool {
            name: name.to_string(),
            message: "no such tool".into(),
        })?;
        let params = match arguments {
            Value::String(raw) => serde_json::from_str(&raw).map_err(|e| Error::Tool {
                name: name.to_string(),
                message: format!("arguments are not valid JSON: {}", e),
            })?,
            Value::Null => json!({}),
            other => other,
        };
        tracing::debug!(tool = name, "executing tool");
        Ok(match tool.execute(params).await? {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_exact_and_trimmed() {
        assert_eq!(lookup_citation("Hadley v. Baxendale"), "9 Exch 341 (1854)");
        assert_eq!(lookup_citation("  Donoghue v Stevenson \n"), "[1932] AC 562");
    }

    #[test]
    fn test_lookup_miss_is_sentinel() {
        assert_eq!(lookup_citation("hadley v. baxendale"), NOT_FOUND);
        assert_eq!(lookup_citation("Roe v Wade"), NOT_FOUND);
    }

    #[tokio::test]
    async fn test_registry_dispatches_by_name() {
        let tools = ToolRegistry::with_builtins();
        let out = tools
            .call(
                "citation_lookup",
                json!({ "case_name": "Carlill v Carbolic Smoke Ball Co" }),
            )
            .await
            .unwrap();
        assert_eq!(out, "[1893] 1 QB 256");
    }

    #[tokio::test]
    async fn test_registry_decodes_string_arguments() {
        let tools = ToolRegistry::with_builtins();
        let out = tools
            .call(
                "citation_lookup",
                Value::String(r#"{"case_name":"Roe v Wade"}"#.into()),
            )
            .await
            .unwrap();
        assert_eq!(out, NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_tool_error() {
        let tools = ToolRegistry::with_builtins();
        let err = tools.call("search", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
    }

    #[test]
    fn test_schema_shape() {
        let schemas = ToolRegistry::with_builtins().ollama_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["function"]["name"], "citation_lookup");
        assert_eq!(schemas[0]["function"]["parameters"]["required"][0], "case_name");
    }
}
