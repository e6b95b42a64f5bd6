//! # tools
//!
//! Named, schema-validated operations. This is the only road from agents (and
//! the HTTP surface) to market data and order placement.
//!
//! ## Invocation pipeline
//! ```text
//! invoke(name, params)
//!   1. look up definition          → UnknownTool
//!   2. params must be an object    → MalformedParams
//!   3. per parameter (name order):
//!        missing + required        → MissingParameter
//!        missing + default         → default inserted
//!        wrong JSON type           → InvalidType
//!        outside enum              → InvalidEnumValue
//!   4. handler.call(params)        → HandlerError on failure
//! ```

pub mod builtin;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub use builtin::register_builtin_tools;

/// Validated tool arguments.
pub type Params = Map<String, Value>;

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' not found")]
    UnknownTool(String),

    #[error("parameters must be a JSON object")]
    MalformedParams,

    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("parameter '{key}' must be of type {expected}")]
    InvalidType { key: String, expected: ParamType },

    #[error("parameter '{key}' has invalid value '{value}'")]
    InvalidEnumValue { key: String, value: String },

    #[error("tool '{tool}' failed: {source:#}")]
    Handler {
        tool: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ToolError {
    /// `true` for errors caused by the caller's arguments.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ToolError::MalformedParams
                | ToolError::MissingParameter(_)
                | ToolError::InvalidType { .. }
                | ToolError::InvalidEnumValue { .. }
        )
    }

    /// The typed cause behind a handler failure, if it is a `T`.
    pub fn handler_cause<T>(&self) -> Option<&T>
    where
        T: std::error::Error + Send + Sync + 'static,
    {
        match self {
            ToolError::Handler { source, .. } => source.downcast_ref::<T>(),
            _ => None,
        }
    }
}

// ─── Schema ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
}

impl ParamType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String  => value.is_string(),
            ParamType::Number  => value.is_number(),
            ParamType::Integer => value.is_u64() || value.is_i64(),
            ParamType::Boolean => value.is_boolean(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParamType::String  => "string",
            ParamType::Number  => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required:   bool,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed:    Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default:    Option<Value>,
}

impl ParamSchema {
    pub fn required(param_type: ParamType) -> Self {
        Self { param_type, required: true, allowed: None, default: None }
    }

    pub fn optional(param_type: ParamType) -> Self {
        Self { param_type, required: false, allowed: None, default: None }
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name:        String,
    pub description: String,
    /// BTreeMap so listing and validation order are stable.
    pub parameters:  BTreeMap<String, ParamSchema>,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str) -> Self {
        Self { name: name.to_string(), description: description.to_string(), parameters: BTreeMap::new() }
    }

    pub fn param(mut self, key: &str, schema: ParamSchema) -> Self {
        self.parameters.insert(key.to_string(), schema);
        self
    }

    /// Check `params` against the schema and fill in defaults.
    pub fn validate(&self, mut params: Params) -> Result<Params, ToolError> {
        for (key, schema) in &self.parameters {
            let present = params.get(key).is_some_and(|v| !v.is_null());
            if !present {
                if let Some(default) = &schema.default {
                    params.insert(key.clone(), default.clone());
                } else if schema.required {
                    return Err(ToolError::MissingParameter(key.clone()));
                } else {
                    params.remove(key);
                }
                continue;
            }
            let value = &params[key.as_str()];

            if !schema.param_type.accepts(value) {
                return Err(ToolError::InvalidType { key: key.clone(), expected: schema.param_type });
            }

            if let Some(allowed) = &schema.allowed {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if !allowed.iter().any(|a| *a == text) {
                    return Err(ToolError::InvalidEnumValue { key: key.clone(), value: text });
                }
            }
        }
        Ok(params)
    }
}

// ─── Handler Trait ────────────────────────────────────────────────────────────

#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs with parameters already validated against the definition.
    async fn call(&self, params: Params) -> anyhow::Result<Value>;
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler:    Arc<dyn ToolHandler>,
}

// ─── Registry ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the tool named `definition.name`.
    pub async fn register(&self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        let name = definition.name.clone();
        let mut tools = self.tools.write().await;
        let replaced = tools.insert(name.clone(), RegisteredTool { definition, handler }).is_some();
        info!(tool = %name, replaced, "🔧 Tool registered");
    }

    pub async fn definition(&self, name: &str) -> Option<ToolDefinition> {
        let tools = self.tools.read().await;
        tools.get(name).map(|t| t.definition.clone())
    }

    /// All definitions, sorted by name.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut defs: Vec<ToolDefinition> = tools.values().map(|t| t.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub async fn invoke(&self, name: &str, params: Value) -> Result<Value, ToolError> {
        // Clone out of the lock; handlers may take as long as they like.
        let (definition, handler) = {
            let tools = self.tools.read().await;
            let tool = tools.get(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
            (tool.definition.clone(), Arc::clone(&tool.handler))
        };

        let params = match params {
            Value::Object(map) => map,
            Value::Null => Params::new(),
            _ => return Err(ToolError::MalformedParams),
        };

        let params = definition.validate(params).inspect_err(|e| {
            debug!(tool = name, error = %e, "Tool call rejected");
        })?;

        handler.call(params).await.map_err(|source| {
            warn!(tool = name, error = %source, "Tool handler failed");
            ToolError::Handler { tool: name.to_string(), source }
        })
    }
}

// ─── Param Helpers ────────────────────────────────────────────────────────────
//
// Handlers run after validation, so these only fail on a schema/handler
// mismatch or on semantic problems (unparseable dates, bad ids).

pub(crate) fn str_param<'a>(params: &'a Params, key: &str) -> anyhow::Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("parameter '{key}' must be a string"))
}

pub(crate) fn opt_str_param<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub(crate) fn u64_param(params: &Params, key: &str) -> anyhow::Result<u64> {
    params
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow::anyhow!("parameter '{key}' must be a non-negative integer"))
}

pub(crate) fn opt_f64_param(params: &Params, key: &str) -> Option<f64> {
    params.get(key).and_then(Value::as_f64)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, params: Params) -> anyhow::Result<Value> {
            Ok(Value::Object(params))
        }
    }

    struct Broken;

    #[async_trait]
    impl ToolHandler for Broken {
        async fn call(&self, _params: Params) -> anyhow::Result<Value> {
            anyhow::bail!("upstream unavailable")
        }
    }

    fn quote_tool() -> ToolDefinition {
        ToolDefinition::new("quote", "echo")
            .param("symbol", ParamSchema::required(ParamType::String))
            .param(
                "timeframe",
                ParamSchema::optional(ParamType::String).one_of(&["1m", "1h"]).with_default("1h"),
            )
            .param("limit", ParamSchema::optional(ParamType::Integer))
    }

    async fn registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.register(quote_tool(), Arc::new(Echo)).await;
        registry
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let err = registry().await.invoke("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_missing_required_parameter() {
        let err = registry().await.invoke("quote", json!({ "timeframe": "1m" })).await.unwrap_err();
        assert!(matches!(err, ToolError::MissingParameter(key) if key == "symbol"));
    }

    #[tokio::test]
    async fn test_enum_violation() {
        let err = registry()
            .await
            .invoke("quote", json!({ "symbol": "AAPL", "timeframe": "3w" }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::InvalidEnumValue { ref key, ref value } if key == "timeframe" && value == "3w"
        ));
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let err = registry()
            .await
            .invoke("quote", json!({ "symbol": "AAPL", "limit": 1.5 }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidType { expected: ParamType::Integer, .. }));
    }

    #[tokio::test]
    async fn test_default_applied_before_dispatch() {
        let out = registry().await.invoke("quote", json!({ "symbol": "AAPL" })).await.unwrap();
        assert_eq!(out, json!({ "symbol": "AAPL", "timeframe": "1h" }));
    }

    #[tokio::test]
    async fn test_non_object_params_rejected() {
        let err = registry().await.invoke("quote", json!(["AAPL"])).await.unwrap_err();
        assert!(matches!(err, ToolError::MalformedParams));
    }

    #[tokio::test]
    async fn test_handler_failure_is_wrapped() {
        let registry = ToolRegistry::new();
        registry.register(ToolDefinition::new("broken", "always fails"), Arc::new(Broken)).await;

        let err = registry.invoke("broken", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Handler { ref tool, .. } if tool == "broken"));
        assert!(!err.is_validation());
    }

    #[tokio::test]
    async fn test_register_replaces_by_name() {
        let registry = registry().await;
        registry.register(ToolDefinition::new("quote", "replaced"), Arc::new(Broken)).await;

        let tools = registry.list_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description, "replaced");
        assert!(registry.invoke("quote", json!({})).await.is_err());
    }
}
