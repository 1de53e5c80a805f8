mod deep_search;
mod docs_search;

pub use deep_search::DeepSearch;
pub use docs_search::DocsSearch;

use crate::error::ToolError;
use crate::llm::ToolSpec;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;

    async fn call(&self, arguments: Value) -> Result<String, ToolError>;
}

/// Both search tools take a single free-text query.
pub(crate) fn query_parameters() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "The search query"
            }
        },
        "required": ["query"],
        "additionalProperties": false
    })
}

pub(crate) fn query_argument(tool: &'static str, arguments: &Value) -> Result<String, ToolError> {
    match arguments.get("query") {
        Some(Value::String(q)) if !q.trim().is_empty() => Ok(q.clone()),
        _ => Err(ToolError::InvalidArguments {
            tool,
            message: format!("expected a non-empty string 'query', got {}", arguments),
        }),
    }
}

#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    pub async fn call(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        info!("Calling tool {}", name);
        tool.call(arguments).await
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Echoes its query back and records every call.
    pub struct EchoTool {
        pub name: &'static str,
        pub calls: Mutex<Vec<Value>>,
    }

    impl EchoTool {
        pub fn new(name: &'static str) -> Self {
            Self {
                name,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            self.name
        }

        fn description(&self) -> &'static str {
            "echo"
        }

        fn parameters(&self) -> Value {
            query_parameters()
        }

        async fn call(&self, arguments: Value) -> Result<String, ToolError> {
            self.calls.lock().unwrap().push(arguments.clone());
            let query = query_argument(self.name, &arguments)?;
            Ok(format!("{} says {}", self.name, query))
        }
    }
}
