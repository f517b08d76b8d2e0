// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool catalog seam
//!
//! Tools come from an external catalog (an MCP host, an in-memory registry,
//! the built-ins). The turn executor only sees the [`ToolCatalog`] trait.

pub mod builtin;
pub mod catalog;
pub mod permission;

pub use catalog::StaticToolCatalog;
pub use permission::{ApprovalPolicy, ToolPermission};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::llm::message::qualified_tool_name;

/// Identity of the session a tool call is made for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            agent: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// A tool as advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub server_name: String,
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(
        server_name: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Name shown to the model, `server__tool`
    pub fn qualified_name(&self) -> String {
        qualified_tool_name(&self.server_name, &self.name)
    }

    /// Schema with an object type guaranteed, as the vendor APIs require
    pub fn parameters(&self) -> Value {
        match &self.input_schema {
            Value::Object(map) if map.contains_key("type") => self.input_schema.clone(),
            Value::Object(map) => {
                let mut map = map.clone();
                map.insert("type".to_string(), Value::String("object".to_string()));
                Value::Object(map)
            }
            _ => serde_json::json!({"type": "object", "properties": {}}),
        }
    }
}

/// Result of a catalog tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallOutput {
    pub output: String,
    pub elapsed_ms: u64,
}

/// Source of tools for a session
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// Tools enabled for the session
    async fn included_tools(&self, ctx: &SessionContext) -> Result<Vec<ToolDefinition>>;

    /// Invoke a tool by its qualified name
    async fn call_tool(
        &self,
        ctx: &SessionContext,
        qualified_name: &str,
        args: &Value,
    ) -> Result<ToolCallOutput>;
}

/// Catalog with no tools
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyToolCatalog;

#[async_trait]
impl ToolCatalog for EmptyToolCatalog {
    async fn included_tools(&self, _ctx: &SessionContext) -> Result<Vec<ToolDefinition>> {
        Ok(Vec::new())
    }

    async fn call_tool(
        &self,
        _ctx: &SessionContext,
        qualified_name: &str,
        _args: &Value,
    ) -> Result<ToolCallOutput> {
        Err(crate::error::ParleyError::ToolExecution(format!(
            "Tool not found: {}",
            qualified_name
        )))
    }
}
