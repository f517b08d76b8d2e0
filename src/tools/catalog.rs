// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! In-memory tool registry
//!
//! Maps qualified tool names to async handlers. Hosts that do not run a real
//! tool transport (the CLI, tests) register their tools here.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ParleyError, Result};
use crate::tools::{SessionContext, ToolCallOutput, ToolCatalog, ToolDefinition};

/// Async tool body: arguments in, text output out
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<String>> + Send + Sync>;

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// Catalog backed by a fixed set of registered handlers
#[derive(Default)]
pub struct StaticToolCatalog {
    /// Keyed by qualified name; ordered so tool lists are stable
    tools: BTreeMap<String, RegisteredTool>,
    /// Optional per-agent allowlists of qualified names
    agent_tools: HashMap<String, HashSet<String>>,
}

impl StaticToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same qualified name
    pub fn register(&mut self, definition: ToolDefinition, handler: ToolHandler) {
        let key = definition.qualified_name();
        self.tools.insert(
            key,
            RegisteredTool {
                definition,
                handler,
            },
        );
    }

    /// Register a plain async function as a tool
    pub fn register_fn<F, Fut>(&mut self, definition: ToolDefinition, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args| Box::pin(f(args)));
        self.register(definition, handler);
    }

    pub fn with_fn<F, Fut>(mut self, definition: ToolDefinition, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.register_fn(definition, f);
        self
    }

    /// Limit which tools an agent sees
    pub fn restrict_agent<I, S>(&mut self, agent: impl Into<String>, qualified_names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agent_tools.insert(
            agent.into(),
            qualified_names.into_iter().map(Into::into).collect(),
        );
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn is_visible(&self, ctx: &SessionContext, qualified_name: &str) -> bool {
        match ctx.agent.as_ref().and_then(|a| self.agent_tools.get(a)) {
            Some(allowed) => allowed.contains(qualified_name),
            None => true,
        }
    }
}

impl std::fmt::Debug for StaticToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToolCatalog")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("agents", &self.agent_tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl ToolCatalog for StaticToolCatalog {
    async fn included_tools(&self, ctx: &SessionContext) -> Result<Vec<ToolDefinition>> {
        Ok(self
            .tools
            .iter()
            .filter(|(name, _)| self.is_visible(ctx, name))
            .map(|(_, tool)| tool.definition.clone())
            .collect())
    }

    async fn call_tool(
        &self,
        ctx: &SessionContext,
        qualified_name: &str,
        args: &Value,
    ) -> Result<ToolCallOutput> {
        let tool = self
            .tools
            .get(qualified_name)
            .filter(|_| self.is_visible(ctx, qualified_name))
            .ok_or_else(|| {
                ParleyError::ToolExecution(format!("Tool not found: {}", qualified_name))
            })?;

        let start = Instant::now();
        let output = (tool.handler)(args.clone()).await?;
        Ok(ToolCallOutput {
            output,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }
}
