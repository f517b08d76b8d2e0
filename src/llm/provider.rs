// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider traits and round types
//!
//! A backend implements [`ProviderBackend`]: how to encode the shared log
//! into its wire format and how to run one generation round. Every backend
//! then becomes a [`ProviderAdapter`] through the shared turn executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::SessionSettings;
use crate::error::Result;
use crate::llm::message::{AssistantReply, ChatMessage, PendingToolCall, ToolCallRecord, Turn};
use crate::tools::{ApprovalPolicy, SessionContext, ToolCatalog, ToolDefinition};

/// Where a backend can stop to wait for a human decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    /// The backend returns tool requests and the executor stops between rounds
    BetweenRounds,
    /// The backend runs tools itself and is interrupted through its cancel token
    AbortSignal,
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of message
    EndTurn,
    /// Hit max tokens
    MaxTokens,
    /// Wants to use a tool
    ToolUse,
    /// Stop sequence hit
    StopSequence,
    /// Generation was interrupted
    Aborted,
}

/// Token usage for one round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Sampling knobs from the session settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
}

/// The single sampling parameter sent to a backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    Temperature(f32),
    TopP(f32),
}

impl SamplingParams {
    pub fn new(temperature: f32, top_p: f32) -> Self {
        Self { temperature, top_p }
    }

    /// Temperature wins when positive, otherwise top_p is used alone
    pub fn resolve(&self) -> Sampling {
        if self.temperature > 0.0 {
            Sampling::Temperature(self.temperature)
        } else {
            Sampling::TopP(self.top_p)
        }
    }
}

impl Sampling {
    pub fn temperature(self) -> Option<f32> {
        match self {
            Sampling::Temperature(t) => Some(t),
            Sampling::TopP(_) => None,
        }
    }

    pub fn top_p(self) -> Option<f32> {
        match self {
            Sampling::TopP(p) => Some(p),
            Sampling::Temperature(_) => None,
        }
    }
}

/// What a backend needs to execute tools inside a round
#[derive(Clone)]
pub struct ToolRuntime {
    pub catalog: Arc<dyn ToolCatalog>,
    pub policy: Arc<ApprovalPolicy>,
    pub session: SessionContext,
}

impl std::fmt::Debug for ToolRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRuntime")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Input of one generation round
#[derive(Debug)]
pub struct RoundRequest<'a, W> {
    /// Wire history, already including the latest user message or tool results
    pub history: &'a [W],
    pub system_prompt: Option<&'a str>,
    pub tools: &'a [ToolDefinition],
    pub sampling: SamplingParams,
    pub max_output_tokens: u32,
    pub cancel: CancellationToken,
    pub runtime: &'a ToolRuntime,
}

/// One ordered piece of a round's output
#[derive(Debug, Clone, PartialEq)]
pub enum RoundPart {
    Text(String),
    /// A call the executor still has to resolve
    ToolRequest(PendingToolCall),
    /// A call the backend already executed
    ToolResolved(ToolCallRecord),
}

/// Output of one generation round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundOutput {
    pub usage: Usage,
    pub stop_reason: Option<StopReason>,
    pub parts: Vec<RoundPart>,
    /// Calls the backend suspended on inside the round
    pub pending: Vec<PendingToolCall>,
    /// The engine already chained its own tool rounds and produced a final answer
    pub finished: bool,
}

impl RoundOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![RoundPart::Text(text.into())],
            stop_reason: Some(StopReason::EndTurn),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.usage = Usage::new(input_tokens, output_tokens);
        self
    }

    pub fn with_stop_reason(mut self, stop_reason: StopReason) -> Self {
        self.stop_reason = Some(stop_reason);
        self
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.parts.push(RoundPart::Text(text));
        }
    }

    pub fn push_tool_request(&mut self, call: PendingToolCall) {
        self.parts.push(RoundPart::ToolRequest(call));
    }
}

/// Everything an adapter needs from the session for one turn
#[derive(Clone)]
pub struct TurnContext {
    pub settings: SessionSettings,
    pub policy: Arc<ApprovalPolicy>,
    pub catalog: Arc<dyn ToolCatalog>,
    pub session: SessionContext,
    /// Cancelling stops the turn before its next round
    pub cancel: CancellationToken,
}

impl TurnContext {
    pub fn new(
        settings: SessionSettings,
        policy: Arc<ApprovalPolicy>,
        catalog: Arc<dyn ToolCatalog>,
        session: SessionContext,
    ) -> Self {
        Self {
            settings,
            policy,
            catalog,
            session,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn tool_runtime(&self) -> ToolRuntime {
        ToolRuntime {
            catalog: Arc::clone(&self.catalog),
            policy: Arc::clone(&self.policy),
            session: self.session.clone(),
        }
    }
}

impl std::fmt::Debug for TurnContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnContext")
            .field("settings", &self.settings)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// A concrete LLM backend
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// Provider-native message type
    type Wire: Serialize + Clone + Send + Sync;

    /// How this backend suspends for approval
    const SUSPENSION: Suspension;

    /// Provider name (e.g. "anthropic", "ollama")
    fn name(&self) -> &str;

    /// Fail fast when the backend cannot run at all
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    /// Encode a user message
    fn encode_user(&self, text: &str) -> Vec<Self::Wire>;

    /// Encode a finished turn: the model message followed by its tool results
    fn encode_turn(&self, turn: &Turn) -> Vec<Self::Wire>;

    /// Run one generation round
    async fn generate_round(&self, request: RoundRequest<'_, Self::Wire>) -> Result<RoundOutput>;
}

/// Object-safe face of a backend, used by sessions
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn suspension(&self) -> Suspension;

    /// Produce the assistant reply for the current log without mutating it
    async fn generate_response(
        &self,
        ctx: &TurnContext,
        messages: &[ChatMessage],
    ) -> Result<AssistantReply>;
}
