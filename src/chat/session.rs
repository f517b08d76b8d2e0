// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat session management
//!
//! A session owns one message log and feeds it to its provider adapter once
//! per incoming message. Callers serialize `handle_message` per session.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::SessionSettings;
use crate::error::{ParleyError, Result};
use crate::llm::message::{ChatMessage, MessageLog, PendingToolCall};
use crate::llm::provider::{ProviderAdapter, TurnContext};
use crate::tools::{ApprovalPolicy, EmptyToolCatalog, SessionContext, ToolCatalog, ToolPermission};

/// What a caller can hand to [`ChatSession::handle_message`]
#[derive(Debug, Clone, PartialEq)]
pub enum ChatInput {
    /// Raw user text
    Text(String),
    /// A pre-built entry, typically an approval
    Message(ChatMessage),
}

impl From<&str> for ChatInput {
    fn from(text: &str) -> Self {
        ChatInput::Text(text.to_string())
    }
}

impl From<String> for ChatInput {
    fn from(text: String) -> Self {
        ChatInput::Text(text)
    }
}

impl From<ChatMessage> for ChatInput {
    fn from(message: ChatMessage) -> Self {
        ChatInput::Message(message)
    }
}

/// Log delta returned from one `handle_message` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageUpdate {
    /// Entries appended during this call, in order
    pub messages: Vec<ChatMessage>,
    /// Log length after this call; pass to [`MessageLog::since`] to resync
    pub cursor: usize,
    pub active_rules: Vec<String>,
    pub references: Vec<String>,
}

impl MessageUpdate {
    /// The assistant reply produced by this call, if any
    pub fn reply(&self) -> Option<&crate::llm::message::AssistantReply> {
        self.messages.iter().rev().find_map(ChatMessage::as_assistant)
    }

    /// Calls waiting for a decision after this update
    pub fn pending_tool_calls(&self) -> &[PendingToolCall] {
        self.reply()
            .map(|r| r.pending_tool_calls.as_slice())
            .unwrap_or(&[])
    }
}

/// State for one conversation
pub struct ChatSession {
    session_id: String,
    agent: Option<String>,
    log: MessageLog,
    settings: SessionSettings,
    policy: Arc<ApprovalPolicy>,
    provider: Arc<dyn ProviderAdapter>,
    catalog: Arc<dyn ToolCatalog>,
    active_rules: Vec<String>,
    references: Vec<String>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("session_id", &self.session_id)
            .field("provider", &self.provider.name())
            .field("messages", &self.log.len())
            .finish_non_exhaustive()
    }
}

/// Builder for creating ChatSession instances
pub struct ChatSessionBuilder {
    provider: Arc<dyn ProviderAdapter>,
    session_id: Option<String>,
    agent: Option<String>,
    settings: SessionSettings,
    catalog: Option<Arc<dyn ToolCatalog>>,
    history: MessageLog,
    active_rules: Vec<String>,
    references: Vec<String>,
}

impl ChatSessionBuilder {
    pub fn new(provider: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            provider,
            session_id: None,
            agent: None,
            settings: SessionSettings::default(),
            catalog: None,
            history: MessageLog::new(),
            active_rules: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Resume from a previously persisted log
    pub fn with_history(mut self, history: MessageLog) -> Self {
        self.history = history;
        self
    }

    pub fn with_rules(mut self, rules: Vec<String>) -> Self {
        self.active_rules = rules;
        self
    }

    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }

    /// Build the ChatSession
    pub fn build(self) -> Result<ChatSession> {
        self.settings.validate()?;

        let session_id = self
            .session_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tracing::debug!(
            target: "parley.session",
            session_id = %session_id,
            provider = %self.provider.name(),
            resumed_messages = self.history.len(),
            "session created"
        );

        Ok(ChatSession {
            session_id,
            agent: self.agent,
            log: self.history,
            policy: Arc::new(ApprovalPolicy::new(self.settings.tool_permission)),
            settings: self.settings,
            provider: self.provider,
            catalog: self.catalog.unwrap_or_else(|| Arc::new(EmptyToolCatalog)),
            active_rules: self.active_rules,
            references: self.references,
            cancel: CancellationToken::new(),
        })
    }
}

impl ChatSession {
    pub fn builder(provider: Arc<dyn ProviderAdapter>) -> ChatSessionBuilder {
        ChatSessionBuilder::new(provider)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.log.messages()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn policy(&self) -> &Arc<ApprovalPolicy> {
        &self.policy
    }

    /// Replace the session settings; the permission mode follows them
    pub fn update_settings(&mut self, settings: SessionSettings) -> Result<()> {
        settings.validate()?;
        self.policy.set_permission(settings.tool_permission);
        self.settings = settings;
        Ok(())
    }

    pub fn set_tool_permission(&mut self, permission: ToolPermission) {
        self.settings.tool_permission = permission;
        self.policy.set_permission(permission);
    }

    /// Calls from the latest reply that still wait for a decision
    pub fn pending_tool_calls(&self) -> &[PendingToolCall] {
        self.log.pending_tool_calls()
    }

    pub fn is_awaiting_approval(&self) -> bool {
        !self.pending_tool_calls().is_empty()
    }

    /// Token that aborts the in-flight turn when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drop the log; session grants survive
    pub fn clear_history(&mut self) {
        tracing::debug!(target: "parley.session", session_id = %self.session_id, "history cleared");
        self.log.clear();
    }

    /// Cut the log back to `len` entries
    pub fn truncate(&mut self, len: usize) {
        self.log.truncate(len);
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            session_id: self.session_id.clone(),
            agent: self.agent.clone(),
        }
    }

    /// Append the input, run the provider, and return what was appended
    pub async fn handle_message(&mut self, input: impl Into<ChatInput>) -> Result<MessageUpdate> {
        let cursor = self.log.len();

        let message = match input.into() {
            ChatInput::Text(text) if text.trim().is_empty() => {
                return Err(ParleyError::InvalidInput("Message is empty".to_string()));
            }
            ChatInput::Text(text) => ChatMessage::user(text),
            ChatInput::Message(message @ (ChatMessage::Assistant(_) | ChatMessage::Error { .. })) => {
                return Err(ParleyError::InvalidInput(format!(
                    "Cannot submit a '{}' message",
                    message.role()
                )));
            }
            ChatInput::Message(message) => message,
        };

        let generates = !matches!(message, ChatMessage::System { .. });
        self.log.push(message);

        if generates {
            if self.cancel.is_cancelled() {
                self.cancel = CancellationToken::new();
            }
            let ctx = TurnContext::new(
                self.settings.clone(),
                Arc::clone(&self.policy),
                Arc::clone(&self.catalog),
                self.session_context(),
            )
            .with_cancel(self.cancel.clone());

            match self.provider.generate_response(&ctx, self.log.messages()).await {
                Ok(reply) => self.log.push(ChatMessage::Assistant(reply)),
                Err(error) => {
                    tracing::warn!(
                        target: "parley.session",
                        session_id = %self.session_id,
                        error = %error,
                        "provider failed before generating"
                    );
                    self.log.push(ChatMessage::error(error.to_string()));
                }
            }
        }

        Ok(MessageUpdate {
            messages: self.log.since(cursor).to_vec(),
            cursor: self.log.len(),
            active_rules: self.active_rules.clone(),
            references: self.references.clone(),
        })
    }
}
