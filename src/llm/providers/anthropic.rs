// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Anthropic Messages API backend
//!
//! A turn becomes an assistant message of `text`/`tool_use` blocks followed
//! by a user message of `tool_result` blocks. Consecutive messages with the
//! same role are merged when the request is built, since the API requires
//! strict alternation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ParleyError, Result};
use crate::llm::message::{PendingToolCall, Turn, TurnResult};
use crate::llm::provider::{
    ProviderBackend, RoundOutput, RoundRequest, StopReason, Suspension, Usage,
};
use crate::tools::ToolDefinition;

use super::common::{
    mentions_context_limit, parse_numeric_token_counts, parse_retry_after_seconds,
    server_error, status_error, transport_error,
};

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude provider
pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            model: model.into(),
        }
    }

    /// Use a custom endpoint root (the part before `/v1/messages`)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.qualified_name(),
                description: t.description.clone(),
                input_schema: t.parameters(),
            })
            .collect()
    }

    /// Merge consecutive same-role messages
    fn coalesce(history: &[AnthropicMessage]) -> Vec<AnthropicMessage> {
        let mut merged: Vec<AnthropicMessage> = Vec::with_capacity(history.len());
        for message in history {
            match merged.last_mut() {
                Some(last) if last.role == message.role => {
                    last.content.extend(message.content.iter().cloned());
                }
                _ => merged.push(message.clone()),
            }
        }
        merged
    }

    /// Build the request body
    pub(crate) fn build_request(
        &self,
        request: &RoundRequest<'_, AnthropicMessage>,
    ) -> AnthropicRequest {
        let sampling = request.sampling.resolve();
        AnthropicRequest {
            model: self.model.clone(),
            messages: Self::coalesce(request.history),
            system: request.system_prompt.map(str::to_string),
            max_tokens: request.max_output_tokens,
            temperature: sampling.temperature(),
            top_p: sampling.top_p(),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(Self::convert_tools(request.tools))
            },
        }
    }

    /// Parse an error response
    fn parse_error(status: u16, body: &str, retry_after: Option<u64>) -> ParleyError {
        let Ok(error_response) = serde_json::from_str::<AnthropicError>(body) else {
            return status_error(status, retry_after)
                .unwrap_or_else(|| server_error(status, body));
        };

        let message = error_response.error.message;
        match error_response.error.error_type.as_str() {
            "authentication_error" | "permission_error" => {
                ParleyError::Api(ApiError::AuthenticationFailed)
            }
            "rate_limit_error" => ParleyError::Api(ApiError::RateLimited(
                retry_after.unwrap_or(10) as u32,
            )),
            "not_found_error" => ParleyError::Api(ApiError::ModelNotFound(message)),
            "invalid_request_error" if mentions_context_limit(&message) => {
                // Format: "prompt is too long: 215300 tokens > 200000 maximum"
                let (current, limit) = parse_numeric_token_counts(&message);
                ParleyError::Api(ApiError::ContextTooLong { current, limit })
            }
            "invalid_request_error" => ParleyError::Api(ApiError::InvalidResponse(message)),
            _ => server_error(status, message),
        }
    }

    pub(crate) fn parse_response(response: AnthropicResponse) -> RoundOutput {
        let mut output = RoundOutput {
            usage: Usage::new(response.usage.input_tokens, response.usage.output_tokens),
            stop_reason: response.stop_reason.as_deref().map(|r| match r {
                "max_tokens" => StopReason::MaxTokens,
                "tool_use" => StopReason::ToolUse,
                "stop_sequence" => StopReason::StopSequence,
                _ => StopReason::EndTurn,
            }),
            ..RoundOutput::default()
        };

        for block in response.content {
            match block {
                AnthropicContentBlock::Text { text } => output.push_text(text),
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    output.push_tool_request(PendingToolCall::from_qualified(&name, input, id));
                }
                AnthropicContentBlock::ToolResult { .. } => {
                    tracing::debug!(
                        target: "parley.provider.anthropic",
                        "ignoring tool_result block in model output"
                    );
                }
            }
        }
        output
    }
}

#[async_trait]
impl ProviderBackend for AnthropicBackend {
    type Wire = AnthropicMessage;

    const SUSPENSION: Suspension = Suspension::BetweenRounds;

    fn name(&self) -> &str {
        "anthropic"
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(ParleyError::Setup(
                "Anthropic API key is not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn encode_user(&self, text: &str) -> Vec<AnthropicMessage> {
        vec![AnthropicMessage {
            role: "user".to_string(),
            content: vec![AnthropicContentBlock::Text {
                text: text.to_string(),
            }],
        }]
    }

    fn encode_turn(&self, turn: &Turn) -> Vec<AnthropicMessage> {
        let mut blocks = Vec::new();
        let mut results = Vec::new();

        for result in &turn.results {
            match result {
                // The API rejects empty text blocks
                TurnResult::Text { text } if text.is_empty() => {}
                TurnResult::Text { text } => {
                    blocks.push(AnthropicContentBlock::Text { text: text.clone() })
                }
                TurnResult::ToolCall(record) => {
                    blocks.push(AnthropicContentBlock::ToolUse {
                        id: record.call_id.clone(),
                        name: record.qualified_name(),
                        input: if record.args.is_null() {
                            serde_json::json!({})
                        } else {
                            record.args.clone()
                        },
                    });
                    results.push(AnthropicContentBlock::ToolResult {
                        tool_use_id: record.call_id.clone(),
                        content: record.result_text().to_string(),
                        is_error: record.error.as_ref().map(|_| true),
                    });
                }
            }
        }

        let mut wire = Vec::new();
        if !blocks.is_empty() {
            wire.push(AnthropicMessage {
                role: "assistant".to_string(),
                content: blocks,
            });
        }
        if !results.is_empty() {
            wire.push(AnthropicMessage {
                role: "user".to_string(),
                content: results,
            });
        }
        wire
    }

    async fn generate_round(
        &self,
        request: RoundRequest<'_, AnthropicMessage>,
    ) -> Result<RoundOutput> {
        let body = self.build_request(&request);

        tracing::debug!(
            target: "parley.provider.anthropic",
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.as_ref().map_or(0, Vec::len),
            "sending messages request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            // Extract Retry-After header before consuming response body
            let retry_after = parse_retry_after_seconds(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error(status, &body, retry_after));
        }

        let api_response: AnthropicResponse = response.json().await?;
        Ok(Self::parse_response(api_response))
    }
}

// ===== Anthropic API types =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
