// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI chat-completions backend
//!
//! Tool use is a message pair: an assistant message carrying `tool_calls`,
//! then one `role: tool` message per call, linked by `tool_call_id`. Works
//! with any OpenAI-compatible endpoint through `with_base_url`.

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
    arguments_string, mentions_context_limit, parse_arguments, parse_numeric_token_counts,
    parse_retry_after_seconds, server_error, status_error, transport_error,
};

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat-completions provider
pub struct OpenAIBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            model: model.into(),
        }
    }

    /// Point at another OpenAI-compatible endpoint (the part before `/chat/completions`)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<OpenAITool> {
        tools
            .iter()
            .map(|t| OpenAITool {
                r#type: "function".to_string(),
                function: OpenAIFunction {
                    name: t.qualified_name(),
                    description: t.description.clone(),
                    parameters: t.parameters(),
                },
            })
            .collect()
    }

    /// Build the request body
    pub(crate) fn build_request(&self, request: &RoundRequest<'_, OpenAIMessage>) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.history.len() + 1);
        if let Some(system) = request.system_prompt {
            messages.push(OpenAIMessage::text("system", system));
        }
        messages.extend(request.history.iter().cloned());

        let sampling = request.sampling.resolve();
        ChatRequest {
            model: self.model.clone(),
            messages,
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
        let Ok(error_response) = serde_json::from_str::<OpenAIError>(body) else {
            return status_error(status, retry_after)
                .unwrap_or_else(|| server_error(status, body));
        };

        let message = error_response.error.message;
        match error_response.error.code.as_deref().unwrap_or("") {
            "invalid_api_key" => ParleyError::Api(ApiError::AuthenticationFailed),
            "rate_limit_exceeded" => ParleyError::Api(ApiError::RateLimited(
                retry_after.unwrap_or(60) as u32,
            )),
            "model_not_found" => ParleyError::Api(ApiError::ModelNotFound(message)),
            "context_length_exceeded" => {
                let (current, limit) = parse_numeric_token_counts(&message);
                ParleyError::Api(ApiError::ContextTooLong { current, limit })
            }
            _ if mentions_context_limit(&message) => {
                let (current, limit) = parse_numeric_token_counts(&message);
                ParleyError::Api(ApiError::ContextTooLong { current, limit })
            }
            _ => status_error(status, retry_after)
                .unwrap_or_else(|| server_error(status, message)),
        }
    }

    /// Convert the first choice into round parts
    pub(crate) fn parse_response(response: ChatResponse) -> Result<RoundOutput> {
        let choice = response.choices.into_iter().next().ok_or_else(|| {
            ParleyError::Api(ApiError::InvalidResponse(
                "No choices in response".to_string(),
            ))
        })?;

        let mut output = RoundOutput {
            usage: response
                .usage
                .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
                .unwrap_or_default(),
            stop_reason: choice.finish_reason.as_deref().map(|r| match r {
                "length" => StopReason::MaxTokens,
                "tool_calls" | "function_call" => StopReason::ToolUse,
                _ => StopReason::EndTurn,
            }),
            ..RoundOutput::default()
        };

        if let Some(text) = choice.message.content {
            output.push_text(text);
        }
        for call in choice.message.tool_calls {
            output.push_tool_request(PendingToolCall::from_qualified(
                &call.function.name,
                parse_arguments(&call.function.arguments),
                call.id,
            ));
        }

        Ok(output)
    }
}

#[async_trait]
impl ProviderBackend for OpenAIBackend {
    type Wire = OpenAIMessage;

    const SUSPENSION: Suspension = Suspension::BetweenRounds;

    fn name(&self) -> &str {
        "openai"
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(ParleyError::Setup(
                "OpenAI API key is not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn encode_user(&self, text: &str) -> Vec<OpenAIMessage> {
        vec![OpenAIMessage::text("user", text)]
    }

    fn encode_turn(&self, turn: &Turn) -> Vec<OpenAIMessage> {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut results = Vec::new();

        for result in &turn.results {
            match result {
                TurnResult::Text { text: t } => text.push_str(t),
                TurnResult::ToolCall(record) => {
                    tool_calls.push(OpenAIToolCall {
                        id: record.call_id.clone(),
                        r#type: "function".to_string(),
                        function: OpenAIFunctionCall {
                            name: record.qualified_name(),
                            arguments: arguments_string(&record.args),
                        },
                    });
                    results.push(OpenAIMessage {
                        role: "tool".to_string(),
                        content: Some(record.result_text().to_string()),
                        tool_calls: Vec::new(),
                        tool_call_id: Some(record.call_id.clone()),
                    });
                }
            }
        }

        let content = if text.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(text)
        };
        let mut wire = vec![OpenAIMessage {
            role: "assistant".to_string(),
            content,
            tool_calls,
            tool_call_id: None,
        }];
        wire.extend(results);
        wire
    }

    async fn generate_round(
        &self,
        request: RoundRequest<'_, OpenAIMessage>,
    ) -> Result<RoundOutput> {
        let body = self.build_request(&request);

        tracing::debug!(
            target: "parley.provider.openai",
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.as_ref().map_or(0, Vec::len),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = parse_retry_after_seconds(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error(status, &body, retry_after));
        }

        let api_response: ChatResponse = response.json().await?;
        Self::parse_response(api_response)
    }
}

// ===== OpenAI wire types =====

/// One chat-completions message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAIMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<OpenAIToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl OpenAIMessage {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(text.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAIToolCall {
    pub id: String,
    #[serde(default = "function_type")]
    pub r#type: String,
    pub function: OpenAIFunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAIFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    r#type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAIToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<String>,
}
