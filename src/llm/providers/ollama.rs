// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Ollama provider
//!
//! Talks to `/api/chat` with streaming disabled. Ollama does not assign ids
//! to tool calls, so ids are minted here and tool results are paired with
//! their calls by position.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ParleyError, Result};
use crate::llm::message::{PendingToolCall, Turn, TurnResult};
use crate::llm::provider::{
    ProviderBackend, RoundOutput, RoundPart, RoundRequest, StopReason, Suspension,
};
use crate::tools::ToolDefinition;

use super::common::{server_error, try_parse_json_tool_call};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

const NOT_RUNNING: &str = "Ollama is not running. Start the Ollama app or run 'ollama serve'";

fn connect_error(error: reqwest::Error) -> ParleyError {
    if error.is_connect() {
        ParleyError::Api(ApiError::Network(NOT_RUNNING.to_string()))
    } else if error.is_timeout() {
        ParleyError::Api(ApiError::Timeout)
    } else {
        ParleyError::Http(error)
    }
}

/// Ollama local model provider
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_OLLAMA_URL, model)
    }

    pub fn with_base_url(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check that the server is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await.map_err(connect_error)?;
        Ok(response.status().is_success())
    }

    /// List models pulled into the local server
    pub async fn list_local_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await.map_err(connect_error)?;

        if !response.status().is_success() {
            return Err(server_error(
                response.status().as_u16(),
                "Failed to list models",
            ));
        }

        let body: OllamaTagsResponse = response.json().await?;
        Ok(body.models.into_iter().map(|m| m.name).collect())
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<OllamaTool> {
        tools
            .iter()
            .map(|t| OllamaTool {
                tool_type: "function".to_string(),
                function: OllamaFunction {
                    name: t.qualified_name(),
                    description: t.description.clone(),
                    parameters: t.parameters(),
                },
            })
            .collect()
    }

    pub(crate) fn build_request(&self, request: &RoundRequest<'_, OllamaMessage>) -> OllamaRequest {
        let mut messages = Vec::with_capacity(request.history.len() + 1);
        if let Some(system) = request.system_prompt {
            messages.push(OllamaMessage::new("system", system));
        }
        messages.extend(request.history.iter().cloned());

        let sampling = request.sampling.resolve();
        OllamaRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: sampling.temperature(),
                top_p: sampling.top_p(),
                num_predict: Some(i64::from(request.max_output_tokens)),
            },
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(Self::convert_tools(request.tools))
            },
        }
    }

    fn parse_error(status: u16, body: &str) -> ParleyError {
        match serde_json::from_str::<OllamaError>(body) {
            Ok(error) if error.error.contains("model") && error.error.contains("not found") => {
                ParleyError::Api(ApiError::ModelNotFound(error.error))
            }
            Ok(error) => server_error(status, error.error),
            Err(_) => server_error(status, body),
        }
    }

    pub(crate) fn parse_response(response: OllamaResponse, tools: &[ToolDefinition]) -> RoundOutput {
        let mut output = RoundOutput::default().with_usage(
            response.prompt_eval_count.unwrap_or(0).max(0) as u32,
            response.eval_count.unwrap_or(0).max(0) as u32,
        );

        let calls = response.message.tool_calls.unwrap_or_default();
        if calls.is_empty() {
            // Only treat printed JSON as a call when it names an offered tool
            let printed = try_parse_json_tool_call(&response.message.content)
                .filter(|(name, _)| tools.iter().any(|t| &t.qualified_name() == name));
            match printed {
                Some((name, args)) => {
                    tracing::debug!(
                        target: "parley.provider.ollama",
                        tool = %name,
                        "recovered tool call from message text"
                    );
                    output.push_tool_request(PendingToolCall::from_qualified(
                        &name,
                        args,
                        new_call_id(),
                    ));
                }
                None => output.push_text(response.message.content),
            }
        } else {
            output.push_text(response.message.content);
            for call in calls {
                output.push_tool_request(PendingToolCall::from_qualified(
                    &call.function.name,
                    call.function.arguments,
                    new_call_id(),
                ));
            }
        }

        let has_calls = output
            .parts
            .iter()
            .any(|p| matches!(p, RoundPart::ToolRequest(_)));
        output.stop_reason = if has_calls {
            Some(StopReason::ToolUse)
        } else {
            match response.done_reason.as_deref() {
                Some("length") => Some(StopReason::MaxTokens),
                _ if response.done => Some(StopReason::EndTurn),
                _ => None,
            }
        };
        output
    }
}

fn new_call_id() -> String {
    format!("ollama_{}", uuid::Uuid::new_v4().simple())
}

#[async_trait]
impl ProviderBackend for OllamaBackend {
    type Wire = OllamaMessage;

    const SUSPENSION: Suspension = Suspension::BetweenRounds;

    fn name(&self) -> &str {
        "ollama"
    }

    fn encode_user(&self, text: &str) -> Vec<OllamaMessage> {
        vec![OllamaMessage::new("user", text)]
    }

    fn encode_turn(&self, turn: &Turn) -> Vec<OllamaMessage> {
        let mut assistant = OllamaMessage::new("assistant", turn.text());
        let mut results = Vec::new();

        for result in &turn.results {
            if let TurnResult::ToolCall(record) = result {
                assistant
                    .tool_calls
                    .get_or_insert_with(Vec::new)
                    .push(OllamaToolCall {
                        function: OllamaFunctionCall {
                            name: record.qualified_name(),
                            arguments: if record.args.is_null() {
                                serde_json::json!({})
                            } else {
                                record.args.clone()
                            },
                        },
                    });
                let mut tool = OllamaMessage::new("tool", record.result_text());
                tool.tool_name = Some(record.qualified_name());
                results.push(tool);
            }
        }

        if assistant.content.is_empty() && assistant.tool_calls.is_none() {
            return results;
        }
        let mut wire = vec![assistant];
        wire.extend(results);
        wire
    }

    async fn generate_round(&self, request: RoundRequest<'_, OllamaMessage>) -> Result<RoundOutput> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_request(&request);

        tracing::debug!(
            target: "parley.provider.ollama",
            model = %self.model,
            messages = body.messages.len(),
            "sending chat request"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(connect_error)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error(status, &body));
        }

        let api_response: OllamaResponse = response.json().await?;
        Ok(Self::parse_response(api_response, request.tools))
    }
}

// Ollama API types

#[derive(Debug, Serialize)]
pub(crate) struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OllamaTool>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OllamaToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl OllamaMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
            tool_name: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i64>,
}

#[derive(Debug, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OllamaFunction,
}

#[derive(Debug, Serialize)]
struct OllamaFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaToolCall {
    pub function: OllamaFunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaFunctionCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<i64>,
    #[serde(default)]
    eval_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}
