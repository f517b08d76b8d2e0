// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! ChatML function-calling runner
//!
//! Turns a raw text generator into a [`LocalModel`]: renders the transcript
//! as a ChatML prompt, looks for a `{"name": ..., "arguments": ...}` call in
//! each completion and chains calls until the model answers in plain text.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{
    FunctionCallHandler, FunctionOutcome, LocalFunctionCall, LocalGeneration, LocalItem,
    LocalMessage, LocalModel, LocalRequest,
};
use crate::error::Result;
use crate::llm::providers::common::try_parse_json_tool_call;
use crate::llm::provider::{Sampling, StopReason, Usage};
use crate::tools::ToolDefinition;

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";

/// Sampling knobs for one raw completion
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub sampling: Sampling,
    pub stop: Vec<String>,
}

/// One raw completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedText {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Generation hit `max_tokens` before the model stopped
    pub truncated: bool,
}

/// Prompt-in, text-out inference engine (llama.cpp, candle, a test script)
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<GeneratedText>;
}

pub struct ChatMlRunner<G: TextGenerator> {
    generator: G,
}

impl<G: TextGenerator> ChatMlRunner<G> {
    pub fn new(generator: G) -> Self {
        Self { generator }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    fn system_block(system: Option<&str>, tools: &[ToolDefinition]) -> Option<String> {
        if tools.is_empty() {
            return system.map(str::to_string);
        }

        let mut block = String::new();
        if let Some(system) = system {
            block.push_str(system);
            block.push_str("\n\n");
        }
        block.push_str("# Tools\n\nYou may call one of these functions:\n");
        for tool in tools {
            let signature = serde_json::json!({
                "name": tool.qualified_name(),
                "description": tool.description,
                "parameters": tool.parameters(),
            });
            block.push_str(&signature.to_string());
            block.push('\n');
        }
        block.push_str(
            "\nTo call a function, reply with only {\"name\": \"<function>\", \"arguments\": {...}}",
        );
        Some(block)
    }

    /// Render the transcript as a ChatML prompt ending in an open assistant turn
    pub fn render_prompt(
        system: Option<&str>,
        tools: &[ToolDefinition],
        messages: &[LocalMessage],
    ) -> String {
        let mut prompt = String::new();
        let mut push = |role: &str, content: &str| {
            prompt.push_str(IM_START);
            prompt.push_str(role);
            prompt.push('\n');
            prompt.push_str(content);
            prompt.push_str(IM_END);
            prompt.push('\n');
        };

        if let Some(system) = Self::system_block(system, tools) {
            push("system", &system);
        }

        for message in messages {
            match message {
                LocalMessage::User { content } => push("user", content),
                LocalMessage::Assistant { content, calls } => {
                    let mut body = content.clone();
                    for call in calls {
                        if !body.is_empty() {
                            body.push('\n');
                        }
                        let rendered = serde_json::json!({
                            "name": call.name,
                            "arguments": call.arguments,
                        });
                        body.push_str(&rendered.to_string());
                    }
                    push("assistant", &body);
                }
                LocalMessage::Tool { content, .. } => push("tool", content),
            }
        }

        prompt.push_str(IM_START);
        prompt.push_str("assistant\n");
        prompt
    }

    /// Find a call to an offered tool in a completion; returns the text before it
    fn parse_call(text: &str, tools: &[ToolDefinition]) -> Option<(String, LocalFunctionCall)> {
        if tools.is_empty() {
            return None;
        }
        let (name, arguments) = try_parse_json_tool_call(text)?;
        if !tools.iter().any(|t| t.qualified_name() == name) {
            return None;
        }
        let prefix = text.find('{').map_or("", |i| text[..i].trim()).to_string();
        Some((prefix, LocalFunctionCall { name, arguments }))
    }
}

#[async_trait]
impl<G: TextGenerator> LocalModel for ChatMlRunner<G> {
    async fn generate(
        &self,
        request: LocalRequest,
        handler: &dyn FunctionCallHandler,
        cancel: CancellationToken,
    ) -> Result<LocalGeneration> {
        let params = GenerationParams {
            max_tokens: request.max_output_tokens,
            sampling: request.sampling,
            stop: vec![IM_END.to_string()],
        };
        let mut transcript = request.messages;
        let mut generation = LocalGeneration::default();
        let mut calls_made = 0u32;

        loop {
            if cancel.is_cancelled() {
                generation.stop_reason = Some(StopReason::Aborted);
                return Ok(generation);
            }

            let prompt = Self::render_prompt(
                request.system_prompt.as_deref(),
                &request.tools,
                &transcript,
            );
            let completion = self.generator.complete(&prompt, &params).await?;
            generation.usage = Usage::new(
                generation.usage.input_tokens + completion.prompt_tokens,
                generation.usage.output_tokens + completion.completion_tokens,
            );
            let text = completion.text.trim_end_matches(IM_END).trim().to_string();

            let Some((prefix, call)) = Self::parse_call(&text, &request.tools) else {
                generation.items.push(LocalItem::Text(text));
                generation.stop_reason = Some(if completion.truncated {
                    StopReason::MaxTokens
                } else {
                    StopReason::EndTurn
                });
                return Ok(generation);
            };

            if !prefix.is_empty() {
                generation.items.push(LocalItem::Text(prefix.clone()));
            }

            tracing::debug!(
                target: "parley.provider.local",
                function = %call.name,
                round = calls_made + 1,
                "model requested a function"
            );

            let output = match handler.call_function(&call.name, &call.arguments).await {
                FunctionOutcome::Output(output) => output,
                FunctionOutcome::Aborted => {
                    generation.stop_reason = Some(StopReason::Aborted);
                    return Ok(generation);
                }
            };
            generation.items.push(LocalItem::FunctionCall(call.clone()));
            transcript.push(LocalMessage::Assistant {
                content: prefix,
                calls: vec![call.clone()],
            });
            transcript.push(LocalMessage::Tool {
                name: call.name,
                content: output,
            });

            calls_made += 1;
            if cancel.is_cancelled() {
                generation.stop_reason = Some(StopReason::Aborted);
                return Ok(generation);
            }
            if calls_made >= request.max_function_rounds {
                // Hand control back; the caller decides whether another round runs
                generation.stop_reason = Some(StopReason::ToolUse);
                return Ok(generation);
            }
        }
    }
}
