// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Parley
//!
//! Handles loading and saving settings from ~/.parley/settings.json

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::llm::provider::SamplingParams;
use crate::tools::ToolPermission;

mod io;
mod validation;

pub use validation::KNOWN_PROVIDERS;

/// Main settings structure, stored in ~/.parley/settings.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Provider used when none is named
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// LLM provider configurations
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Defaults for new chat sessions
    #[serde(default)]
    pub session: SessionDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            providers: ProvidersConfig::default(),
            session: SessionDefaults::default(),
        }
    }
}

/// Configuration for LLM providers
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    #[serde(default)]
    pub openai: OpenAIConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub local: LocalConfig,
}

/// Anthropic-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_anthropic_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_anthropic_model")]
    pub default_model: String,

    /// Base URL for API (for custom endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// OpenAI chat-completions configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_openai_model")]
    pub default_model: String,

    /// Base URL for any OpenAI-compatible endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Ollama server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    #[serde(default = "default_ollama_model")]
    pub default_model: String,
}

/// In-process local model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Model name for identification
    #[serde(default = "default_local_model")]
    pub default_model: String,

    /// Path to the model weights, handed to the embedding host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,

    /// Function-call rounds the model may chain inside one generation
    #[serde(default = "default_max_function_rounds")]
    pub max_function_rounds: u32,
}

/// Per-session knobs read by every provider adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Round budget for one reply
    #[serde(default = "default_max_chat_turns")]
    pub max_chat_turns: u32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default)]
    pub tool_permission: ToolPermission,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl SessionSettings {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams::new(self.temperature, self.top_p)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_chat_turns: default_max_chat_turns(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            tool_permission: ToolPermission::default(),
            system_prompt: None,
        }
    }
}

/// Session defaults plus caller-side limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(flatten)]
    pub settings: SessionSettings,

    /// Wall-clock limit the CLI puts on one reply
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            settings: SessionSettings::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_anthropic_api_key_env(),
            default_model: default_anthropic_model(),
            base_url: None,
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_openai_api_key_env(),
            default_model: default_openai_model(),
            base_url: None,
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            default_model: default_ollama_model(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            default_model: default_local_model(),
            model_path: None,
            max_function_rounds: default_max_function_rounds(),
        }
    }
}

// Default value functions
fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_anthropic_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_anthropic_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "qwen2.5-coder:14b".to_string()
}

fn default_local_model() -> String {
    "local".to_string()
}

fn default_max_function_rounds() -> u32 {
    4
}

fn default_max_chat_turns() -> u32 {
    10
}

fn default_max_output_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

fn default_request_timeout_secs() -> u64 {
    300
}
