// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::error::{ParleyError, Result};

use super::{SessionSettings, Settings};

/// Providers the factory knows how to build
pub const KNOWN_PROVIDERS: &[&str] = &["anthropic", "openai", "ollama", "local"];

fn env_or(env_name: &str, stored: &Option<String>) -> Option<String> {
    std::env::var(env_name)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| stored.clone())
}

impl Settings {
    /// Get the API key for Anthropic, checking env var first.
    pub fn get_anthropic_api_key(&self) -> Option<String> {
        let config = &self.providers.anthropic;
        env_or(&config.api_key_env, &config.api_key)
    }

    /// Get the API key for OpenAI, checking env var first.
    pub fn get_openai_api_key(&self) -> Option<String> {
        let config = &self.providers.openai;
        env_or(&config.api_key_env, &config.api_key)
    }

    /// Get the Ollama base URL, checking OLLAMA_HOST first.
    pub fn get_ollama_base_url(&self) -> String {
        std::env::var("OLLAMA_HOST")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.providers.ollama.base_url.clone())
    }

    /// Check if the given provider has a usable configuration.
    pub fn is_provider_configured(&self, provider: &str) -> bool {
        match provider {
            "anthropic" => self.get_anthropic_api_key().is_some(),
            "openai" => self.get_openai_api_key().is_some(),
            // Reachability is checked by the factory health check
            "ollama" | "local" => true,
            _ => false,
        }
    }

    /// Default model for a provider
    pub fn default_model(&self, provider: &str) -> Option<&str> {
        match provider {
            "anthropic" => Some(&self.providers.anthropic.default_model),
            "openai" => Some(&self.providers.openai.default_model),
            "ollama" => Some(&self.providers.ollama.default_model),
            "local" => Some(&self.providers.local.default_model),
            _ => None,
        }
    }

    /// Reject settings no session could run with.
    pub fn validate(&self) -> Result<()> {
        if !KNOWN_PROVIDERS.contains(&self.default_provider.as_str()) {
            return Err(ParleyError::Config(format!(
                "unknown default provider '{}' (expected one of: {})",
                self.default_provider,
                KNOWN_PROVIDERS.join(", ")
            )));
        }
        if self.session.request_timeout_secs == 0 {
            return Err(ParleyError::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.providers.local.max_function_rounds == 0 {
            return Err(ParleyError::Config(
                "local.max_function_rounds must be at least 1".to_string(),
            ));
        }
        self.session.settings.validate()
    }
}

impl SessionSettings {
    /// Check ranges of the per-session knobs.
    pub fn validate(&self) -> Result<()> {
        if self.max_chat_turns < 1 {
            return Err(ParleyError::Config(
                "max_chat_turns must be at least 1".to_string(),
            ));
        }
        if self.max_output_tokens < 1 {
            return Err(ParleyError::Config(
                "max_output_tokens must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ParleyError::Config(format!(
                "temperature must be within 0..=1, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ParleyError::Config(format!(
                "top_p must be within 0..=1, got {}",
                self.top_p
            )));
        }
        Ok(())
    }
}
