// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider factory for creating provider adapters
//!
//! Centralizes the mapping from a provider name plus settings to a ready
//! [`ProviderAdapter`], so the CLI and library callers agree on it.

use std::sync::Arc;

use crate::config::{Settings, KNOWN_PROVIDERS};
use crate::error::{ParleyError, Result};
use crate::llm::provider::ProviderAdapter;
use crate::llm::providers::{
    AnthropicBackend, LocalBackend, LocalModel, OllamaBackend, OpenAIBackend,
};

/// Factory for creating provider adapters
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create an adapter with the provider's default model
    ///
    /// `perform_health_check` only affects ollama, which is health-checked on
    /// `/api/tags` before the adapter is handed out.
    pub async fn create(
        provider_name: &str,
        settings: &Settings,
        perform_health_check: bool,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        Self::create_with_model(provider_name, settings, None, perform_health_check).await
    }

    /// Create an adapter, overriding the configured model when `model` is set
    pub async fn create_with_model(
        provider_name: &str,
        settings: &Settings,
        model: Option<&str>,
        perform_health_check: bool,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        tracing::debug!(
            target: "parley.session",
            provider = provider_name,
            model = model.unwrap_or("default"),
            "creating provider"
        );
        match provider_name {
            "anthropic" => Self::create_anthropic(settings, model),
            "openai" => Self::create_openai(settings, model),
            "ollama" => Self::create_ollama(settings, model, perform_health_check).await,
            "local" => Err(ParleyError::Setup(
                "The local provider needs an embedded model; build it with ProviderFactory::create_local"
                    .to_string(),
            )),
            other => Err(ParleyError::Config(format!(
                "Unknown provider '{}'. Expected one of: {}",
                other,
                KNOWN_PROVIDERS.join(", ")
            ))),
        }
    }

    /// Create an Anthropic adapter
    pub fn create_anthropic(
        settings: &Settings,
        model: Option<&str>,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        let config = &settings.providers.anthropic;
        let api_key = settings.get_anthropic_api_key().ok_or_else(|| {
            ParleyError::Setup(format!(
                "No Anthropic API key found. Set {} or add it to the settings file.",
                config.api_key_env
            ))
        })?;

        let mut backend =
            AnthropicBackend::new(api_key, model.unwrap_or(&config.default_model).to_string());
        if let Some(ref base_url) = config.base_url {
            backend = backend.with_base_url(base_url);
        }
        Ok(Arc::new(backend))
    }

    /// Create an OpenAI (or compatible) adapter
    pub fn create_openai(
        settings: &Settings,
        model: Option<&str>,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        let config = &settings.providers.openai;
        let api_key = settings.get_openai_api_key().ok_or_else(|| {
            ParleyError::Setup(format!(
                "No OpenAI API key found. Set {} or add it to the settings file.",
                config.api_key_env
            ))
        })?;

        let mut backend =
            OpenAIBackend::new(api_key, model.unwrap_or(&config.default_model).to_string());
        if let Some(ref base_url) = config.base_url {
            backend = backend.with_base_url(base_url);
        }
        Ok(Arc::new(backend))
    }

    /// Create an Ollama adapter
    pub async fn create_ollama(
        settings: &Settings,
        model: Option<&str>,
        perform_health_check: bool,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        let backend = OllamaBackend::with_base_url(
            settings.get_ollama_base_url(),
            model.unwrap_or(&settings.providers.ollama.default_model),
        );

        if perform_health_check {
            let healthy = backend.health_check().await.unwrap_or(false);
            if !healthy {
                return Err(ParleyError::Setup(
                    "Ollama is not running. Start Ollama with: ollama serve".to_string(),
                ));
            }
        }

        Ok(Arc::new(backend))
    }

    /// Create the in-process adapter around an embedded model
    pub fn create_local(settings: &Settings, model: Arc<dyn LocalModel>) -> Arc<dyn ProviderAdapter> {
        let config = &settings.providers.local;
        Arc::new(
            LocalBackend::new(model, config.default_model.clone())
                .with_max_function_rounds(config.max_function_rounds),
        )
    }

    /// Get the provider name from settings, with fallback to the default
    pub fn resolve_provider_name(requested: Option<&str>, settings: &Settings) -> String {
        requested
            .map(str::to_string)
            .unwrap_or_else(|| settings.default_provider.clone())
    }

    /// List all supported provider names
    pub fn supported_providers() -> &'static [&'static str] {
        KNOWN_PROVIDERS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_without_keys() -> Settings {
        let mut settings = Settings::default();
        settings.providers.anthropic.api_key = None;
        settings.providers.anthropic.api_key_env = "PARLEY_NONEXISTENT_ENV_12345".to_string();
        settings.providers.openai.api_key = None;
        settings.providers.openai.api_key_env = "PARLEY_NONEXISTENT_ENV_12345".to_string();
        settings
    }

    #[test]
    fn test_resolve_provider_name() {
        let settings = Settings::default();
        assert_eq!(
            ProviderFactory::resolve_provider_name(Some("ollama"), &settings),
            "ollama"
        );
        assert_eq!(
            ProviderFactory::resolve_provider_name(None, &settings),
            settings.default_provider
        );
    }

    #[test]
    fn test_supported_providers() {
        let providers = ProviderFactory::supported_providers();
        for name in ["anthropic", "openai", "ollama", "local"] {
            assert!(providers.contains(&name));
        }
    }

    #[test]
    fn test_create_anthropic_no_key() {
        let result = ProviderFactory::create_anthropic(&settings_without_keys(), None);
        assert!(matches!(result, Err(ParleyError::Setup(_))));
    }

    #[test]
    fn test_create_openai_no_key() {
        let result = ProviderFactory::create_openai(&settings_without_keys(), None);
        assert!(matches!(result, Err(ParleyError::Setup(_))));
    }

    #[test]
    fn test_create_anthropic_from_file_key() {
        let mut settings = settings_without_keys();
        settings.providers.anthropic.api_key = Some("sk-test".to_string());
        let adapter = ProviderFactory::create_anthropic(&settings, None).unwrap();
        assert_eq!(adapter.name(), "anthropic");
    }

    #[tokio::test]
    async fn test_create_unknown_provider() {
        let result = ProviderFactory::create("bogus", &Settings::default(), false).await;
        assert!(matches!(result, Err(ParleyError::Config(_))));
    }

    #[tokio::test]
    async fn test_create_local_needs_model() {
        let result = ProviderFactory::create("local", &Settings::default(), false).await;
        assert!(matches!(result, Err(ParleyError::Setup(_))));
    }

    #[tokio::test]
    async fn test_create_ollama_without_health_check() {
        let adapter = ProviderFactory::create("ollama", &Settings::default(), false)
            .await
            .unwrap();
        assert_eq!(adapter.name(), "ollama");
    }
}
