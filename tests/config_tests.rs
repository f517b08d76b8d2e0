// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use parley::config::Settings;
use parley::tools::ToolPermission;
use parley::ParleyError;
use tempfile::TempDir;

#[test]
fn test_settings_default_values() {
    let settings = Settings::default();

    assert_eq!(settings.default_provider, "anthropic");
    assert_eq!(
        settings.providers.anthropic.default_model,
        "claude-sonnet-4-20250514"
    );
    assert_eq!(settings.providers.openai.default_model, "gpt-4o");
    assert_eq!(settings.providers.ollama.base_url, "http://localhost:11434");
    assert_eq!(settings.providers.local.max_function_rounds, 4);

    let session = &settings.session.settings;
    assert_eq!(session.max_chat_turns, 10);
    assert_eq!(session.max_output_tokens, 4096);
    assert!((session.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(session.tool_permission, ToolPermission::Ask);
    assert_eq!(settings.session.request_timeout_secs, 300);
}

#[test]
fn test_settings_api_key_priority() {
    // Custom env var names keep these tests from reading real keys
    let mut settings = Settings::default();
    settings.providers.anthropic.api_key_env = "PARLEY_TEST_API_KEY_12345".to_string();
    settings.providers.anthropic.api_key = Some("config-key".to_string());
    assert_eq!(
        settings.get_anthropic_api_key(),
        Some("config-key".to_string())
    );

    settings.providers.openai.api_key_env = "PARLEY_TEST_API_KEY_67890".to_string();
    settings.providers.openai.api_key = None;
    assert_eq!(settings.get_openai_api_key(), None);
    assert!(!settings.is_provider_configured("openai"));
    assert!(settings.is_provider_configured("ollama"));
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let settings = Settings::load_from(&dir.path().join("absent.json")).unwrap();
    assert_eq!(settings.default_provider, "anthropic");
}

#[test]
fn test_save_and_load_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("settings.json");

    let mut settings = Settings::default();
    settings.default_provider = "ollama".to_string();
    settings.session.settings.max_chat_turns = 3;
    settings.session.settings.tool_permission = ToolPermission::Never;
    settings.save_to(&path).unwrap();

    let loaded = Settings::load_from(&path).unwrap();
    assert_eq!(loaded.default_provider, "ollama");
    assert_eq!(loaded.session.settings.max_chat_turns, 3);
    assert_eq!(loaded.session.settings.tool_permission, ToolPermission::Never);
}

#[test]
fn test_save_preserves_unknown_keys() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"theme": "dark", "default_provider": "openai"}"#).unwrap();

    let mut settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.default_provider, "openai");
    settings.default_provider = "anthropic".to_string();
    settings.save_to(&path).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["theme"], "dark");
    assert_eq!(raw["default_provider"], "anthropic");
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{"session": {"tool_permission": "always", "max_output_tokens": 512}}"#,
    )
    .unwrap();

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.session.settings.tool_permission, ToolPermission::Always);
    assert_eq!(settings.session.settings.max_output_tokens, 512);
    assert_eq!(settings.session.settings.max_chat_turns, 10);
    assert_eq!(settings.session.request_timeout_secs, 300);
}

#[test]
fn test_corrupt_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(
        Settings::load_from(&path),
        Err(ParleyError::Json(_))
    ));
}

#[test]
fn test_validate_rejects_unknown_provider() {
    let mut settings = Settings::default();
    settings.default_provider = "carrier-pigeon".to_string();
    assert!(matches!(settings.validate(), Err(ParleyError::Config(_))));
}

#[test]
fn test_validate_rejects_zero_timeout() {
    let mut settings = Settings::default();
    settings.session.request_timeout_secs = 0;
    assert!(matches!(settings.validate(), Err(ParleyError::Config(_))));
}
