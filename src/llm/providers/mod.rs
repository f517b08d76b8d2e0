// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM provider implementations

pub mod anthropic;
pub(crate) mod common;
pub mod local;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicBackend;
pub use local::{ChatMlRunner, LocalBackend, LocalModel, TextGenerator};
pub use ollama::OllamaBackend;
pub use openai::OpenAIBackend;
