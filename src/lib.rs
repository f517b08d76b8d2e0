// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Parley - a multi-backend chat engine with tool approval in the loop.
//!
//! This crate exposes the runtime used by the `parley` CLI (`src/main.rs`)
//! and by library callers that host their own sessions.
//!
//! Architecture highlights:
//! - `chat`: sessions, the message log they own, and a keyed session store
//! - `llm`: the message model, the shared turn executor, and provider backends
//!   (Anthropic, OpenAI-compatible, Ollama, in-process local models)
//! - `tools`: the tool catalog, approval policy, and built-in tools
//! - `config`: settings file loading and validation

pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod tools;

pub use error::{ParleyError, Result};
