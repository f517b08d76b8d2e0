// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap
//!
//! Defines all command-line arguments and subcommands for Parley.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::tools::ToolPermission;

/// Parley - chat with any LLM backend, with tool approval in the loop
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about = "Chat with any LLM backend, with tool approval in the loop")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file path (defaults to ~/.parley/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start interactive chat session (default when no command given)
    Chat(ChatArgs),

    /// Ask a single question (non-interactive)
    Ask(AskArgs),

    /// Inspect configuration
    #[command(alias = "config")]
    Settings(SettingsArgs),
}

/// Options shared by every command that talks to a provider
#[derive(clap::Args, Debug, Clone, Default, PartialEq)]
pub struct ProviderArgs {
    /// Model to use
    #[arg(short, long)]
    pub model: Option<String>,

    /// LLM provider to use (anthropic, openai, ollama)
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Tool permission mode for this session (ask, always, never)
    #[arg(long)]
    pub tools: Option<ToolPermission>,

    /// Auto-approve all tool calls (same as --tools always)
    #[arg(long, conflicts_with = "tools")]
    pub trust: bool,

    /// Maximum model rounds per reply
    #[arg(long)]
    pub max_turns: Option<u32>,
}

impl ProviderArgs {
    /// The permission the flags ask for, if any
    pub fn permission(&self) -> Option<ToolPermission> {
        if self.trust {
            Some(ToolPermission::Always)
        } else {
            self.tools
        }
    }
}

/// Arguments for the chat command
#[derive(clap::Args, Debug, Default)]
pub struct ChatArgs {
    /// Initial prompt (optional)
    pub prompt: Option<String>,

    #[command(flatten)]
    pub provider: ProviderArgs,
}

/// Arguments for the ask command
#[derive(clap::Args, Debug)]
pub struct AskArgs {
    /// The question to ask
    pub prompt: Option<String>,

    /// Read prompt from stdin
    #[arg(long)]
    pub stdin: bool,

    #[command(flatten)]
    pub provider: ProviderArgs,
}

/// Arguments for settings inspection
#[derive(clap::Args, Debug)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: Option<SettingsCommands>,
}

/// Settings subcommands
#[derive(Subcommand, Debug, PartialEq)]
pub enum SettingsCommands {
    /// Show current configuration
    Show,

    /// Print the settings file location
    Path,
}

/// Output format for replies
#[derive(ValueEnum, Clone, Debug, Default, PartialEq)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Text,

    /// The appended log entries as JSON
    Json,
}
