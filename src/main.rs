// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Parley - chat with any LLM backend, with tool approval in the loop
//!
//! Entry point for the Parley CLI application.

use anyhow::{Context, Result};
use clap::Parser;

use parley::cli::{ChatArgs, Cli, Commands};
use parley::config::Settings;

#[path = "main/agent_loop.rs"]
mod agent_loop;
#[path = "main/chat_ui.rs"]
mod chat_ui;
#[path = "main/cli_commands.rs"]
mod cli_commands;

use cli_commands::{run_ask, run_chat, run_settings_command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    // `-v` turns on the turn and approval diagnostics, `-vv` adds provider
    // traffic. `RUST_LOG` still takes precedence.
    if cli.verbose > 0 {
        let mut directives = vec!["parley.turn=debug", "parley.approval=debug", "parley.session=debug"];
        if cli.verbose > 1 {
            directives.push("parley.provider=debug");
        }
        for directive in directives {
            if let Ok(parsed) = directive.parse() {
                env_filter = env_filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let settings_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let settings = Settings::load_from(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    settings.validate().context("Invalid settings")?;

    match cli.command {
        None => run_chat(ChatArgs::default(), settings, &cli.format).await?,
        Some(Commands::Chat(args)) => run_chat(args, settings, &cli.format).await?,
        Some(Commands::Ask(args)) => run_ask(args, settings, &cli.format).await?,
        Some(Commands::Settings(args)) => run_settings_command(args, &settings, &settings_path)?,
    }

    Ok(())
}
