// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use parley::chat::{ChatInput, ChatSession};
use parley::cli::{AskArgs, ChatArgs, OutputFormat, ProviderArgs, SettingsArgs, SettingsCommands};
use parley::config::Settings;
use parley::llm::factory::ProviderFactory;
use parley::tools::builtin::builtin_catalog;

use super::agent_loop::run_agent_loop;
use super::chat_ui::read_user_input;

const REDACTED: &str = "********";

async fn build_session(args: &ProviderArgs, settings: &Settings) -> Result<ChatSession> {
    let provider_name = ProviderFactory::resolve_provider_name(args.provider.as_deref(), settings);
    let provider =
        ProviderFactory::create_with_model(&provider_name, settings, args.model.as_deref(), true)
            .await
            .with_context(|| format!("Could not start provider '{}'", provider_name))?;

    let mut session_settings = settings.session.settings.clone();
    if let Some(permission) = args.permission() {
        session_settings.tool_permission = permission;
    }
    if let Some(max_turns) = args.max_turns {
        session_settings.max_chat_turns = max_turns;
    }

    let working_directory = std::env::current_dir().context("No working directory")?;
    let session = ChatSession::builder(provider)
        .with_settings(session_settings)
        .with_catalog(Arc::new(builtin_catalog(working_directory)))
        .build()?;
    Ok(session)
}

fn request_timeout(settings: &Settings) -> Duration {
    Duration::from_secs(settings.session.request_timeout_secs)
}

/// One-shot question
pub(super) async fn run_ask(args: AskArgs, settings: Settings, format: &OutputFormat) -> Result<()> {
    let prompt = if args.stdin {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        args.prompt.clone().unwrap_or_default()
    };
    if prompt.trim().is_empty() {
        bail!("Nothing to ask. Pass a prompt or use --stdin.");
    }

    let mut session = build_session(&args.provider, &settings).await?;
    run_agent_loop(
        &mut session,
        ChatInput::Text(prompt),
        request_timeout(&settings),
        format,
    )
    .await
}

/// Interactive chat on stdin
pub(super) async fn run_chat(args: ChatArgs, settings: Settings, format: &OutputFormat) -> Result<()> {
    let mut session = build_session(&args.provider, &settings).await?;
    let timeout = request_timeout(&settings);

    println!(
        "parley ({}) - type /clear to reset, /exit to quit",
        session.provider_name()
    );

    let mut next = args.prompt;
    loop {
        let input = match next.take() {
            Some(prompt) => prompt,
            None => match read_user_input()? {
                Some(line) => line,
                None => break,
            },
        };

        match input.as_str() {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                session.clear_history();
                println!("History cleared.");
                continue;
            }
            _ => {}
        }

        // A failed turn is reported and the conversation goes on
        if let Err(error) = run_agent_loop(&mut session, ChatInput::Text(input), timeout, format).await {
            eprintln!("error: {:#}", error);
        }
    }
    Ok(())
}

fn redacted(settings: &Settings) -> Settings {
    let mut shown = settings.clone();
    for key in [
        &mut shown.providers.anthropic.api_key,
        &mut shown.providers.openai.api_key,
    ] {
        if key.is_some() {
            *key = Some(REDACTED.to_string());
        }
    }
    shown
}

pub(super) fn run_settings_command(args: SettingsArgs, settings: &Settings, path: &Path) -> Result<()> {
    match args.command.unwrap_or(SettingsCommands::Show) {
        SettingsCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&redacted(settings))?);
        }
        SettingsCommands::Path => println!("{}", path.display()),
    }
    Ok(())
}
