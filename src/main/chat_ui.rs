// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io::{self, Write};

use crossterm::{
    style::{Color, ResetColor, SetForegroundColor},
    ExecutableCommand,
};

use parley::chat::MessageUpdate;
use parley::cli::OutputFormat;
use parley::llm::message::{AssistantReply, ChatMessage, ToolCallRecord, TurnResult};

/// Longest tool output echoed to the terminal, in characters
const TOOL_OUTPUT_PREVIEW_CHARS: usize = 200;

fn colored(color: Color, text: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(color))?;
    print!("{}", text);
    stdout.execute(ResetColor)?;
    Ok(())
}

pub(super) fn read_user_input() -> io::Result<Option<String>> {
    colored(Color::Green, "you: ")?;
    io::stdout().flush()?;

    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim().to_string()))
}

fn preview(output: &str) -> String {
    let first_line = output.lines().next().unwrap_or_default();
    let mut shown: String = first_line.chars().take(TOOL_OUTPUT_PREVIEW_CHARS).collect();
    if shown.len() < output.trim_end().len() {
        shown.push_str(" ...");
    }
    shown
}

pub(super) fn print_tool_record(record: &ToolCallRecord) -> io::Result<()> {
    let header = format!("  [{}] {}ms ", record.qualified_name(), record.elapsed_ms);
    match &record.error {
        Some(error) => {
            colored(Color::DarkGrey, &header)?;
            colored(Color::Red, error)?;
            println!();
        }
        None => {
            colored(Color::DarkGrey, &header)?;
            println!("{}", preview(&record.output));
        }
    }
    Ok(())
}

fn print_reply(reply: &AssistantReply) -> io::Result<()> {
    for turn in &reply.turns {
        for result in &turn.results {
            match result {
                TurnResult::Text { text } => {
                    colored(Color::Cyan, "parley: ")?;
                    println!("{}", text);
                }
                TurnResult::ToolCall(record) => print_tool_record(record)?,
            }
        }
        if let Some(warning) = &turn.warning {
            colored(Color::Yellow, &format!("warning: {}\n", warning))?;
        }
        if let Some(error) = &turn.error {
            colored(Color::Red, &format!("error: {}\n", error))?;
        }
    }
    Ok(())
}

/// Print what a `handle_message` call appended
pub(super) fn print_update(update: &MessageUpdate, format: &OutputFormat) -> io::Result<()> {
    if *format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(&update.messages).map_err(io::Error::other)?;
        println!("{}", json);
        return Ok(());
    }

    for message in &update.messages {
        match message {
            ChatMessage::Assistant(reply) => print_reply(reply)?,
            ChatMessage::Error { content } => colored(Color::Red, &format!("error: {}\n", content))?,
            _ => {}
        }
    }
    io::stdout().flush()
}
