// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::time::Duration;

use anyhow::{bail, Result};

use parley::chat::{ChatInput, ChatSession};
use parley::cli::OutputFormat;
use parley::llm::message::{ChatMessage, ToolCallApproval};
use parley::tools::permission::prompt_decision;

use super::chat_ui::print_update;

/// Send one input and keep answering approval prompts until the reply settles
pub(super) async fn run_agent_loop(
    session: &mut ChatSession,
    input: ChatInput,
    timeout: Duration,
    format: &OutputFormat,
) -> Result<()> {
    let mut input = input;
    loop {
        // Dropping the timed-out future abandons the turn and any tool it was running
        let update = match tokio::time::timeout(timeout, session.handle_message(input)).await {
            Ok(update) => update?,
            Err(_) => bail!("No reply within {} seconds", timeout.as_secs()),
        };
        print_update(&update, format)?;

        let pending = update.pending_tool_calls().to_vec();
        if pending.is_empty() {
            return Ok(());
        }

        let mut approvals = Vec::with_capacity(pending.len());
        for call in pending {
            let decision = prompt_decision(&call)?;
            approvals.push(ToolCallApproval { call, decision });
        }
        input = ChatMessage::approval(approvals).into();
    }
}
