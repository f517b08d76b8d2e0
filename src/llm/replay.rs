// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Message log replay
//!
//! Folds the backend-agnostic log into a backend's wire history. The fold is
//! pure: the same log always yields the same wire messages.

use crate::llm::message::{ChatMessage, PendingToolCall, ToolCallApproval};
use crate::llm::provider::ProviderBackend;

/// Encode the log into `backend`'s wire format
///
/// System and error entries are display-only. Approval entries are never
/// replayed; their outcome lives in the resolution turn of the reply that
/// followed them.
pub fn replay_history<B: ProviderBackend>(backend: &B, messages: &[ChatMessage]) -> Vec<B::Wire> {
    let mut wire = Vec::new();
    for message in messages {
        match message {
            ChatMessage::User { content } => wire.extend(backend.encode_user(content)),
            ChatMessage::Assistant(reply) => {
                for turn in reply.turns.iter().filter(|t| !t.is_empty()) {
                    wire.extend(backend.encode_turn(turn));
                }
            }
            ChatMessage::System { .. } | ChatMessage::Error { .. } | ChatMessage::Approval { .. } => {}
        }
    }
    wire
}

/// The approvals in the final log entry, if it is an approval
pub fn trailing_approval(messages: &[ChatMessage]) -> Option<&[ToolCallApproval]> {
    messages.last().and_then(ChatMessage::as_approvals)
}

/// Pending calls of the most recent assistant entry
pub fn outstanding_calls(messages: &[ChatMessage]) -> &[PendingToolCall] {
    messages
        .iter()
        .rev()
        .find_map(ChatMessage::as_assistant)
        .map(|reply| reply.pending_tool_calls.as_slice())
        .unwrap_or(&[])
}
