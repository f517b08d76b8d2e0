// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Backend-agnostic conversation model
//!
//! Everything a provider adapter reads or produces goes through these types:
//! the message log, assistant replies made of turns, resolved tool calls,
//! pending tool calls and the approvals that resolve them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output and error text of a denied tool call
pub const TOOL_CALL_DENIED: &str = "Tool call denied";

/// Error text of the synthetic turn appended when the round budget runs out
pub const MAX_TURNS_REACHED: &str = "Maximum number of chat turns reached";

/// Warning text recorded when the backend stopped at the output-token ceiling
pub const MAX_OUTPUT_TOKENS_REACHED: &str = "Maximum output tokens reached";

/// Separator between server name and tool name in a qualified tool name
pub const QUALIFIED_NAME_SEPARATOR: &str = "__";

/// Join a server name and a tool name into the name shown to the model
///
/// An empty server name yields the bare tool name, which is how calls to
/// tools the model invented are replayed.
pub fn qualified_tool_name(server_name: &str, tool_name: &str) -> String {
    if server_name.is_empty() {
        return tool_name.to_string();
    }
    format!("{}{}{}", server_name, QUALIFIED_NAME_SEPARATOR, tool_name)
}

/// Split a qualified tool name back into `(server, tool)`
pub fn split_qualified_name(qualified: &str) -> Option<(&str, &str)> {
    let (server, tool) = qualified.split_once(QUALIFIED_NAME_SEPARATOR)?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

/// A requested tool invocation that has not been resolved yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingToolCall {
    pub server_name: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub call_id: String,
}

impl PendingToolCall {
    pub fn new(
        server_name: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
        call_id: impl Into<String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            tool_name: tool_name.into(),
            args,
            call_id: call_id.into(),
        }
    }

    /// Build from the name a model used; names without a server keep an empty one
    pub fn from_qualified(
        qualified: &str,
        args: serde_json::Value,
        call_id: impl Into<String>,
    ) -> Self {
        let (server, tool) = split_qualified_name(qualified).unwrap_or(("", qualified));
        Self::new(server, tool, args, call_id)
    }

    pub fn qualified_name(&self) -> String {
        qualified_tool_name(&self.server_name, &self.tool_name)
    }
}

/// A tool invocation that has been executed or denied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub server_name: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub call_id: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallRecord {
    /// Record a successful execution
    pub fn completed(call: PendingToolCall, output: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            server_name: call.server_name,
            tool_name: call.tool_name,
            args: call.args,
            call_id: call.call_id,
            output: output.into(),
            elapsed_ms,
            error: None,
        }
    }

    /// Record a failed execution; the output stays empty
    pub fn failed(call: PendingToolCall, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            server_name: call.server_name,
            tool_name: call.tool_name,
            args: call.args,
            call_id: call.call_id,
            output: String::new(),
            elapsed_ms,
            error: Some(error.into()),
        }
    }

    /// Record a call the user refused to run
    pub fn denied(call: PendingToolCall) -> Self {
        Self {
            server_name: call.server_name,
            tool_name: call.tool_name,
            args: call.args,
            call_id: call.call_id,
            output: TOOL_CALL_DENIED.to_string(),
            elapsed_ms: 0,
            error: Some(TOOL_CALL_DENIED.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn qualified_name(&self) -> String {
        qualified_tool_name(&self.server_name, &self.tool_name)
    }

    /// Text handed back to the model as this call's result
    pub fn result_text(&self) -> &str {
        match &self.error {
            Some(error) if self.output.is_empty() => error,
            _ => &self.output,
        }
    }
}

/// One ordered result inside a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnResult {
    Text { text: String },
    ToolCall(ToolCallRecord),
}

/// One model-generation round inside an assistant reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub results: Vec<TurnResult>,
    /// Fatal error; a turn carrying one has no results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-fatal advisory, e.g. output truncated at the token ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Turn {
    pub fn new() -> Self {
        Self::default()
    }

    /// A turn that only reports an error
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.results.push(TurnResult::Text { text: text.into() });
    }

    pub fn push_tool_call(&mut self, record: ToolCallRecord) {
        self.results.push(TurnResult::ToolCall(record));
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.results.iter().filter_map(|r| match r {
            TurnResult::ToolCall(record) => Some(record),
            TurnResult::Text { .. } => None,
        })
    }

    /// Concatenated text results
    pub fn text(&self) -> String {
        self.results
            .iter()
            .filter_map(|r| match r {
                TurnResult::Text { text } => Some(text.as_str()),
                TurnResult::ToolCall(_) => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// The full assistant response to one user or approval input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_tool_calls: Vec<PendingToolCall>,
}

impl AssistantReply {
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            turns: Vec::new(),
            pending_tool_calls: Vec::new(),
        }
    }

    /// Whether generation stopped to wait for approval
    pub fn is_suspended(&self) -> bool {
        !self.pending_tool_calls.is_empty()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Every resolved tool call across all turns, in order
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.turns.iter().flat_map(|t| t.tool_calls())
    }

    /// Concatenated text across all turns
    pub fn text(&self) -> String {
        self.turns
            .iter()
            .map(Turn::text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for AssistantReply {
    fn default() -> Self {
        Self::new()
    }
}

/// How the user resolved a pending tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalDecision {
    /// Run this call only
    AllowOnce,
    /// Run this call and stop asking for this tool in the session
    AllowSession,
    /// Do not run this call
    Deny,
}

impl ApprovalDecision {
    pub fn allows_execution(self) -> bool {
        matches!(
            self,
            ApprovalDecision::AllowOnce | ApprovalDecision::AllowSession
        )
    }
}

impl std::fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalDecision::AllowOnce => write!(f, "allow-once"),
            ApprovalDecision::AllowSession => write!(f, "allow-session"),
            ApprovalDecision::Deny => write!(f, "deny"),
        }
    }
}

/// A pending call plus the user's decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallApproval {
    #[serde(flatten)]
    pub call: PendingToolCall,
    pub decision: ApprovalDecision,
}

impl ToolCallApproval {
    pub fn new(call: PendingToolCall, decision: ApprovalDecision) -> Self {
        Self { call, decision }
    }
}

/// An entry in the message log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    User { content: String },
    System { content: String },
    Error { content: String },
    Assistant(AssistantReply),
    Approval { approvals: Vec<ToolCallApproval> },
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User {
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        ChatMessage::Error {
            content: content.into(),
        }
    }

    pub fn approval(approvals: Vec<ToolCallApproval>) -> Self {
        ChatMessage::Approval { approvals }
    }

    pub fn as_assistant(&self) -> Option<&AssistantReply> {
        match self {
            ChatMessage::Assistant(reply) => Some(reply),
            _ => None,
        }
    }

    pub fn as_approvals(&self) -> Option<&[ToolCallApproval]> {
        match self {
            ChatMessage::Approval { approvals } => Some(approvals),
            _ => None,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            ChatMessage::User { .. } => "user",
            ChatMessage::System { .. } => "system",
            ChatMessage::Error { .. } => "error",
            ChatMessage::Assistant(_) => "assistant",
            ChatMessage::Approval { .. } => "approval",
        }
    }
}

/// Ordered conversation history shared by every backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Entries appended after `cursor`
    pub fn since(&self, cursor: usize) -> &[ChatMessage] {
        &self.messages[cursor.min(self.messages.len())..]
    }

    /// Most recent assistant reply, if any
    pub fn last_assistant(&self) -> Option<&AssistantReply> {
        self.messages.iter().rev().find_map(ChatMessage::as_assistant)
    }

    /// Pending calls of the latest reply, when that reply is the last assistant entry
    pub fn pending_tool_calls(&self) -> &[PendingToolCall] {
        self.last_assistant()
            .map(|r| r.pending_tool_calls.as_slice())
            .unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }
}

impl From<Vec<ChatMessage>> for MessageLog {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(id: &str) -> PendingToolCall {
        PendingToolCall::new("files", "read", json!({"path": "a.txt"}), id)
    }

    #[test]
    fn test_qualified_name_round_trip() {
        let name = qualified_tool_name("files", "read_file");
        assert_eq!(name, "files__read_file");
        assert_eq!(split_qualified_name(&name), Some(("files", "read_file")));
    }

    #[test]
    fn test_split_qualified_name_rejects_bare_names() {
        assert_eq!(split_qualified_name("read_file"), None);
        assert_eq!(split_qualified_name("__read"), None);
        assert_eq!(split_qualified_name("files__"), None);
    }

    #[test]
    fn test_split_keeps_later_separators_in_tool_name() {
        assert_eq!(
            split_qualified_name("files__read__all"),
            Some(("files", "read__all"))
        );
    }

    #[test]
    fn test_pending_from_qualified() {
        let call = PendingToolCall::from_qualified("files__read", json!({}), "c1");
        assert_eq!(call.server_name, "files");
        assert_eq!(call.tool_name, "read");

        let bare = PendingToolCall::from_qualified("read", json!({}), "c2");
        assert_eq!(bare.server_name, "");
        assert_eq!(bare.tool_name, "read");
        assert_eq!(bare.qualified_name(), "read");
    }

    #[test]
    fn test_denied_record_sets_output_and_error() {
        let record = ToolCallRecord::denied(pending("call_1"));
        assert_eq!(record.output, TOOL_CALL_DENIED);
        assert_eq!(record.error.as_deref(), Some(TOOL_CALL_DENIED));
        assert_eq!(record.result_text(), TOOL_CALL_DENIED);
    }

    #[test]
    fn test_failed_record_result_text_is_error() {
        let record = ToolCallRecord::failed(pending("call_1"), "boom", 12);
        assert!(record.output.is_empty());
        assert!(record.is_error());
        assert_eq!(record.result_text(), "boom");
        assert_eq!(record.elapsed_ms, 12);
    }

    #[test]
    fn test_completed_record() {
        let record = ToolCallRecord::completed(pending("call_1"), "contents", 5);
        assert!(!record.is_error());
        assert_eq!(record.result_text(), "contents");
        assert_eq!(record.qualified_name(), "files__read");
    }

    #[test]
    fn test_turn_preserves_result_order() {
        let mut turn = Turn::new();
        turn.push_text("Let me look.");
        turn.push_tool_call(ToolCallRecord::completed(pending("call_1"), "x", 1));
        turn.push_text(" Done.");

        assert!(matches!(turn.results[0], TurnResult::Text { .. }));
        assert!(matches!(turn.results[1], TurnResult::ToolCall(_)));
        assert_eq!(turn.text(), "Let me look. Done.");
        assert_eq!(turn.tool_calls().count(), 1);
    }

    #[test]
    fn test_error_turn_has_no_results() {
        let turn = Turn::error("backend down");
        assert!(turn.is_empty());
        assert_eq!(turn.error.as_deref(), Some("backend down"));
    }

    #[test]
    fn test_reply_suspension() {
        let mut reply = AssistantReply::new();
        assert!(!reply.is_suspended());
        reply.pending_tool_calls.push(pending("call_1"));
        assert!(reply.is_suspended());
    }

    #[test]
    fn test_approval_decision_serde() {
        let json = serde_json::to_string(&ApprovalDecision::AllowSession).unwrap();
        assert_eq!(json, "\"allow-session\"");
        let parsed: ApprovalDecision = serde_json::from_str("\"allow-once\"").unwrap();
        assert_eq!(parsed, ApprovalDecision::AllowOnce);
        assert_eq!(ApprovalDecision::Deny.to_string(), "deny");
    }

    #[test]
    fn test_approval_flattens_call() {
        let approval = ToolCallApproval::new(pending("call_9"), ApprovalDecision::Deny);
        let value = serde_json::to_value(&approval).unwrap();
        assert_eq!(value["call_id"], "call_9");
        assert_eq!(value["server_name"], "files");
        assert_eq!(value["decision"], "deny");
    }

    #[test]
    fn test_chat_message_tagging() {
        let value = serde_json::to_value(ChatMessage::user("hello")).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hello"}));

        let reply = ChatMessage::Assistant(AssistantReply::new());
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["role"], "assistant");
        let back: ChatMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, reply);
    }

    #[test]
    fn test_log_since_and_pending() {
        let mut log = MessageLog::new();
        log.push(ChatMessage::user("hi"));
        let cursor = log.len();

        let mut reply = AssistantReply::new();
        reply.pending_tool_calls.push(pending("call_1"));
        log.push(ChatMessage::Assistant(reply));

        assert_eq!(log.since(cursor).len(), 1);
        assert_eq!(log.since(99).len(), 0);
        assert_eq!(log.pending_tool_calls().len(), 1);
        assert_eq!(log.pending_tool_calls()[0].call_id, "call_1");
    }

    #[test]
    fn test_log_truncate_and_clear() {
        let mut log = MessageLog::from(vec![
            ChatMessage::user("a"),
            ChatMessage::user("b"),
            ChatMessage::user("c"),
        ]);
        log.truncate(1);
        assert_eq!(log.len(), 1);
        log.clear();
        assert!(log.is_empty());
    }
}
