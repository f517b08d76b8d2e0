// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Turn executor
//!
//! The one model/tool-call loop shared by every backend. Each invocation
//! replays the log, resolves a trailing approval if there is one, then runs
//! generation rounds until the model stops calling tools, a call needs
//! approval, the round budget runs out, or the backend fails.

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::llm::message::{
    ApprovalDecision, AssistantReply, ChatMessage, PendingToolCall, ToolCallApproval,
    ToolCallRecord, Turn, MAX_OUTPUT_TOKENS_REACHED, MAX_TURNS_REACHED,
};
use crate::llm::provider::{
    ProviderAdapter, ProviderBackend, RoundPart, RoundRequest, StopReason, Suspension,
    ToolRuntime, TurnContext,
};
use crate::llm::replay::{outstanding_calls, replay_history, trailing_approval};
use crate::tools::{ApprovalPolicy, SessionContext, ToolCatalog, ToolDefinition};

/// Error text when an approval matches none of the outstanding calls
pub const NO_MATCHING_PENDING_CALLS: &str = "No pending tool calls match the submitted approval";

/// Error text when the caller cancelled the turn
pub const GENERATION_CANCELLED: &str = "Generation cancelled";

/// Where the loop is; everything but `Running` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    RoundDone,
    AwaitingApproval,
    /// Tool rounds used up `max_chat_turns`. The reply then holds exactly that many
    /// turns, the last one carrying the error, except for a budget of 1 where the
    /// single generated round is kept and the reply holds two.
    BudgetExhausted,
    Failed,
}

/// Run one tool call through the catalog and record the outcome
pub async fn execute_call(
    catalog: &dyn ToolCatalog,
    session: &SessionContext,
    call: PendingToolCall,
) -> ToolCallRecord {
    let qualified = call.qualified_name();
    let start = Instant::now();
    let result = catalog.call_tool(session, &qualified, &call.args).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(out) => {
            tracing::debug!(
                target: "parley.turn",
                tool = %qualified,
                call_id = %call.call_id,
                elapsed_ms,
                "tool call completed"
            );
            ToolCallRecord::completed(call, out.output, elapsed_ms)
        }
        Err(error) => {
            tracing::warn!(
                target: "parley.turn",
                tool = %qualified,
                call_id = %call.call_id,
                error = %error,
                "tool call failed"
            );
            ToolCallRecord::failed(call, error.to_string(), elapsed_ms)
        }
    }
}

/// Resolve a call the policy does not hold for approval
///
/// Returns `None` when the call has to wait for a human decision.
pub async fn resolve_without_approval(
    tools: &[ToolDefinition],
    runtime: &ToolRuntime,
    call: PendingToolCall,
) -> Option<ToolCallRecord> {
    let known = tools
        .iter()
        .any(|t| t.server_name == call.server_name && t.name == call.tool_name);
    if !known {
        let message = format!("Tool not found: {}", call.qualified_name());
        return Some(ToolCallRecord::failed(call, message, 0));
    }
    if runtime.policy.is_denied(&call.server_name, &call.tool_name) {
        tracing::debug!(
            target: "parley.approval",
            tool = %call.qualified_name(),
            "tool calls are disabled for this session"
        );
        return Some(ToolCallRecord::denied(call));
    }
    if runtime
        .policy
        .is_approval_required(&call.server_name, &call.tool_name)
    {
        return None;
    }
    Some(execute_call(runtime.catalog.as_ref(), &runtime.session, call).await)
}

/// Drives the rounds of one `generate_response` call
pub struct TurnExecutor<'a, B: ProviderBackend> {
    backend: &'a B,
    ctx: &'a TurnContext,
    runtime: ToolRuntime,
    wire: Vec<B::Wire>,
    reply: AssistantReply,
    state: LoopState,
}

impl<'a, B: ProviderBackend> TurnExecutor<'a, B> {
    pub fn new(backend: &'a B, ctx: &'a TurnContext) -> Self {
        Self {
            backend,
            ctx,
            runtime: ctx.tool_runtime(),
            wire: Vec::new(),
            reply: AssistantReply::new(),
            state: LoopState::Running,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run the turn to a terminal state
    pub async fn run(mut self, messages: &[ChatMessage]) -> Result<AssistantReply> {
        self.backend.ensure_ready()?;
        self.run_loop(messages).await;

        tracing::info!(
            target: "parley.turn",
            provider = %ProviderBackend::name(self.backend),
            state = ?self.state,
            turns = self.reply.turns.len(),
            pending = self.reply.pending_tool_calls.len(),
            "turn finished"
        );
        Ok(self.reply)
    }

    async fn run_loop(&mut self, messages: &[ChatMessage]) {
        self.wire = replay_history(self.backend, messages);

        if let Some(approvals) = trailing_approval(messages) {
            let outstanding = outstanding_calls(messages);
            match self.resolve_approvals(approvals, outstanding).await {
                Some(turn) => {
                    self.wire.extend(self.backend.encode_turn(&turn));
                    self.reply.turns.push(turn);
                }
                None => {
                    self.reply.turns.push(Turn::error(NO_MATCHING_PENDING_CALLS));
                    self.state = LoopState::Failed;
                    return;
                }
            }
        }

        while self.state == LoopState::Running {
            self.state = self.run_round().await;
        }
    }

    /// Turn a trailing approval into a resolution turn
    ///
    /// Returns `None` when no approval matches an outstanding call.
    async fn resolve_approvals(
        &self,
        approvals: &[ToolCallApproval],
        outstanding: &[PendingToolCall],
    ) -> Option<Turn> {
        let policy: &ApprovalPolicy = &self.ctx.policy;
        let mut seen = HashSet::new();
        let mut turn = Turn::new();

        for approval in approvals {
            let call_id = &approval.call.call_id;
            let Some(outstanding_call) = outstanding.iter().find(|c| &c.call_id == call_id) else {
                tracing::warn!(
                    target: "parley.approval",
                    call_id = %call_id,
                    "dropping approval for a call that is not pending"
                );
                continue;
            };
            if !seen.insert(call_id.clone()) {
                tracing::warn!(
                    target: "parley.approval",
                    call_id = %call_id,
                    "dropping duplicate approval"
                );
                continue;
            }

            // Run with the approved arguments; an approval without any keeps the model's
            let call = if approval.call.args.is_null() {
                outstanding_call.clone()
            } else {
                PendingToolCall {
                    args: approval.call.args.clone(),
                    ..outstanding_call.clone()
                }
            };

            tracing::debug!(
                target: "parley.approval",
                call_id = %call_id,
                tool = %call.qualified_name(),
                decision = %approval.decision,
                "resolving pending tool call"
            );

            let record = match approval.decision {
                ApprovalDecision::AllowSession => {
                    policy.grant_session(&call.server_name, &call.tool_name);
                    self.execute(call).await
                }
                ApprovalDecision::AllowOnce => self.execute(call).await,
                ApprovalDecision::Deny => ToolCallRecord::denied(call),
            };
            turn.push_tool_call(record);
        }

        let unanswered = outstanding
            .iter()
            .filter(|c| !seen.contains(&c.call_id))
            .count();
        if unanswered > 0 {
            tracing::warn!(
                target: "parley.approval",
                unanswered,
                "pending tool calls left without a decision are dropped"
            );
        }

        if turn.is_empty() {
            None
        } else {
            Some(turn)
        }
    }

    async fn execute(&self, call: PendingToolCall) -> ToolCallRecord {
        execute_call(self.ctx.catalog.as_ref(), &self.ctx.session, call).await
    }

    async fn run_round(&mut self) -> LoopState {
        if self.ctx.cancel.is_cancelled() {
            self.reply.turns.push(Turn::error(GENERATION_CANCELLED));
            return LoopState::Failed;
        }

        let tools = match self.ctx.catalog.included_tools(&self.ctx.session).await {
            Ok(tools) => tools,
            Err(error) => {
                tracing::warn!(target: "parley.turn", error = %error, "tool catalog unavailable");
                self.reply
                    .turns
                    .push(Turn::error(format!("Failed to load tools: {}", error)));
                return LoopState::Failed;
            }
        };

        let settings = &self.ctx.settings;
        let round_cancel: CancellationToken = self.ctx.cancel.child_token();
        let request = RoundRequest {
            history: &self.wire,
            system_prompt: settings.system_prompt.as_deref(),
            tools: &tools,
            sampling: settings.sampling(),
            max_output_tokens: settings.max_output_tokens,
            cancel: round_cancel,
            runtime: &self.runtime,
        };

        tracing::debug!(
            target: "parley.turn",
            round = self.reply.turns.len() + 1,
            wire_messages = self.wire.len(),
            tools = tools.len(),
            "starting generation round"
        );

        let output = match self.backend.generate_round(request).await {
            Ok(output) => output,
            Err(error) => {
                tracing::warn!(target: "parley.turn", error = %error, "backend round failed");
                self.reply.turns.push(Turn::error(error.to_string()));
                return LoopState::Failed;
            }
        };

        let mut turn =
            Turn::new().with_usage(output.usage.input_tokens, output.usage.output_tokens);
        if output.stop_reason == Some(StopReason::MaxTokens) {
            turn.warning = Some(MAX_OUTPUT_TOKENS_REACHED.to_string());
        }

        let finished = output.finished;
        let mut pending: Vec<PendingToolCall> = Vec::new();
        let mut resolved = 0usize;
        for part in output.parts {
            match part {
                RoundPart::Text(text) => turn.push_text(text),
                RoundPart::ToolResolved(record) => {
                    resolved += 1;
                    turn.push_tool_call(record);
                }
                // Once one call waits, every later call in the round waits with it
                RoundPart::ToolRequest(call) if !pending.is_empty() => pending.push(call),
                RoundPart::ToolRequest(call) => {
                    match resolve_without_approval(&tools, &self.runtime, call.clone()).await {
                        Some(record) => {
                            resolved += 1;
                            turn.push_tool_call(record);
                        }
                        None => pending.push(call),
                    }
                }
            }
        }
        pending.extend(output.pending);

        self.wire.extend(self.backend.encode_turn(&turn));
        self.reply.turns.push(turn);

        if !pending.is_empty() {
            tracing::info!(
                target: "parley.approval",
                pending = pending.len(),
                "suspending for tool approval"
            );
            self.reply.pending_tool_calls = pending;
            return LoopState::AwaitingApproval;
        }
        if resolved == 0 || finished {
            return LoopState::RoundDone;
        }
        if self.reply.turns.len() + 1 >= self.ctx.settings.max_chat_turns as usize {
            tracing::info!(
                target: "parley.turn",
                max_chat_turns = self.ctx.settings.max_chat_turns,
                "round budget exhausted"
            );
            self.reply.turns.push(Turn::error(MAX_TURNS_REACHED));
            return LoopState::BudgetExhausted;
        }
        LoopState::Running
    }
}

#[async_trait]
impl<B: ProviderBackend> ProviderAdapter for B {
    fn name(&self) -> &str {
        ProviderBackend::name(self)
    }

    fn suspension(&self) -> Suspension {
        B::SUSPENSION
    }

    async fn generate_response(
        &self,
        ctx: &TurnContext,
        messages: &[ChatMessage],
    ) -> Result<AssistantReply> {
        TurnExecutor::new(self, ctx).run(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use crate::error::ParleyError;
    use crate::llm::message::TurnResult;
    use crate::llm::mock_provider::{MockBackend, MockRound, MockWire};
    use crate::llm::provider::RoundOutput;
    use crate::tools::{StaticToolCatalog, ToolPermission};
    use serde_json::json;
    use std::sync::Arc;

    fn catalog() -> Arc<StaticToolCatalog> {
        Arc::new(
            StaticToolCatalog::new()
                .with_fn(
                    ToolDefinition::new("util", "echo", "Echo", json!({"type": "object"})),
                    |args| async move { Ok(args["text"].as_str().unwrap_or("echo").to_string()) },
                )
                .with_fn(
                    ToolDefinition::new("util", "fail", "Fails", json!({"type": "object"})),
                    |_| async { Err(ParleyError::ToolExecution("broken".to_string())) },
                ),
        )
    }

    fn context(permission: ToolPermission, max_chat_turns: u32) -> TurnContext {
        let settings = SessionSettings {
            max_chat_turns,
            tool_permission: permission,
            ..SessionSettings::default()
        };
        TurnContext::new(
            settings,
            Arc::new(ApprovalPolicy::new(permission)),
            catalog(),
            SessionContext::new("test"),
        )
    }

    fn user(text: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::user(text)]
    }

    #[tokio::test]
    async fn test_simple_text_turn() {
        let backend = MockBackend::new().with_response("Hi there");
        let ctx = context(ToolPermission::Ask, 10);

        let reply = backend.generate_response(&ctx, &user("hello")).await.unwrap();

        assert_eq!(reply.turns.len(), 1);
        assert_eq!(
            reply.turns[0].results,
            vec![TurnResult::Text {
                text: "Hi there".to_string()
            }]
        );
        assert!(reply.pending_tool_calls.is_empty());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_then_text() {
        let backend = MockBackend::new().with_rounds(vec![
            MockRound::tool_call("util__echo", json!({"text": "pong"}), "c1"),
            MockRound::text("done"),
        ]);
        let ctx = context(ToolPermission::Always, 10);

        let reply = backend.generate_response(&ctx, &user("ping")).await.unwrap();

        assert_eq!(reply.turns.len(), 2);
        let record = reply.turns[0].tool_calls().next().unwrap();
        assert_eq!(record.output, "pong");
        assert!(record.error.is_none());

        // Second round saw the call and its result
        let second = backend.last_round().unwrap();
        assert_eq!(second.history.len(), 3);
        assert!(matches!(&second.history[2], MockWire::ToolResult { output, .. } if output == "pong"));
    }

    #[tokio::test]
    async fn test_tool_error_recorded_and_loop_continues() {
        let backend = MockBackend::new().with_rounds(vec![
            MockRound::tool_call("util__fail", json!({}), "c1"),
            MockRound::text("sorry"),
        ]);
        let ctx = context(ToolPermission::Always, 10);

        let reply = backend.generate_response(&ctx, &user("go")).await.unwrap();

        let record = reply.turns[0].tool_calls().next().unwrap();
        assert!(record.output.is_empty());
        assert!(record.error.as_deref().unwrap().contains("broken"));
        assert_eq!(reply.turns.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_recorded() {
        let backend = MockBackend::new().with_rounds(vec![
            MockRound::tool_call("util__missing", json!({}), "c1"),
            MockRound::text("ok"),
        ]);
        let ctx = context(ToolPermission::Always, 10);

        let reply = backend.generate_response(&ctx, &user("go")).await.unwrap();
        let record = reply.turns[0].tool_calls().next().unwrap();
        assert_eq!(record.error.as_deref(), Some("Tool not found: util__missing"));
    }

    #[tokio::test]
    async fn test_suspends_when_approval_required() {
        let backend = MockBackend::new().with_rounds(vec![MockRound::tool_calls(vec![
            ("util__echo", json!({}), "c1".to_string()),
            ("util__echo", json!({}), "c2".to_string()),
        ])]);
        let ctx = context(ToolPermission::Ask, 10);

        let reply = backend.generate_response(&ctx, &user("go")).await.unwrap();

        assert_eq!(reply.turns.len(), 1);
        assert_eq!(reply.turns[0].tool_calls().count(), 0);
        let ids: Vec<_> = reply
            .pending_tool_calls
            .iter()
            .map(|c| c.call_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_granted_call_runs_and_later_calls_wait() {
        let backend = MockBackend::new().with_rounds(vec![MockRound::tool_calls(vec![
            ("util__echo", json!({"text": "a"}), "c1".to_string()),
            ("util__fail", json!({}), "c2".to_string()),
            ("util__echo", json!({"text": "b"}), "c3".to_string()),
        ])]);
        let ctx = context(ToolPermission::Ask, 10);
        ctx.policy.grant_session("util", "echo");

        let reply = backend.generate_response(&ctx, &user("go")).await.unwrap();

        // c1 ran, c2 needs approval, c3 waits behind it even though it is granted
        assert_eq!(reply.turns[0].tool_calls().count(), 1);
        let ids: Vec<_> = reply
            .pending_tool_calls
            .iter()
            .map(|c| c.call_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c2", "c3"]);
    }

    #[tokio::test]
    async fn test_never_permission_denies_without_suspending() {
        let backend = MockBackend::new().with_rounds(vec![
            MockRound::tool_call("util__echo", json!({}), "c1"),
            MockRound::text("understood"),
        ]);
        let ctx = context(ToolPermission::Never, 10);

        let reply = backend.generate_response(&ctx, &user("go")).await.unwrap();

        assert!(reply.pending_tool_calls.is_empty());
        let record = reply.turns[0].tool_calls().next().unwrap();
        assert_eq!(record.output, "Tool call denied");
        assert_eq!(reply.turns.len(), 2);
    }

    #[tokio::test]
    async fn test_round_budget() {
        for n in 2..=5u32 {
            let backend = MockBackend::new().with_rounds(vec![MockRound::tool_call(
                "util__echo",
                json!({}),
                "loop",
            )]);
            let ctx = context(ToolPermission::Always, n);

            let reply = backend.generate_response(&ctx, &user("go")).await.unwrap();

            assert_eq!(reply.turns.len(), n as usize);
            assert_eq!(
                reply.last_turn().unwrap().error.as_deref(),
                Some(MAX_TURNS_REACHED)
            );
            assert!(reply.last_turn().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_budget_of_one_still_runs_a_round() {
        let backend =
            MockBackend::new().with_rounds(vec![MockRound::tool_call("util__echo", json!({}), "c")]);
        let ctx = context(ToolPermission::Always, 1);

        let reply = backend.generate_response(&ctx, &user("go")).await.unwrap();
        assert_eq!(backend.call_count(), 1);
        assert_eq!(reply.turns.len(), 2);
        assert_eq!(reply.turns[0].tool_calls().count(), 1);
        assert_eq!(
            reply.last_turn().unwrap().error.as_deref(),
            Some(MAX_TURNS_REACHED)
        );
    }

    #[tokio::test]
    async fn test_backend_error_becomes_error_turn() {
        let backend = MockBackend::new().with_rounds(vec![MockRound::error("overloaded")]);
        let ctx = context(ToolPermission::Ask, 10);

        let reply = backend.generate_response(&ctx, &user("go")).await.unwrap();
        assert_eq!(reply.turns.len(), 1);
        assert!(reply.turns[0].error.as_deref().unwrap().contains("overloaded"));
        assert!(reply.turns[0].is_empty());
    }

    #[tokio::test]
    async fn test_setup_error_propagates() {
        let backend = MockBackend::new().with_setup_error("no model loaded");
        let ctx = context(ToolPermission::Ask, 10);

        let err = backend.generate_response(&ctx, &user("go")).await.unwrap_err();
        assert!(matches!(err, ParleyError::Setup(_)));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_max_tokens_sets_warning() {
        let output = RoundOutput::text("partial").with_stop_reason(StopReason::MaxTokens);
        let backend = MockBackend::new().with_rounds(vec![MockRound::Output(output)]);
        let ctx = context(ToolPermission::Ask, 10);

        let reply = backend.generate_response(&ctx, &user("go")).await.unwrap();
        let turn = &reply.turns[0];
        assert_eq!(turn.warning.as_deref(), Some(MAX_OUTPUT_TOKENS_REACHED));
        assert!(turn.error.is_none());
        assert_eq!(turn.text(), "partial");
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_before_round() {
        let backend = MockBackend::new().with_response("never");
        let ctx = context(ToolPermission::Ask, 10);
        ctx.cancel.cancel();

        let reply = backend.generate_response(&ctx, &user("go")).await.unwrap();
        assert_eq!(reply.turns[0].error.as_deref(), Some(GENERATION_CANCELLED));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_approval_reports_error() {
        let backend = MockBackend::new().with_response("unused");
        let ctx = context(ToolPermission::Ask, 10);
        let log = vec![
            ChatMessage::user("go"),
            ChatMessage::approval(vec![ToolCallApproval::new(
                PendingToolCall::new("util", "echo", json!({}), "ghost"),
                ApprovalDecision::AllowOnce,
            )]),
        ];

        let reply = backend.generate_response(&ctx, &log).await.unwrap();
        assert_eq!(reply.turns.len(), 1);
        assert_eq!(
            reply.turns[0].error.as_deref(),
            Some(NO_MATCHING_PENDING_CALLS)
        );
        assert_eq!(backend.call_count(), 0);
    }

    async fn resolve_with_args(args: serde_json::Value) -> AssistantReply {
        let backend = MockBackend::new().with_rounds(vec![
            MockRound::tool_call("util__echo", json!({"text": "model"}), "c1"),
            MockRound::text("done"),
        ]);
        let ctx = context(ToolPermission::Ask, 10);

        let mut log = user("go");
        let reply = backend.generate_response(&ctx, &log).await.unwrap();
        let mut call = reply.pending_tool_calls[0].clone();
        call.args = args;
        log.push(ChatMessage::Assistant(reply));
        log.push(ChatMessage::approval(vec![ToolCallApproval::new(
            call,
            ApprovalDecision::AllowOnce,
        )]));

        backend.generate_response(&ctx, &log).await.unwrap()
    }

    #[tokio::test]
    async fn test_approved_call_runs_with_approval_args() {
        let reply = resolve_with_args(json!({"text": "edited"})).await;

        let record = reply.turns[0].tool_calls().next().unwrap();
        assert_eq!(record.call_id, "c1");
        assert_eq!(record.qualified_name(), "util__echo");
        assert_eq!(record.args, json!({"text": "edited"}));
        assert_eq!(record.output, "edited");
        assert_eq!(reply.turns[1].text(), "done");
    }

    #[tokio::test]
    async fn test_approval_without_args_keeps_model_args() {
        let reply = resolve_with_args(serde_json::Value::Null).await;

        let record = reply.turns[0].tool_calls().next().unwrap();
        assert_eq!(record.args, json!({"text": "model"}));
        assert_eq!(record.output, "model");
    }

    #[tokio::test]
    async fn test_sampling_and_budget_forwarded() {
        let backend = MockBackend::new().with_response("ok");
        let mut ctx = context(ToolPermission::Ask, 10);
        ctx.settings.system_prompt = Some("Be brief".to_string());
        ctx.settings.max_output_tokens = 256;

        backend.generate_response(&ctx, &user("go")).await.unwrap();
        let round = backend.last_round().unwrap();
        assert_eq!(round.system_prompt.as_deref(), Some("Be brief"));
        assert_eq!(round.max_output_tokens, 256);
        assert_eq!(round.tool_names, vec!["util__echo", "util__fail"]);
    }

    #[tokio::test]
    async fn test_input_log_untouched() {
        let backend = MockBackend::new().with_response("ok");
        let ctx = context(ToolPermission::Ask, 10);
        let log = user("go");
        let before = log.clone();
        backend.generate_response(&ctx, &log).await.unwrap();
        assert_eq!(log, before);
    }

    #[test]
    fn test_suspension_marker() {
        let backend = MockBackend::new();
        assert_eq!(ProviderAdapter::suspension(&backend), Suspension::BetweenRounds);
    }
}
