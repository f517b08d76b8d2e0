// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! In-process local model backend
//!
//! The engine behind [`LocalModel`] runs its own function-call rounds and
//! calls back into a [`FunctionCallHandler`] for every function the model
//! invokes. When a call needs a human decision the handler records it,
//! cancels the generation token and answers [`FunctionOutcome::Aborted`],
//! which is how this backend suspends mid-generation.

pub mod runner;

pub use runner::{ChatMlRunner, GeneratedText, GenerationParams, TextGenerator};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::llm::executor::resolve_without_approval;
use crate::llm::message::{PendingToolCall, ToolCallRecord, Turn, TurnResult};
use crate::llm::provider::{
    ProviderBackend, RoundOutput, RoundPart, RoundRequest, Sampling, StopReason, Suspension,
    ToolRuntime, Usage,
};
use crate::tools::ToolDefinition;

/// Conversation entry as the local engine sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum LocalMessage {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        calls: Vec<LocalFunctionCall>,
    },
    Tool {
        name: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFunctionCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Input for one engine generation
#[derive(Debug, Clone)]
pub struct LocalRequest {
    pub messages: Vec<LocalMessage>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub sampling: Sampling,
    pub max_output_tokens: u32,
    pub max_function_rounds: u32,
}

/// What the handler tells the engine about a function call
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionOutcome {
    Output(String),
    /// Stop generating; the call waits for approval
    Aborted,
}

/// Callback the engine uses to run a function
#[async_trait]
pub trait FunctionCallHandler: Send + Sync {
    async fn call_function(&self, name: &str, arguments: &serde_json::Value) -> FunctionOutcome;
}

/// One ordered item of engine output
#[derive(Debug, Clone, PartialEq)]
pub enum LocalItem {
    Text(String),
    /// A call the handler answered with an output
    FunctionCall(LocalFunctionCall),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalGeneration {
    pub items: Vec<LocalItem>,
    pub usage: Usage,
    pub stop_reason: Option<StopReason>,
}

/// An in-process engine that can chain function calls
#[async_trait]
pub trait LocalModel: Send + Sync {
    async fn generate(
        &self,
        request: LocalRequest,
        handler: &dyn FunctionCallHandler,
        cancel: CancellationToken,
    ) -> Result<LocalGeneration>;
}

/// Result of one handled call, matched in order with the engine's call items
#[derive(Debug)]
struct HandledCall {
    output: String,
    elapsed_ms: u64,
    error: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        tracing::warn!(target: "parley.provider.local", "recovering poisoned handler lock");
        poisoned.into_inner()
    })
}

/// Handler that resolves calls through the session's tools and policy
struct LocalHandler<'a> {
    tools: &'a [ToolDefinition],
    runtime: &'a ToolRuntime,
    cancel: CancellationToken,
    in_flight: Semaphore,
    handled: Mutex<VecDeque<HandledCall>>,
    pending: Mutex<Vec<PendingToolCall>>,
}

impl<'a> LocalHandler<'a> {
    fn new(tools: &'a [ToolDefinition], runtime: &'a ToolRuntime, cancel: CancellationToken) -> Self {
        Self {
            tools,
            runtime,
            cancel,
            in_flight: Semaphore::new(1),
            handled: Mutex::new(VecDeque::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    fn next_handled(&self) -> Option<HandledCall> {
        lock(&self.handled).pop_front()
    }

    fn take_pending(&self) -> Vec<PendingToolCall> {
        std::mem::take(&mut *lock(&self.pending))
    }
}

#[async_trait]
impl FunctionCallHandler for LocalHandler<'_> {
    async fn call_function(&self, name: &str, arguments: &serde_json::Value) -> FunctionOutcome {
        let Ok(_permit) = self.in_flight.acquire().await else {
            return FunctionOutcome::Aborted;
        };
        if self.cancel.is_cancelled() {
            return FunctionOutcome::Aborted;
        }

        let call = PendingToolCall::from_qualified(name, arguments.clone(), new_call_id());
        match resolve_without_approval(self.tools, self.runtime, call.clone()).await {
            Some(record) => {
                let output = record.result_text().to_string();
                lock(&self.handled).push_back(HandledCall {
                    output: record.output,
                    elapsed_ms: record.elapsed_ms,
                    error: record.error,
                });
                FunctionOutcome::Output(output)
            }
            None => {
                tracing::info!(
                    target: "parley.approval",
                    tool = %call.qualified_name(),
                    "aborting local generation for approval"
                );
                lock(&self.pending).push(call);
                self.cancel.cancel();
                FunctionOutcome::Aborted
            }
        }
    }
}

fn new_call_id() -> String {
    format!("local_{}", uuid::Uuid::new_v4().simple())
}

/// Backend over any [`LocalModel`]
pub struct LocalBackend {
    model: Arc<dyn LocalModel>,
    model_name: String,
    max_function_rounds: u32,
}

impl LocalBackend {
    pub fn new(model: Arc<dyn LocalModel>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            max_function_rounds: 4,
        }
    }

    pub fn with_max_function_rounds(mut self, rounds: u32) -> Self {
        self.max_function_rounds = rounds;
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl ProviderBackend for LocalBackend {
    type Wire = LocalMessage;

    const SUSPENSION: Suspension = Suspension::AbortSignal;

    fn name(&self) -> &str {
        "local"
    }

    fn encode_user(&self, text: &str) -> Vec<LocalMessage> {
        vec![LocalMessage::User {
            content: text.to_string(),
        }]
    }

    /// Each call goes out with the text that preceded it, followed by its result
    fn encode_turn(&self, turn: &Turn) -> Vec<LocalMessage> {
        let mut wire = Vec::new();
        let mut text = String::new();
        for result in &turn.results {
            match result {
                TurnResult::Text { text: fragment } => text.push_str(fragment),
                TurnResult::ToolCall(record) => {
                    wire.push(LocalMessage::Assistant {
                        content: std::mem::take(&mut text),
                        calls: vec![LocalFunctionCall {
                            name: record.qualified_name(),
                            arguments: record.args.clone(),
                        }],
                    });
                    wire.push(LocalMessage::Tool {
                        name: record.qualified_name(),
                        content: record.result_text().to_string(),
                    });
                }
            }
        }

        if !text.is_empty() {
            wire.push(LocalMessage::Assistant {
                content: text,
                calls: Vec::new(),
            });
        }
        wire
    }

    async fn generate_round(&self, request: RoundRequest<'_, LocalMessage>) -> Result<RoundOutput> {
        let handler = LocalHandler::new(request.tools, request.runtime, request.cancel.clone());
        let local_request = LocalRequest {
            messages: request.history.to_vec(),
            system_prompt: request.system_prompt.map(str::to_string),
            tools: request.tools.to_vec(),
            sampling: request.sampling.resolve(),
            max_output_tokens: request.max_output_tokens,
            max_function_rounds: self.max_function_rounds,
        };

        tracing::debug!(
            target: "parley.provider.local",
            model = %self.model_name,
            messages = local_request.messages.len(),
            "starting local generation"
        );

        let generation = self
            .model
            .generate(local_request, &handler, request.cancel.clone())
            .await?;

        let mut output = RoundOutput {
            usage: generation.usage,
            pending: handler.take_pending(),
            ..RoundOutput::default()
        };
        for item in generation.items {
            match item {
                LocalItem::Text(text) => output.push_text(text),
                LocalItem::FunctionCall(call) => {
                    let pending =
                        PendingToolCall::from_qualified(&call.name, call.arguments, new_call_id());
                    match handler.next_handled() {
                        Some(handled) => output.parts.push(RoundPart::ToolResolved(ToolCallRecord {
                            server_name: pending.server_name,
                            tool_name: pending.tool_name,
                            args: pending.args,
                            call_id: pending.call_id,
                            output: handled.output,
                            elapsed_ms: handled.elapsed_ms,
                            error: handled.error,
                        })),
                        // The call the handler aborted on is already pending
                        None if !output.pending.is_empty() => {
                            tracing::debug!(
                                target: "parley.provider.local",
                                tool = %call.name,
                                "dropping call that is waiting for approval"
                            );
                        }
                        None => {
                            tracing::warn!(
                                target: "parley.provider.local",
                                tool = %call.name,
                                "engine reported a call the handler never ran"
                            );
                            output.push_tool_request(pending);
                        }
                    }
                }
            }
        }

        if output.pending.is_empty() {
            output.stop_reason = generation.stop_reason;
            output.finished = generation.stop_reason == Some(StopReason::EndTurn);
        } else {
            output.stop_reason = Some(StopReason::Aborted);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use crate::llm::message::{ApprovalDecision, ChatMessage, ToolCallApproval};
    use crate::llm::provider::{ProviderAdapter, TurnContext};
    use crate::tools::{
        ApprovalPolicy, SessionContext, StaticToolCatalog, ToolCatalog, ToolPermission,
    };
    use serde_json::json;

    /// Engine that calls one function, then answers with the function output
    struct EchoEngine;

    #[async_trait]
    impl LocalModel for EchoEngine {
        async fn generate(
            &self,
            request: LocalRequest,
            handler: &dyn FunctionCallHandler,
            cancel: CancellationToken,
        ) -> Result<LocalGeneration> {
            // Resume: the last message is already the tool result
            if let Some(LocalMessage::Tool { content, .. }) = request.messages.last() {
                return Ok(LocalGeneration {
                    items: vec![LocalItem::Text(format!("done: {}", content))],
                    usage: Usage::new(5, 2),
                    stop_reason: Some(StopReason::EndTurn),
                });
            }

            let call = LocalFunctionCall {
                name: "demo__echo".to_string(),
                arguments: json!({"text": "hi"}),
            };
            let mut items = vec![LocalItem::Text("calling".to_string())];
            match handler.call_function(&call.name, &call.arguments).await {
                FunctionOutcome::Output(out) => {
                    items.push(LocalItem::FunctionCall(call));
                    if cancel.is_cancelled() {
                        return Ok(LocalGeneration {
                            items,
                            stop_reason: Some(StopReason::Aborted),
                            ..LocalGeneration::default()
                        });
                    }
                    items.push(LocalItem::Text(format!("done: {}", out)));
                    Ok(LocalGeneration {
                        items,
                        usage: Usage::new(5, 2),
                        stop_reason: Some(StopReason::EndTurn),
                    })
                }
                FunctionOutcome::Aborted => Ok(LocalGeneration {
                    items,
                    usage: Usage::new(5, 1),
                    stop_reason: Some(StopReason::Aborted),
                }),
            }
        }
    }

    fn catalog() -> Arc<dyn ToolCatalog> {
        Arc::new(StaticToolCatalog::new().with_fn(
            ToolDefinition::new("demo", "echo", "Echo text", json!({"type": "object"})),
            |args| async move { Ok(args["text"].as_str().unwrap_or_default().to_string()) },
        ))
    }

    fn context(permission: ToolPermission) -> TurnContext {
        let settings = SessionSettings {
            tool_permission: permission,
            ..SessionSettings::default()
        };
        let policy = Arc::new(ApprovalPolicy::new(permission));
        TurnContext::new(settings, policy, catalog(), SessionContext::new("local-test"))
    }

    fn backend() -> LocalBackend {
        LocalBackend::new(Arc::new(EchoEngine), "echo")
    }

    #[tokio::test]
    async fn test_runs_function_inside_generation() {
        let ctx = context(ToolPermission::Always);
        let reply = backend()
            .generate_response(&ctx, &[ChatMessage::user("go")])
            .await
            .unwrap();

        assert_eq!(reply.turns.len(), 1);
        assert!(!reply.is_suspended());
        let turn = &reply.turns[0];
        assert_eq!(turn.tool_calls().count(), 1);
        assert_eq!(turn.text(), "callingdone: hi");
        let record = turn.tool_calls().next().unwrap();
        assert_eq!(record.output, "hi");
        assert_eq!(record.server_name, "demo");
    }

    #[tokio::test]
    async fn test_aborts_for_approval_and_resumes() {
        let ctx = context(ToolPermission::Ask);
        let backend = backend();
        assert_eq!(ProviderAdapter::suspension(&backend), Suspension::AbortSignal);

        let mut log = vec![ChatMessage::user("go")];
        let reply = backend.generate_response(&ctx, &log).await.unwrap();
        assert!(reply.is_suspended());
        assert_eq!(reply.pending_tool_calls.len(), 1);
        assert_eq!(reply.pending_tool_calls[0].tool_name, "echo");
        assert_eq!(reply.turns[0].tool_calls().count(), 0);

        let pending = reply.pending_tool_calls[0].clone();
        log.push(ChatMessage::Assistant(reply));
        log.push(ChatMessage::approval(vec![ToolCallApproval {
            call: pending,
            decision: ApprovalDecision::AllowOnce,
        }]));

        let reply = backend.generate_response(&ctx, &log).await.unwrap();
        assert_eq!(reply.turns.len(), 2);
        assert_eq!(reply.turns[0].tool_calls().next().unwrap().output, "hi");
        assert_eq!(reply.turns[1].text(), "done: hi");
    }

    #[tokio::test]
    async fn test_handler_serializes_and_records() {
        let tools = catalog()
            .included_tools(&SessionContext::new("s"))
            .await
            .unwrap();
        let runtime = ToolRuntime {
            catalog: catalog(),
            policy: Arc::new(ApprovalPolicy::new(ToolPermission::Always)),
            session: SessionContext::new("s"),
        };
        let handler = LocalHandler::new(&tools, &runtime, CancellationToken::new());

        let first = handler.call_function("demo__echo", &json!({"text": "a"})).await;
        let missing = handler.call_function("demo__nope", &json!({})).await;

        assert_eq!(first, FunctionOutcome::Output("a".to_string()));
        assert_eq!(
            missing,
            FunctionOutcome::Output("Tool not found: demo__nope".to_string())
        );
        assert_eq!(handler.next_handled().unwrap().output, "a");
        let failed = handler.next_handled().unwrap();
        assert!(failed.error.is_some());
        assert!(handler.next_handled().is_none());
        assert!(handler.take_pending().is_empty());
    }

    #[tokio::test]
    async fn test_handler_cancels_token_on_approval() {
        let tools = catalog()
            .included_tools(&SessionContext::new("s"))
            .await
            .unwrap();
        let runtime = ToolRuntime {
            catalog: catalog(),
            policy: Arc::new(ApprovalPolicy::new(ToolPermission::Ask)),
            session: SessionContext::new("s"),
        };
        let cancel = CancellationToken::new();
        let handler = LocalHandler::new(&tools, &runtime, cancel.clone());

        let outcome = handler.call_function("demo__echo", &json!({})).await;
        assert_eq!(outcome, FunctionOutcome::Aborted);
        assert!(cancel.is_cancelled());
        assert_eq!(handler.take_pending().len(), 1);

        // Later calls in the same generation are refused outright
        let outcome = handler.call_function("demo__echo", &json!({})).await;
        assert_eq!(outcome, FunctionOutcome::Aborted);
        assert!(handler.take_pending().is_empty());
    }

    #[test]
    fn test_encode_turn() {
        let mut turn = Turn::new();
        turn.push_tool_call(ToolCallRecord::completed(
            PendingToolCall::new("demo", "echo", json!({"text": "x"}), "c1"),
            "x",
            1,
        ));
        turn.push_text("ok");

        let wire = backend().encode_turn(&turn);
        assert_eq!(wire.len(), 3);
        match &wire[0] {
            LocalMessage::Assistant { content, calls } => {
                assert!(content.is_empty());
                assert_eq!(calls[0].name, "demo__echo");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            wire[1],
            LocalMessage::Tool {
                name: "demo__echo".to_string(),
                content: "x".to_string()
            }
        );
        assert_eq!(
            wire[2],
            LocalMessage::Assistant {
                content: "ok".to_string(),
                calls: Vec::new()
            }
        );
        assert!(backend().encode_turn(&Turn::new()).is_empty());
    }

    #[test]
    fn test_encode_turn_keeps_text_after_its_call() {
        let mut turn = Turn::new();
        turn.push_text("calling. ");
        turn.push_tool_call(ToolCallRecord::completed(
            PendingToolCall::new("demo", "echo", json!({"text": "hi"}), "c1"),
            "hi",
            1,
        ));
        turn.push_text("final answer: hi");

        let wire = backend().encode_turn(&turn);
        assert_eq!(
            wire,
            vec![
                LocalMessage::Assistant {
                    content: "calling. ".to_string(),
                    calls: vec![LocalFunctionCall {
                        name: "demo__echo".to_string(),
                        arguments: json!({"text": "hi"}),
                    }],
                },
                LocalMessage::Tool {
                    name: "demo__echo".to_string(),
                    content: "hi".to_string(),
                },
                LocalMessage::Assistant {
                    content: "final answer: hi".to_string(),
                    calls: Vec::new(),
                },
            ]
        );

        let prompt = ChatMlRunner::<NoText>::render_prompt(None, &[], &wire);
        let call_at = prompt.find("\"name\":\"demo__echo\"").unwrap();
        let answer_at = prompt.find("final answer: hi").unwrap();
        assert!(call_at < answer_at);
    }

    /// Generator that is never asked for text
    struct NoText;

    #[async_trait]
    impl TextGenerator for NoText {
        async fn complete(&self, _prompt: &str, _params: &GenerationParams) -> Result<GeneratedText> {
            Ok(GeneratedText::default())
        }
    }

    /// Engine that still reports the call it was refused
    struct KeepsAbortedCall;

    #[async_trait]
    impl LocalModel for KeepsAbortedCall {
        async fn generate(
            &self,
            _request: LocalRequest,
            handler: &dyn FunctionCallHandler,
            _cancel: CancellationToken,
        ) -> Result<LocalGeneration> {
            let call = LocalFunctionCall {
                name: "demo__echo".to_string(),
                arguments: json!({"text": "once"}),
            };
            let outcome = handler.call_function(&call.name, &call.arguments).await;
            assert_eq!(outcome, FunctionOutcome::Aborted);
            Ok(LocalGeneration {
                items: vec![LocalItem::FunctionCall(call)],
                usage: Usage::new(3, 1),
                stop_reason: Some(StopReason::Aborted),
            })
        }
    }

    #[tokio::test]
    async fn test_aborted_call_is_pending_once() {
        let ctx = context(ToolPermission::Ask);
        let backend = LocalBackend::new(Arc::new(KeepsAbortedCall), "keeps");

        let reply = backend
            .generate_response(&ctx, &[ChatMessage::user("go")])
            .await
            .unwrap();

        assert_eq!(reply.pending_tool_calls.len(), 1);
        assert_eq!(reply.pending_tool_calls[0].args, json!({"text": "once"}));
        assert_eq!(reply.turns[0].tool_calls().count(), 0);
    }
}
