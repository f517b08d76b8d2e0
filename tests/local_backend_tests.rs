// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! In-process backend driven through a session with a scripted generator

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use parley::chat::ChatSession;
use parley::config::SessionSettings;
use parley::llm::message::{ApprovalDecision, ChatMessage, ToolCallApproval};
use parley::llm::provider::{ProviderAdapter, Suspension};
use parley::llm::providers::local::{GeneratedText, GenerationParams};
use parley::llm::providers::{ChatMlRunner, LocalBackend, LocalModel, TextGenerator};
use parley::tools::{StaticToolCatalog, ToolDefinition, ToolPermission};

const CLOCK_CALL: &str = r#"{"name": "clock__now", "arguments": {}}<|im_end|>"#;

struct Scripted {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TextGenerator for Scripted {
    async fn complete(&self, prompt: &str, _params: &GenerationParams) -> parley::Result<GeneratedText> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "out of script".to_string());
        Ok(GeneratedText {
            text,
            prompt_tokens: 8,
            completion_tokens: 2,
            truncated: false,
        })
    }
}

fn clock_catalog(calls: Arc<AtomicUsize>) -> Arc<StaticToolCatalog> {
    Arc::new(StaticToolCatalog::new().with_fn(
        ToolDefinition::new("clock", "now", "Current time", json!({"type": "object"})),
        move |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("noon".to_string())
            }
        },
    ))
}

fn local_session(
    runner: Arc<ChatMlRunner<Scripted>>,
    permission: ToolPermission,
    calls: Arc<AtomicUsize>,
) -> ChatSession {
    let model: Arc<dyn LocalModel> = runner;
    ChatSession::builder(Arc::new(LocalBackend::new(model, "scripted")))
        .with_settings(SessionSettings {
            tool_permission: permission,
            ..SessionSettings::default()
        })
        .with_catalog(clock_catalog(calls))
        .build()
        .unwrap()
}

#[test]
fn test_local_backend_suspends_by_abort() {
    let runner: Arc<dyn LocalModel> = Arc::new(ChatMlRunner::new(Scripted::new(&[])));
    let backend = LocalBackend::new(runner, "scripted");
    assert_eq!(backend.suspension(), Suspension::AbortSignal);
}

#[tokio::test]
async fn test_function_chained_inside_one_round() {
    let calls = Arc::new(AtomicUsize::new(0));
    let runner = Arc::new(ChatMlRunner::new(Scripted::new(&[
        CLOCK_CALL,
        "It is noon.<|im_end|>",
    ])));
    let mut session = local_session(Arc::clone(&runner), ToolPermission::Always, Arc::clone(&calls));

    let update = session.handle_message("what time is it?").await.unwrap();
    let reply = update.reply().unwrap();

    assert_eq!(reply.turns.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let record = reply.tool_calls().next().unwrap();
    assert_eq!(record.qualified_name(), "clock__now");
    assert_eq!(record.output, "noon");
    assert_eq!(reply.text(), "It is noon.");

    // The engine saw the function result before its second completion
    let prompts = runner.generator().prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("<|im_start|>tool\nnoon<|im_end|>"));
}

#[tokio::test]
async fn test_approval_aborts_then_resumes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let runner = Arc::new(ChatMlRunner::new(Scripted::new(&[
        CLOCK_CALL,
        "Noon, as requested.<|im_end|>",
    ])));
    let mut session = local_session(Arc::clone(&runner), ToolPermission::Ask, Arc::clone(&calls));

    let update = session.handle_message("what time is it?").await.unwrap();
    let pending = update.pending_tool_calls().to_vec();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].server_name, "clock");
    assert_eq!(pending[0].tool_name, "now");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let approval = ChatMessage::approval(vec![ToolCallApproval::new(
        pending[0].clone(),
        ApprovalDecision::AllowOnce,
    )]);
    let update = session.handle_message(approval).await.unwrap();
    let reply = update.reply().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(reply.turns.len(), 2);
    assert_eq!(reply.turns[0].tool_calls().count(), 1);
    assert_eq!(reply.text(), "Noon, as requested.");
    assert!(!session.is_awaiting_approval());
}
