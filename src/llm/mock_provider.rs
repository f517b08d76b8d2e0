// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock backend for testing
//!
//! A scripted [`ProviderBackend`] that can be driven through the real turn
//! executor without making API calls. Every round request is recorded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{ParleyError, Result};
use crate::llm::message::{PendingToolCall, Turn, TurnResult};
use crate::llm::provider::{
    ProviderBackend, RoundOutput, RoundRequest, SamplingParams, StopReason, Suspension,
};

/// Wire format of the mock backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MockWire {
    User {
        text: String,
    },
    Model {
        text: String,
        calls: Vec<MockWireCall>,
    },
    ToolResult {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockWireCall {
    pub name: String,
    pub call_id: String,
    pub args: serde_json::Value,
}

/// One scripted round
#[derive(Debug, Clone)]
pub enum MockRound {
    Output(RoundOutput),
    Error(String),
}

impl MockRound {
    pub fn text(text: impl Into<String>) -> Self {
        MockRound::Output(RoundOutput::text(text).with_usage(10, 5))
    }

    /// A round requesting one tool call by qualified name
    pub fn tool_call(
        qualified_name: &str,
        args: serde_json::Value,
        call_id: impl Into<String>,
    ) -> Self {
        Self::tool_calls(vec![(qualified_name, args, call_id.into())])
    }

    pub fn tool_calls(calls: Vec<(&str, serde_json::Value, String)>) -> Self {
        let mut output = RoundOutput::default()
            .with_usage(10, 5)
            .with_stop_reason(StopReason::ToolUse);
        for (name, args, call_id) in calls {
            output.push_tool_request(PendingToolCall::from_qualified(name, args, call_id));
        }
        MockRound::Output(output)
    }

    pub fn error(message: impl Into<String>) -> Self {
        MockRound::Error(message.into())
    }
}

/// What the executor sent for one round
#[derive(Debug, Clone)]
pub struct RecordedRound {
    pub history: Vec<MockWire>,
    pub system_prompt: Option<String>,
    pub tool_names: Vec<String>,
    pub sampling: SamplingParams,
    pub max_output_tokens: u32,
}

/// A scripted backend
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    script: Arc<Mutex<Vec<MockRound>>>,
    call_count: Arc<AtomicUsize>,
    recorded: Arc<Mutex<Vec<RecordedRound>>>,
    setup_error: Option<String>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Mock backend lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            script: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(AtomicUsize::new(0)),
            recorded: Arc::new(Mutex::new(Vec::new())),
            setup_error: None,
        }
    }

    /// Script the rounds; once exhausted the last one repeats
    pub fn with_rounds(self, rounds: Vec<MockRound>) -> Self {
        *lock(&self.script) = rounds;
        self
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.with_rounds(vec![MockRound::text(text)])
    }

    /// Make `ensure_ready` fail
    pub fn with_setup_error(mut self, message: impl Into<String>) -> Self {
        self.setup_error = Some(message.into());
        self
    }

    /// Append rounds to the script
    pub fn push_rounds(&self, rounds: Vec<MockRound>) {
        lock(&self.script).extend(rounds);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn recorded_rounds(&self) -> Vec<RecordedRound> {
        lock(&self.recorded).clone()
    }

    pub fn last_round(&self) -> Option<RecordedRound> {
        lock(&self.recorded).last().cloned()
    }

    fn next_round(&self) -> MockRound {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst);
        let script = lock(&self.script);
        match script.len() {
            0 => MockRound::text(""),
            len => script[count.min(len - 1)].clone(),
        }
    }
}

#[async_trait]
impl ProviderBackend for MockBackend {
    type Wire = MockWire;

    const SUSPENSION: Suspension = Suspension::BetweenRounds;

    fn name(&self) -> &str {
        &self.name
    }

    fn ensure_ready(&self) -> Result<()> {
        match &self.setup_error {
            Some(message) => Err(ParleyError::Setup(message.clone())),
            None => Ok(()),
        }
    }

    fn encode_user(&self, text: &str) -> Vec<MockWire> {
        vec![MockWire::User {
            text: text.to_string(),
        }]
    }

    fn encode_turn(&self, turn: &Turn) -> Vec<MockWire> {
        let mut text = String::new();
        let mut calls = Vec::new();
        let mut results = Vec::new();
        for result in &turn.results {
            match result {
                TurnResult::Text { text: t } => text.push_str(t),
                TurnResult::ToolCall(record) => {
                    calls.push(MockWireCall {
                        name: record.qualified_name(),
                        call_id: record.call_id.clone(),
                        args: record.args.clone(),
                    });
                    results.push(MockWire::ToolResult {
                        call_id: record.call_id.clone(),
                        output: record.result_text().to_string(),
                    });
                }
            }
        }

        let mut wire = vec![MockWire::Model { text, calls }];
        wire.extend(results);
        wire
    }

    async fn generate_round(&self, request: RoundRequest<'_, MockWire>) -> Result<RoundOutput> {
        lock(&self.recorded).push(RecordedRound {
            history: request.history.to_vec(),
            system_prompt: request.system_prompt.map(str::to_string),
            tool_names: request.tools.iter().map(|t| t.qualified_name()).collect(),
            sampling: request.sampling,
            max_output_tokens: request.max_output_tokens,
        });

        match self.next_round() {
            MockRound::Output(output) => Ok(output),
            MockRound::Error(message) => Err(ParleyError::Api(
                crate::error::ApiError::ServerError {
                    status: 500,
                    message,
                },
            )),
        }
    }
}
