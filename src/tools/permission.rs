// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Approval policy for tool calls
//!
//! Decides whether a tool call needs a human decision before it runs, and
//! prompts for that decision in the terminal.

use crossterm::style::{Color, ResetColor, SetForegroundColor};
use crossterm::ExecutableCommand;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::llm::message::{ApprovalDecision, PendingToolCall};

/// Session-wide tool permission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPermission {
    /// Ask before every call unless granted for the session
    #[default]
    Ask,
    /// Run every call without asking
    Always,
    /// Never run tools; calls are recorded as denied
    Never,
}

impl std::fmt::Display for ToolPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolPermission::Ask => write!(f, "ask"),
            ToolPermission::Always => write!(f, "always"),
            ToolPermission::Never => write!(f, "never"),
        }
    }
}

impl std::str::FromStr for ToolPermission {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ask" => Ok(ToolPermission::Ask),
            "always" => Ok(ToolPermission::Always),
            "never" => Ok(ToolPermission::Never),
            other => Err(format!("unknown tool permission: {}", other)),
        }
    }
}

/// Per-session approval state
///
/// Checks are synchronous so the local backend can consult the policy from
/// inside a function-call callback.
#[derive(Debug)]
pub struct ApprovalPolicy {
    permission: RwLock<ToolPermission>,
    /// `(server, tool)` pairs granted allow-session
    granted: RwLock<HashSet<(String, String)>>,
}

impl ApprovalPolicy {
    pub fn new(permission: ToolPermission) -> Self {
        Self {
            permission: RwLock::new(permission),
            granted: RwLock::new(HashSet::new()),
        }
    }

    pub fn permission(&self) -> ToolPermission {
        *read_lock(&self.permission)
    }

    pub fn set_permission(&self, permission: ToolPermission) {
        *write_lock(&self.permission) = permission;
    }

    /// Whether a call to `server`/`tool` must wait for a human decision
    pub fn is_approval_required(&self, server: &str, tool: &str) -> bool {
        match self.permission() {
            ToolPermission::Always | ToolPermission::Never => false,
            ToolPermission::Ask => !self.is_granted(server, tool),
        }
    }

    /// Whether calls are refused outright
    pub fn is_denied(&self, _server: &str, _tool: &str) -> bool {
        self.permission() == ToolPermission::Never
    }

    /// Remember an allow-session decision; granting twice is a no-op
    pub fn grant_session(&self, server: &str, tool: &str) {
        let inserted =
            write_lock(&self.granted).insert((server.to_string(), tool.to_string()));
        if inserted {
            tracing::debug!(
                target: "parley.approval",
                server = %server,
                tool = %tool,
                "tool granted for session"
            );
        }
    }

    pub fn is_granted(&self, server: &str, tool: &str) -> bool {
        read_lock(&self.granted).contains(&(server.to_string(), tool.to_string()))
    }

    pub fn granted_count(&self) -> usize {
        read_lock(&self.granted).len()
    }

    /// Forget every session grant
    pub fn reset(&self) {
        write_lock(&self.granted).clear();
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self::new(ToolPermission::Ask)
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::warn!(target: "parley.approval", "approval lock poisoned, recovering");
        poisoned.into_inner()
    })
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::warn!(target: "parley.approval", "approval lock poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Map a typed answer to a decision; anything unrecognised denies
pub fn parse_decision(input: &str) -> ApprovalDecision {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::AllowOnce,
        "a" | "allow" => ApprovalDecision::AllowSession,
        _ => ApprovalDecision::Deny,
    }
}

/// Ask the user about one pending call on stdin/stdout
pub fn prompt_decision(call: &PendingToolCall) -> io::Result<ApprovalDecision> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    prompt_decision_from(call, &mut input)
}

/// Prompt using an arbitrary input source
pub fn prompt_decision_from(
    call: &PendingToolCall,
    input: &mut impl BufRead,
) -> io::Result<ApprovalDecision> {
    let mut stdout = io::stdout();

    println!();
    stdout.execute(SetForegroundColor(Color::Yellow))?;
    print!("⚠ ");
    stdout.execute(ResetColor)?;
    println!(
        "Tool '{}' on server '{}' wants to run",
        call.tool_name, call.server_name
    );
    if !call.args.is_null() {
        stdout.execute(SetForegroundColor(Color::DarkGrey))?;
        println!("  {}", call.args);
        stdout.execute(ResetColor)?;
    }

    println!();
    print!("Allow? [y]es / [a]llow for session / [n]o: ");
    stdout.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    println!();

    Ok(parse_decision(&line))
}
