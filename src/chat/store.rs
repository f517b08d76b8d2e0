// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Session registry
//!
//! Sessions are handed out behind `tokio::sync::Mutex`, so holding the lock
//! for the duration of `handle_message` serializes turns per session while
//! different sessions run concurrently.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::session::ChatSession;
use crate::error::{ParleyError, Result};

pub type SharedSession = Arc<Mutex<ChatSession>>;

/// Registry of live sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Register a session under its own id, returning the shared handle
    async fn insert(&self, session: ChatSession) -> Result<SharedSession>;

    async fn get(&self, session_id: &str) -> Option<SharedSession>;

    async fn remove(&self, session_id: &str) -> Option<SharedSession>;

    async fn session_ids(&self) -> Vec<String>;
}

/// Process-local store
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SharedSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: ChatSession) -> Result<SharedSession> {
        let id = session.session_id().to_string();
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(ParleyError::Session(format!(
                "Session '{}' already exists",
                id
            )));
        }
        let shared = Arc::new(Mutex::new(session));
        sessions.insert(id.clone(), Arc::clone(&shared));
        tracing::debug!(target: "parley.session", session_id = %id, "session registered");
        Ok(shared)
    }

    async fn get(&self, session_id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn remove(&self, session_id: &str) -> Option<SharedSession> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            tracing::debug!(target: "parley.session", session_id, "session removed");
        }
        removed
    }

    async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
