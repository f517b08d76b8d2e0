// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat session management
//!
//! Sessions own the message log and are the entry point callers drive.
//! The store keeps sessions addressable by id.

mod session;
pub mod store;

pub use session::{ChatInput, ChatSession, ChatSessionBuilder, MessageUpdate};
pub use store::{InMemorySessionStore, SessionStore, SharedSession};
