// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM module for Parley
//!
//! Provider backends, the shared turn executor, and the message model they
//! exchange.

pub mod executor;
pub mod factory;
pub mod message;
pub mod mock_provider;
pub mod provider;
pub mod providers;
pub mod replay;

pub use executor::{LoopState, TurnExecutor};
pub use factory::ProviderFactory;
pub use message::*;
pub use provider::*;
