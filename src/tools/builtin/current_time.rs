// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Current time tool

use chrono::Utc;
use serde_json::{json, Value};

use crate::error::{ParleyError, Result};
use crate::tools::ToolDefinition;

use super::BUILTIN_SERVER;

pub const NAME: &str = "current_time";

pub fn definition() -> ToolDefinition {
    ToolDefinition::new(
        BUILTIN_SERVER,
        NAME,
        "Get the current UTC date and time.",
        json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "string",
                    "enum": ["rfc3339", "unix"],
                    "description": "Output format (default: rfc3339)"
                }
            }
        }),
    )
}

pub async fn current_time(args: Value) -> Result<String> {
    let now = Utc::now();
    match args["format"].as_str().unwrap_or("rfc3339") {
        "rfc3339" => Ok(now.to_rfc3339()),
        "unix" => Ok(now.timestamp().to_string()),
        other => Err(ParleyError::InvalidInput(format!(
            "unsupported time format: {}",
            other
        ))),
    }
}
