// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! File read tool
//!
//! Reads a text file relative to the working directory and returns it with
//! line numbers.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::error::{ParleyError, Result};
use crate::tools::ToolDefinition;

use super::BUILTIN_SERVER;

pub const NAME: &str = "read_file";

const DEFAULT_LIMIT: usize = 2000;
const MAX_LINE_LEN: usize = 500;

pub fn definition() -> ToolDefinition {
    ToolDefinition::new(
        BUILTIN_SERVER,
        NAME,
        "Read the contents of a text file. Returns the file contents with line numbers.",
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file (absolute or relative to the working directory)"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-indexed, default: 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read (default: 2000)"
                }
            },
            "required": ["path"]
        }),
    )
}

fn resolve(working_directory: &Path, path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        working_directory.join(path)
    }
}

pub async fn read_file(working_directory: &Path, args: Value) -> Result<String> {
    let path_str = args["path"]
        .as_str()
        .ok_or_else(|| ParleyError::InvalidInput("path is required".to_string()))?;
    let offset = args["offset"].as_u64().unwrap_or(1) as usize;
    let limit = args["limit"].as_u64().map(|l| l as usize).unwrap_or(DEFAULT_LIMIT);

    let path = resolve(working_directory, path_str);
    if !path.is_file() {
        return Err(ParleyError::ToolExecution(format!(
            "File not found: {}",
            path.display()
        )));
    }

    let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
        ParleyError::ToolExecution(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let lines: Vec<&str> = content.lines().collect();
    let start = offset.saturating_sub(1).min(lines.len());
    let end = start.saturating_add(limit).min(lines.len());

    let mut output = format!(
        "File: {} (lines {}-{} of {})\n",
        path.display(),
        start + 1,
        end,
        lines.len()
    );
    for (i, line) in lines[start..end].iter().enumerate() {
        let shown = match line.char_indices().nth(MAX_LINE_LEN) {
            Some((cut, _)) => format!("{}... (truncated)", &line[..cut]),
            None => line.to_string(),
        };
        output.push_str(&format!("{:>6}\t{}\n", start + i + 1, shown));
    }

    Ok(output)
}
