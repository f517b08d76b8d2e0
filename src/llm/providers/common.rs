// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::sync::LazyLock;

use crate::error::{ApiError, ParleyError};

/// Parse token counts from an arbitrary message by extracting the first numeric tokens.
pub(crate) fn parse_numeric_token_counts(message: &str) -> (u32, u32) {
    let numbers: Vec<u32> = message
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|s| s.parse().ok())
        .collect();

    match numbers.as_slice() {
        [current, limit, ..] => (*current, *limit),
        [single] => (*single, 0),
        _ => (0, 0),
    }
}

/// Parse numeric Retry-After header (seconds).
pub(crate) fn parse_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

/// Construct a standardized server error.
pub(crate) fn server_error(status: u16, message: impl Into<String>) -> ParleyError {
    ParleyError::Api(ApiError::ServerError {
        status,
        message: message.into(),
    })
}

/// Map errors that every vendor signals the same way through the status code
pub(crate) fn status_error(status: u16, retry_after: Option<u64>) -> Option<ParleyError> {
    match status {
        401 | 403 => Some(ParleyError::Api(ApiError::AuthenticationFailed)),
        429 => Some(ParleyError::Api(ApiError::RateLimited(
            retry_after.unwrap_or(10) as u32,
        ))),
        _ => None,
    }
}

/// Map a transport failure to the API error taxonomy
pub(crate) fn transport_error(error: reqwest::Error) -> ParleyError {
    if error.is_timeout() {
        ParleyError::Api(ApiError::Timeout)
    } else if error.is_connect() {
        ParleyError::Api(ApiError::Network(error.to_string()))
    } else {
        ParleyError::Http(error)
    }
}

/// Whether an error message describes a context-window overflow
pub(crate) fn mentions_context_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("context")
        || lower.contains("too long")
        || (lower.contains("token") && (lower.contains("limit") || lower.contains("maximum")))
}

/// Tool arguments as the JSON string the OpenAI-style APIs expect
pub(crate) fn arguments_string(args: &serde_json::Value) -> String {
    if args.is_null() {
        return "{}".to_string();
    }
    serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string())
}

/// Parse a JSON arguments string; malformed input becomes an empty object
pub(crate) fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({}))
}

/// Matches `{"name": "tool", "arguments": {...}}` written into plain text
static JSON_TOOL_CALL_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"\{\s*"name"\s*:\s*"([^"]+)"\s*,\s*"arguments"\s*:\s*(\{[^}]*\})\s*\}"#).ok()
});

/// Extract a tool call some models print as JSON text instead of using the
/// structured `tool_calls` field
pub(crate) fn try_parse_json_tool_call(text: &str) -> Option<(String, serde_json::Value)> {
    if let Some(caps) = JSON_TOOL_CALL_PATTERN
        .as_ref()
        .and_then(|re| re.captures(text))
    {
        let name = caps.get(1)?.as_str().to_string();
        if let Ok(args) = serde_json::from_str(caps.get(2)?.as_str()) {
            return Some((name, args));
        }
    }

    let trimmed = text.trim();
    let start = trimmed.find('{')?;
    let json_part = &trimmed[start..];

    // Walk to the matching closing brace so nested arguments survive
    let mut depth = 0i32;
    let mut end_idx = None;
    for (i, c) in json_part.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end_idx = Some(i + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let parsed: serde_json::Value = serde_json::from_str(&json_part[..end_idx?]).ok()?;
    let name = parsed.get("name")?.as_str()?;
    let args = parsed.get("arguments")?;
    Some((name.to_string(), args.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_parse_token_counts() {
        assert_eq!(
            parse_numeric_token_counts("prompt is too long: 215300 tokens > 200000 maximum"),
            (215300, 200000)
        );
        assert_eq!(parse_numeric_token_counts("limit 8192"), (8192, 0));
        assert_eq!(parse_numeric_token_counts("no numbers"), (0, 0));
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after_seconds(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after_seconds(&headers), Some(30));
    }

    #[test]
    fn test_status_error() {
        assert!(matches!(
            status_error(401, None),
            Some(ParleyError::Api(ApiError::AuthenticationFailed))
        ));
        assert!(matches!(
            status_error(429, Some(7)),
            Some(ParleyError::Api(ApiError::RateLimited(7)))
        ));
        assert!(status_error(500, None).is_none());
    }

    #[test]
    fn test_mentions_context_limit() {
        assert!(mentions_context_limit("This model's maximum context length is 8192"));
        assert!(mentions_context_limit("Token limit exceeded"));
        assert!(!mentions_context_limit("invalid model"));
    }

    #[test]
    fn test_arguments_round_trip() {
        assert_eq!(arguments_string(&serde_json::Value::Null), "{}");
        assert_eq!(parse_arguments(&arguments_string(&json!({"a": 1}))), json!({"a": 1}));
        assert_eq!(parse_arguments("not json"), json!({}));
        assert_eq!(parse_arguments(""), json!({}));
    }

    #[test]
    fn test_try_parse_json_tool_call_simple() {
        let (name, args) =
            try_parse_json_tool_call(r#"{"name": "glob", "arguments": {"pattern": "**/*"}}"#)
                .unwrap();
        assert_eq!(name, "glob");
        assert_eq!(args["pattern"], "**/*");
    }

    #[test]
    fn test_try_parse_json_tool_call_nested_arguments() {
        let text = r#"Sure:
{"name": "fs__write", "arguments": {"path": "a.json", "content": {"k": 1}}}"#;
        let (name, args) = try_parse_json_tool_call(text).unwrap();
        assert_eq!(name, "fs__write");
        assert_eq!(args["content"]["k"], 1);
    }

    #[test]
    fn test_try_parse_json_tool_call_no_match() {
        assert!(try_parse_json_tool_call("just words").is_none());
        assert!(try_parse_json_tool_call(r#"{"name": "glob"}"#).is_none());
        assert!(try_parse_json_tool_call(r#"{"arguments": {}}"#).is_none());
    }
}
