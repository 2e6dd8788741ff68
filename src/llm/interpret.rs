//! Turns free-form model text into spoken text and tool calls.
//!
//! The model is asked to answer tool requests with three sentinel lines:
//!
//! ```text
//! USE_TOOL: flashlight
//! PARAMETERS: {"action": "on"}
//! REASON: Turning on the flashlight
//! ```
//!
//! Anything else is treated as a conversational reply, except for one
//! best-effort heuristic that recognizes plain-text flashlight requests.

use super::LlmResponse;
use crate::tools::{FlashlightTool, ToolCall, ToolParameters};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

pub const TOOL_PREFIX: &str = "USE_TOOL:";
pub const PARAMETERS_PREFIX: &str = "PARAMETERS:";
pub const REASON_PREFIX: &str = "REASON:";

static FLASHLIGHT_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(flashlight|flash light|torch)\b").expect("valid regex"));
static ON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bon\b").expect("valid regex"));
static OFF_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\boff\b").expect("valid regex"));

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParameterParseError {
    #[error("parameters are not valid JSON: {0}")]
    Malformed(String),
    #[error("parameters must be a JSON object")]
    NotAnObject,
    #[error("parameter '{0}' must be a string, number or boolean")]
    NestedValue(String),
}

/// Parse a flat JSON object into string parameters. Blank input means no parameters.
pub fn parse_parameters(text: &str) -> Result<ToolParameters, ParameterParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(ToolParameters::new());
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| ParameterParseError::Malformed(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(ParameterParseError::NotAnObject);
    };

    object
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(ParameterParseError::NestedValue(key))
                }
            };
            Ok((key.trim().to_string(), value))
        })
        .collect()
}

/// Value after `prefix` if `line` starts with it, ignoring case and markdown emphasis
fn strip_sentinel<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let line = line.trim().trim_start_matches(['*', '`', '-', ' ']);
    let head = line.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    Some(line[prefix.len()..].trim().trim_matches(['*', '`']).trim())
}

#[derive(Default)]
struct Block {
    tool: String,
    parameters: Option<String>,
    reason: Option<String>,
}

fn sentinel_blocks(text: &str) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    for line in text.lines() {
        if let Some(tool) = strip_sentinel(line, TOOL_PREFIX) {
            blocks.push(Block {
                tool: tool.trim_matches(|c| c == '"' || c == '\'').trim().to_string(),
                ..Default::default()
            });
        } else if let Some(params) = strip_sentinel(line, PARAMETERS_PREFIX) {
            if let Some(block) = blocks.last_mut() {
                block.parameters = Some(params.to_string());
            }
        } else if let Some(reason) = strip_sentinel(line, REASON_PREFIX) {
            if let Some(block) = blocks.last_mut() {
                block.reason = Some(reason.to_string());
            }
        }
    }
    blocks
}

/// Best-effort reading of a plain-text flashlight request. Ambiguous text
/// that mentions both "on" and "off" is left alone.
fn flashlight_fallback(text: &str) -> Option<ToolCall> {
    if !FLASHLIGHT_WORD.is_match(text) {
        return None;
    }
    let action = match (ON_WORD.is_match(text), OFF_WORD.is_match(text)) {
        (true, false) => "on",
        (false, true) => "off",
        _ => return None,
    };
    let parameters = [("action".to_string(), action.to_string())]
        .into_iter()
        .collect();
    Some(ToolCall::new(FlashlightTool::NAME, parameters))
}

/// Interpret model output. Never fails.
pub fn interpret(text: &str) -> LlmResponse {
    let blocks: Vec<Block> = sentinel_blocks(text)
        .into_iter()
        .filter(|block| !block.tool.is_empty() && block.parameters.is_some())
        .collect();

    if !blocks.is_empty() {
        let mut calls = Vec::with_capacity(blocks.len());
        let mut reasons = Vec::new();
        for block in blocks {
            let raw = block.parameters.unwrap_or_default();
            let parameters = parse_parameters(&raw).unwrap_or_else(|e| {
                log::warn!("Ignoring parameters for {} ({}): {}", block.tool, e, raw);
                ToolParameters::new()
            });
            if let Some(reason) = block.reason.filter(|r| !r.is_empty()) {
                reasons.push(reason);
            }
            calls.push(ToolCall::new(block.tool, parameters));
        }
        log::info!("🤖 Model requested {} tool call(s)", calls.len());
        return LlmResponse::with_tools(reasons.join(" "), calls);
    }

    let text = text.trim();
    if let Some(call) = flashlight_fallback(text) {
        log::info!("🤖 No tool sentinel, inferred flashlight {:?}", call.param("action"));
        return LlmResponse::with_tools(text, vec![call]);
    }

    LlmResponse::conversational(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_block() {
        let response = interpret(
            "USE_TOOL: flashlight\nPARAMETERS: {\"action\": \"on\"}\nREASON: Turning on the flashlight for you",
        );
        assert!(response.should_use_tools);
        assert_eq!(response.text, "Turning on the flashlight for you");
        assert_eq!(response.tool_calls.len(), 1);
        let call = &response.tool_calls[0];
        assert_eq!(call.name, "flashlight");
        assert_eq!(call.parameters.len(), 1);
        assert_eq!(call.parameters.get("action").map(String::as_str), Some("on"));
    }

    #[test]
    fn test_sentinel_tolerates_formatting() {
        let response = interpret(
            "Sure!\n**USE_TOOL:** phone\n  parameters: {\"contact\": \"John Smith\", \"retries\": 2}\nREASON: Calling John",
        );
        let call = &response.tool_calls[0];
        assert_eq!(call.name, "phone");
        assert_eq!(call.param("contact"), Some("John Smith"));
        assert_eq!(call.param("retries"), Some("2"));
    }

    #[test]
    fn test_multiple_calls_keep_order() {
        let response = interpret(
            "USE_TOOL: flashlight\nPARAMETERS: {\"action\": \"off\"}\nREASON: Flashlight off.\n\
             USE_TOOL: smart_switch\nPARAMETERS: {\"action\": \"on\"}\nREASON: Light on.",
        );
        let names: Vec<&str> = response.tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["flashlight", "smart_switch"]);
        assert_eq!(response.text, "Flashlight off. Light on.");
    }

    #[test]
    fn test_malformed_parameters_degrade_to_empty_map() {
        for raw in ["{\"action\": \"on\"", "{action: on}", "turn it on", "[1, 2]"] {
            let response = interpret(&format!("USE_TOOL: flashlight\nPARAMETERS: {}\nREASON: ok", raw));
            assert_eq!(response.tool_calls.len(), 1, "input {}", raw);
            assert!(response.tool_calls[0].parameters.is_empty(), "input {}", raw);
        }
    }

    #[test]
    fn test_parse_parameters_errors() {
        assert!(matches!(
            parse_parameters("{\"action\": \"on\""),
            Err(ParameterParseError::Malformed(_))
        ));
        assert_eq!(parse_parameters("\"on\""), Err(ParameterParseError::NotAnObject));
        assert_eq!(
            parse_parameters("{\"device\": {\"name\": \"lamp\"}}"),
            Err(ParameterParseError::NestedValue("device".to_string()))
        );
        assert_eq!(parse_parameters("  ").unwrap().len(), 0);
    }

    #[test]
    fn test_tool_without_parameters_is_conversation() {
        let response = interpret("USE_TOOL: flashlight\nREASON: maybe");
        assert!(!response.should_use_tools);
        assert!(response.tool_calls.is_empty());
    }

    #[test]
    fn test_flashlight_fallback() {
        let response = interpret("Okay, I'll turn the flashlight on.");
        assert!(response.should_use_tools);
        assert_eq!(response.tool_calls[0].name, "flashlight");
        assert_eq!(response.tool_calls[0].param("action"), Some("on"));
        assert_eq!(response.text, "Okay, I'll turn the flashlight on.");

        let response = interpret("Switching the Flashlight OFF now");
        assert_eq!(response.tool_calls[0].param("action"), Some("off"));
    }

    #[test]
    fn test_fallback_requires_whole_words() {
        // "only" and "offer" must not count as on/off
        let response = interpret("The flashlight is the only light I can offer.");
        assert!(!response.should_use_tools);

        let response = interpret("You can turn the flashlight on or off from settings.");
        assert!(!response.should_use_tools);
    }

    #[test]
    fn test_conversational_reply_is_unchanged() {
        let response = interpret("  It's sunny and 22 degrees.  ");
        assert_eq!(response, LlmResponse::conversational("It's sunny and 22 degrees."));
    }
}
