//! Output parser: classifies one assistant turn into a [`ParsedIntent`].
//!
//! Two markers are recognized:
//!
//! ```text
//! Action: code_interpreter
//! Action Input: {"code": "...", "harness": "...", "timeout": 5}
//! ```
//!
//! and
//!
//! ````text
//! Final Answer: ```python
//! <code>
//! ```
//! ````
//!
//! [`parse`] is total. Anything that is not exactly one well-formed intent
//! becomes [`ParsedIntent::Malformed`] with a reason that can be fed back to
//! the generator verbatim.

use std::ops::Range;
use std::sync::LazyLock;

use jsonschema::{Validator, validator_for};
use regex::{Captures, Regex};
use serde_json::Value;

use crate::core::types::{ParsedIntent, ToolCall, ToolPayload};

const TOOL_CALL_SCHEMA: &str = include_str!("../../schemas/tool_call.schema.json");

static ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*Action[ \t]*:[ \t]*([A-Za-z0-9_.\-]*)").expect("action pattern")
});
static ACTION_INPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*Action[ \t]+Input[ \t]*:").expect("input pattern")
});
static FINAL_ANSWER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*Final[ \t]+Answer[ \t]*:").expect("final pattern")
});
static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*(?:python3?|py)?[ \t]*\r?\n(.*?)```").expect("fence pattern")
});
static OPEN_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[ \t]*(?:python3?|py)?[ \t]*\r?\n").expect("open fence"));
static PAYLOAD_SCHEMA: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(TOOL_CALL_SCHEMA).expect("tool call schema should be valid json");
    validator_for(&schema).expect("tool call schema should compile")
});

/// Classify the latest assistant turn.
///
/// Markers count only at the start of a line and outside ``` fences; a
/// `Final Answer:` inside the Action Input JSON is part of the payload.
pub fn parse(text: &str) -> ParsedIntent {
    let mut hidden = fenced_spans(text);
    let action = visible(&ACTION, text, &hidden).into_iter().next();
    let input = visible(&ACTION_INPUT, text, &hidden)
        .into_iter()
        .next()
        .and_then(|caps| caps.get(0));
    if let Some(input) = input
        && let Some(span) = payload_span(text, input.end())
    {
        hidden.push(span);
    }
    let final_answer = visible(&FINAL_ANSWER, text, &hidden)
        .into_iter()
        .next()
        .and_then(|caps| caps.get(0));
    let declares_tool = action.is_some() || input.is_some();

    match (declares_tool, final_answer) {
        (true, Some(_)) => malformed(
            "the response contains both an Action and a Final Answer; send exactly one of them per turn",
        ),
        (false, None) => malformed(
            "no `Action:`/`Action Input:` pair and no `Final Answer:` marker was found",
        ),
        (false, Some(marker)) => parse_final_answer(&text[marker.end()..]),
        (true, None) => {
            let tool_name = action
                .and_then(|caps| caps.get(1))
                .map(|name| name.as_str().trim().to_string())
                .unwrap_or_default();
            if tool_name.is_empty() {
                return malformed(
                    "`Action Input:` must follow an `Action: <tool name>` line naming the tool",
                );
            }
            let Some(input) = input else {
                return malformed(&format!(
                    "`Action: {tool_name}` is not followed by `Action Input:` with a JSON object"
                ));
            };
            match decode_payload(&text[input.end()..], text) {
                Ok(payload) => ParsedIntent::ToolCall(ToolCall { tool_name, payload }),
                Err(reason) => ParsedIntent::Malformed { reason },
            }
        }
    }
}

/// Find a tool call embedded in a prompt, starting at the last `Action:` line
/// outside code blocks.
///
/// Returns the call and the text it was parsed from.
pub fn tool_hint(text: &str) -> Option<(ToolCall, &str)> {
    let hidden = fenced_spans(text);
    let start = visible(&ACTION, text, &hidden)
        .last()
        .and_then(|caps| caps.get(0))?
        .start();
    let hint = text[start..].trim();
    match parse(hint) {
        ParsedIntent::ToolCall(call) => Some((call, hint)),
        _ => None,
    }
}

/// Byte ranges covered by ``` fences. An unclosed fence runs to the end.
fn fenced_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut open = None;
    for (idx, fence) in text.match_indices("```") {
        match open.take() {
            Some(start) => spans.push(start..idx + fence.len()),
            None => open = Some(idx),
        }
    }
    if let Some(start) = open {
        spans.push(start..text.len());
    }
    spans
}

fn visible<'t>(pattern: &Regex, text: &'t str, hidden: &[Range<usize>]) -> Vec<Captures<'t>> {
    pattern
        .captures_iter(text)
        .filter(|caps| {
            caps.get(0)
                .is_some_and(|m| !hidden.iter().any(|span| span.contains(&m.end().saturating_sub(1))))
        })
        .collect()
}

/// Extent of the JSON object that starts after `Action Input:`, if it parses.
fn payload_span(text: &str, input_end: usize) -> Option<Range<usize>> {
    let rest = &text[input_end..];
    let start = input_end + (rest.len() - rest.trim_start().len());
    if !text[start..].starts_with('{') {
        return None;
    }
    let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
    match stream.next() {
        Some(Ok(_)) => Some(start..start + stream.byte_offset()),
        _ => None,
    }
}

fn malformed(reason: &str) -> ParsedIntent {
    ParsedIntent::Malformed {
        reason: reason.to_string(),
    }
}

fn parse_final_answer(rest: &str) -> ParsedIntent {
    if let Some(caps) = CODE_FENCE.captures(rest) {
        let code = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if code.is_empty() {
            return malformed("the Final Answer code block is empty");
        }
        return ParsedIntent::FinalAnswer {
            code: code.to_string(),
        };
    }
    if OPEN_FENCE.is_match(rest) {
        return malformed("the Final Answer code block is not closed with ```");
    }
    malformed("`Final Answer:` must be followed by a fenced ```python code block")
}

/// Decode the JSON object after `Action Input:`; `turn` is searched for a
/// fallback code block when the object has no usable `code`.
fn decode_payload(raw: &str, turn: &str) -> Result<ToolPayload, String> {
    let body = strip_json_fence(raw.trim_start());
    if !body.starts_with('{') {
        return Err("`Action Input:` must be followed by a JSON object starting with `{`".into());
    }

    let mut value = match first_json_value(body) {
        Ok(value) => value,
        Err(strict_err) => first_json_value(&body.replace('\'', "\""))
            .map_err(|_| format!("Action Input is not valid JSON ({strict_err})"))?,
    };

    if let Value::Object(map) = &mut value {
        let has_code = map
            .get("code")
            .and_then(Value::as_str)
            .is_some_and(|code| !code.trim().is_empty());
        if !has_code
            && let Some(caps) = CODE_FENCE.captures(turn)
            && let Some(code) = caps.get(1)
        {
            map.insert("code".to_string(), Value::String(code.as_str().to_string()));
        }
    }

    let errors: Vec<String> = PAYLOAD_SCHEMA
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(format!(
            "Action Input does not match the code_interpreter schema: {}",
            errors.join("; ")
        ));
    }

    serde_json::from_value(value).map_err(|err| format!("Action Input could not be decoded ({err})"))
}

fn first_json_value(text: &str) -> Result<Value, serde_json::Error> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(result) => result,
        None => serde_json::from_str(text),
    }
}

fn strip_json_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start();
    match rest.rfind("```") {
        Some(end) => rest[..end].trim_end(),
        None => rest,
    }
}
