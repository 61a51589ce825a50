//! Feedback turns appended to the conversation after each act or defect.
//!
//! Every observation is a single line `Observation: {json}` so the
//! generator sees a stable, machine-like shape regardless of the failure.

use serde_json::{Value, json};

use crate::core::types::{ExecutionResult, Tool};

pub const OBSERVATION_PREFIX: &str = "Observation: ";

/// Machine-readable defect codes carried in the `error` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackError {
    InvalidAction,
    UnknownTool,
    FinalAnswerRejected,
}

impl FeedbackError {
    pub fn code(self) -> &'static str {
        match self {
            FeedbackError::InvalidAction => "INVALID_ACTION",
            FeedbackError::UnknownTool => "UNKNOWN_TOOL",
            FeedbackError::FinalAnswerRejected => "FINAL_ANSWER_REJECTED",
        }
    }
}

const FORMAT_HINT: &str = "Reply with either `Action: code_interpreter` followed by `Action Input: {\"code\": \"...\", \"harness\": \"...\"}`, or `Final Answer:` followed by a ```python code block.";

const REJECTED_HINT: &str = "The final answer was re-run against the current test harness and failed. Fix the code, check it with code_interpreter, then send the Final Answer again.";

/// Feedback for a completed tool execution.
pub fn execution(result: &ExecutionResult, excerpt_chars: usize) -> String {
    render(result_fields(result, excerpt_chars))
}

/// Feedback for output that parsed as [`crate::core::types::ParsedIntent::Malformed`].
pub fn invalid_action(reason: &str) -> String {
    render(json!({
        "ok": false,
        "error": FeedbackError::InvalidAction.code(),
        "message": reason,
        "hint": FORMAT_HINT,
    }))
}

/// Feedback for a tool call naming a tool that does not exist.
pub fn unknown_tool(name: &str) -> String {
    let known: Vec<&str> = Tool::ALL.iter().map(|tool| tool.name()).collect();
    render(json!({
        "ok": false,
        "error": FeedbackError::UnknownTool.code(),
        "message": format!("unknown tool `{name}`; available tools: {}", known.join(", ")),
        "hint": FORMAT_HINT,
    }))
}

/// Feedback for a final answer that failed re-verification.
pub fn final_answer_rejected(result: &ExecutionResult, excerpt_chars: usize) -> String {
    let mut fields = result_fields(result, excerpt_chars);
    if let Value::Object(map) = &mut fields {
        map.insert(
            "error".to_string(),
            Value::from(FeedbackError::FinalAnswerRejected.code()),
        );
        map.insert("hint".to_string(), Value::from(REJECTED_HINT));
    }
    render(fields)
}

fn result_fields(result: &ExecutionResult, excerpt_chars: usize) -> Value {
    json!({
        "ok": result.ok(),
        "exit_code": result.exit_code,
        "timed_out": result.timed_out,
        "stdout": excerpt(&result.stdout, excerpt_chars),
        "stderr": excerpt(&result.stderr, excerpt_chars),
    })
}

fn render(value: Value) -> String {
    format!("{OBSERVATION_PREFIX}{value}")
}

/// Keep the head and tail of `text` within `max_chars` characters.
///
/// Tracebacks put the useful line at the end, so the tail gets the larger share.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head_chars = max_chars / 3;
    let tail_chars = max_chars - head_chars;
    let head: String = text.chars().take(head_chars).collect();
    let tail: String = text.chars().skip(total - tail_chars).collect();
    let omitted = total - head_chars - tail_chars;
    format!("{head}\n... [{omitted} chars omitted] ...\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(turn: &str) -> Value {
        let body = turn
            .strip_prefix(OBSERVATION_PREFIX)
            .expect("observation prefix");
        serde_json::from_str(body).expect("observation json")
    }

    #[test]
    fn execution_reports_result_fields() {
        let result = ExecutionResult::completed(1, "out".into(), "AssertionError".into());
        let value = decode(&execution(&result, 100));
        assert_eq!(value["ok"], false);
        assert_eq!(value["exit_code"], 1);
        assert_eq!(value["timed_out"], false);
        assert_eq!(value["stderr"], "AssertionError");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn defects_carry_error_code_and_hint() {
        let value = decode(&invalid_action("no marker"));
        assert_eq!(value["error"], "INVALID_ACTION");
        assert_eq!(value["message"], "no marker");
        assert!(value["hint"].as_str().is_some_and(|h| h.contains("Final Answer")));

        let value = decode(&unknown_tool("shell"));
        assert_eq!(value["error"], "UNKNOWN_TOOL");
        assert!(
            value["message"]
                .as_str()
                .is_some_and(|m| m.contains("code_interpreter"))
        );
    }

    #[test]
    fn rejected_final_answer_includes_failure() {
        let result = ExecutionResult::timed_out(String::new(), String::new());
        let value = decode(&final_answer_rejected(&result, 100));
        assert_eq!(value["error"], "FINAL_ANSWER_REJECTED");
        assert_eq!(value["timed_out"], true);
        assert_eq!(value["exit_code"], -1);
    }

    #[test]
    fn excerpt_keeps_head_and_tail() {
        let text = format!("{}{}", "a".repeat(50), "z".repeat(50));
        let cut = excerpt(&text, 30);
        assert!(cut.starts_with(&"a".repeat(10)));
        assert!(cut.ends_with(&"z".repeat(20)));
        assert!(cut.contains("[70 chars omitted]"));
        assert_eq!(excerpt("short", 30), "short");
    }
}
