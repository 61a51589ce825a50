//! The agent control loop for one repair attempt.
//!
//! States: `Start -> {Generate, Act, Verify} -> ... -> {Accepted, Exhausted}`.
//!
//! - **Start** executes a tool call hinted in the task prompt without a
//!   generation round-trip (once).
//! - **Generate** asks the generator for the next turn, counting one
//!   iteration. When the ceiling is reached the attempt is exhausted.
//! - Routing parses the new turn: tool calls go to **Act**, final answers
//!   to **Verify**, anything else becomes corrective feedback.
//! - **Verify** re-runs a declared final answer against the carried
//!   harness; only a passing run reaches **Accepted**.

use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::IterationCounter;
use crate::core::conversation::ConversationState;
use crate::core::feedback;
use crate::core::generation::{GenerationPhase, GenerationProfiles};
use crate::core::parser::{parse, tool_hint};
use crate::core::types::{ParsedIntent, Role, Tool, ToolCall, Turn};
use crate::io::config::RepairConfig;
use crate::io::generator::Generator;
use crate::io::sandbox::CodeExecutor;
use crate::step::{CarriedHarness, act, best_effort_code, verify};

/// Reason why `run_attempt` stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stop", rename_all = "snake_case")]
pub enum AttemptStop {
    /// A final answer passed re-verification.
    Accepted { code: String },
    /// The iteration ceiling was reached first.
    Exhausted { best_effort_code: Option<String> },
}

impl AttemptStop {
    pub fn code(&self) -> Option<&str> {
        match self {
            AttemptStop::Accepted { code } => Some(code),
            AttemptStop::Exhausted { best_effort_code } => best_effort_code.as_deref(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, AttemptStop::Accepted { .. })
    }

    /// Serialized `stop` tag.
    pub fn label(&self) -> &'static str {
        match self {
            AttemptStop::Accepted { .. } => "accepted",
            AttemptStop::Exhausted { .. } => "exhausted",
        }
    }
}

/// Summary of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub stop: AttemptStop,
    /// `Generate` passes used.
    pub iterations: u32,
    pub max_iterations: u32,
    /// Sandbox runs, including verification runs.
    pub executions: u32,
    /// Unpinned turns dropped to stay within the conversation budget.
    pub dropped_turns: usize,
    pub duration_ms: u64,
    pub turns: Vec<Turn>,
}

/// Per-attempt settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptConfig {
    pub max_iterations: u32,
    pub budget_bytes: usize,
    pub feedback_excerpt_chars: usize,
    pub profiles: GenerationProfiles,
}

impl Default for AttemptConfig {
    fn default() -> Self {
        Self::from_config(&RepairConfig::default())
    }
}

impl AttemptConfig {
    pub fn from_config(config: &RepairConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            budget_bytes: config.conversation.budget_bytes,
            feedback_excerpt_chars: config.conversation.feedback_excerpt_chars,
            profiles: config.generation.profiles(),
        }
    }
}

enum State {
    Start,
    Generate,
    Route(String),
    Act(ToolCall),
    Verify(String),
}

/// Drive one repair attempt from the pinned `prefix` to a terminal state.
///
/// `initial_harness` seeds the carried harness (the task's example test).
/// `on_turn` observes every appended turn. Errors are host or generator
/// failures; failed executions and malformed output are handled in the loop.
#[instrument(skip_all, fields(max_iterations = config.max_iterations))]
pub fn run_attempt<G: Generator, E: CodeExecutor, F: FnMut(&Turn)>(
    prefix: Vec<Turn>,
    initial_harness: Option<String>,
    generator: &G,
    executor: &E,
    config: &AttemptConfig,
    mut on_turn: F,
) -> Result<AttemptOutcome> {
    let started = Instant::now();
    let mut conversation = ConversationState::new(prefix, config.budget_bytes);
    let mut counter = IterationCounter::new(config.max_iterations);
    let mut harness = CarriedHarness::new(initial_harness);
    let mut phase = GenerationPhase::Payload;
    let mut candidate: Option<String> = None;
    let mut executions = 0u32;
    let mut state = State::Start;

    let mut append = |conversation: &mut ConversationState, turn: Turn| {
        on_turn(&turn);
        conversation.push(turn);
    };

    loop {
        state = match state {
            State::Start => match start_hint(&conversation) {
                Some((call, turn)) => {
                    debug!("executing tool call hinted in the prompt");
                    append(&mut conversation, Turn::assistant(turn));
                    State::Act(call)
                }
                None => State::Generate,
            },
            State::Generate => {
                if !counter.try_advance() {
                    let best_effort_code = candidate.as_deref().and_then(best_effort_code);
                    info!(
                        iterations = counter.used(),
                        has_code = best_effort_code.is_some(),
                        "attempt exhausted"
                    );
                    return Ok(finish(
                        AttemptStop::Exhausted { best_effort_code },
                        &counter,
                        executions,
                        conversation,
                        started,
                    ));
                }
                let settings = config.profiles.for_phase(phase);
                debug!(iteration = counter.used(), ?phase, "generating");
                let text = generator
                    .generate(conversation.turns(), settings)
                    .with_context(|| format!("generate iteration {}", counter.used()))?;
                append(&mut conversation, Turn::assistant(text.clone()));
                State::Route(text)
            }
            State::Route(text) => match parse(&text) {
                ParsedIntent::ToolCall(call) => {
                    if Tool::from_name(&call.tool_name).is_some() {
                        State::Act(call)
                    } else {
                        warn!(tool = %call.tool_name, "unknown tool requested");
                        phase = GenerationPhase::Payload;
                        append(
                            &mut conversation,
                            Turn::user(feedback::unknown_tool(&call.tool_name)),
                        );
                        State::Generate
                    }
                }
                ParsedIntent::FinalAnswer { code } => State::Verify(code),
                ParsedIntent::Malformed { reason } => {
                    debug!(%reason, "malformed turn");
                    phase = GenerationPhase::Payload;
                    append(
                        &mut conversation,
                        Turn::user(feedback::invalid_action(&reason)),
                    );
                    State::Generate
                }
            },
            State::Act(call) => {
                let result = act(executor, &call.payload, &mut harness)?;
                executions += 1;
                candidate = Some(call.payload.code);
                phase = if result.ok() {
                    GenerationPhase::Rationale
                } else {
                    GenerationPhase::Payload
                };
                append(
                    &mut conversation,
                    Turn::user(feedback::execution(
                        &result,
                        config.feedback_excerpt_chars,
                    )),
                );
                State::Generate
            }
            State::Verify(code) => {
                let result = verify(executor, &code, &harness)?;
                executions += 1;
                if result.ok() {
                    info!(iterations = counter.used(), "final answer accepted");
                    return Ok(finish(
                        AttemptStop::Accepted { code },
                        &counter,
                        executions,
                        conversation,
                        started,
                    ));
                }
                warn!(exit_code = result.exit_code, "final answer rejected");
                candidate = Some(code);
                phase = GenerationPhase::Payload;
                append(
                    &mut conversation,
                    Turn::user(feedback::final_answer_rejected(
                        &result,
                        config.feedback_excerpt_chars,
                    )),
                );
                State::Generate
            }
        };
    }
}

/// Tool call hinted at the end of the latest user turn, with the assistant
/// turn that declares it.
fn start_hint(conversation: &ConversationState) -> Option<(ToolCall, String)> {
    let last = conversation.last().filter(|turn| turn.role == Role::User)?;
    let (call, hint) = tool_hint(&last.content)?;
    Tool::from_name(&call.tool_name)?;
    let turn = format!("Thought: I will start by running the provided code.\n{hint}");
    Some((call, turn))
}

fn finish(
    stop: AttemptStop,
    counter: &IterationCounter,
    executions: u32,
    conversation: ConversationState,
    started: Instant,
) -> AttemptOutcome {
    AttemptOutcome {
        stop,
        iterations: counter.used(),
        max_iterations: counter.max(),
        executions,
        dropped_turns: conversation.dropped(),
        duration_ms: started.elapsed().as_millis() as u64,
        turns: conversation.into_turns(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ExecutionResult;
    use crate::test_support::{
        ScriptedExecutor, ScriptedGenerator, assertion_failure, final_answer_turn,
        tool_call_turn,
    };

    fn config(max_iterations: u32) -> AttemptConfig {
        AttemptConfig {
            max_iterations,
            ..AttemptConfig::default()
        }
    }

    fn plain_prefix() -> Vec<Turn> {
        vec![Turn::system("system"), Turn::user("Fix add.")]
    }

    fn passes_when_fixed() -> ScriptedExecutor {
        ScriptedExecutor::from_fn(|request| {
            if request.code.contains("a + b") {
                ExecutionResult::completed(0, String::new(), String::new())
            } else {
                assertion_failure()
            }
        })
    }

    #[test]
    fn accepts_verified_final_answer() {
        let generator = ScriptedGenerator::new(vec![
            &tool_call_turn("def add(a, b):\n    return a + b", Some("assert add(2, 3) == 5")),
            &final_answer_turn("def add(a, b):\n    return a + b"),
        ]);
        let executor = passes_when_fixed();
        let outcome = run_attempt(
            plain_prefix(),
            None,
            &generator,
            &executor,
            &config(5),
            |_| {},
        )
        .expect("attempt");

        assert_eq!(
            outcome.stop,
            AttemptStop::Accepted {
                code: "def add(a, b):\n    return a + b".to_string()
            }
        );
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.executions, 2);
        let requests = executor.requests();
        assert_eq!(
            requests[1].harness.as_deref(),
            Some("assert add(2, 3) == 5")
        );
    }

    #[test]
    fn annotated_parameter_named_action_is_accepted() {
        let code = "def step(state, action: int) -> int:\n    return state + action";
        let generator = ScriptedGenerator::repeating(&format!(
            "Final Answer: ```python\n{code}\n```"
        ));
        let executor = ScriptedExecutor::passing();
        let outcome = run_attempt(
            plain_prefix(),
            None,
            &generator,
            &executor,
            &config(3),
            |_: &Turn| {},
        )
        .expect("attempt");

        assert_eq!(
            outcome.stop,
            AttemptStop::Accepted {
                code: code.to_string()
            }
        );
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.executions, 1);
    }

    #[test]
    fn rejected_final_answer_returns_to_generate() {
        let generator = ScriptedGenerator::new(vec![
            &final_answer_turn("def add(a, b):\n    return a - b"),
            &final_answer_turn("def add(a, b):\n    return a + b"),
        ]);
        let executor = passes_when_fixed();
        let outcome = run_attempt(
            plain_prefix(),
            Some("assert add(2, 3) == 5".into()),
            &generator,
            &executor,
            &config(5),
            |_| {},
        )
        .expect("attempt");

        assert!(outcome.stop.is_accepted());
        assert_eq!(outcome.iterations, 2);
        let rejection = &generator.calls()[1].turns;
        let feedback = rejection.last().expect("feedback turn");
        assert_eq!(feedback.role, Role::User);
        assert!(feedback.content.contains("FINAL_ANSWER_REJECTED"));
    }

    #[test]
    fn malformed_output_exhausts_after_exact_ceiling() {
        let generator = ScriptedGenerator::repeating("I think the bug is in the subtraction.");
        let executor = ScriptedExecutor::passing();
        let outcome = run_attempt(
            plain_prefix(),
            None,
            &generator,
            &executor,
            &config(3),
            |_| {},
        )
        .expect("attempt");

        assert_eq!(
            outcome.stop,
            AttemptStop::Exhausted {
                best_effort_code: None
            }
        );
        assert_eq!(generator.call_count(), 3);
        assert_eq!(outcome.iterations, 3);
        assert!(executor.requests().is_empty());
        let invalid = outcome
            .turns
            .iter()
            .filter(|turn| turn.content.contains("INVALID_ACTION"))
            .count();
        assert_eq!(invalid, 3);
    }

    #[test]
    fn start_hint_runs_without_generation() {
        let prefix = vec![
            Turn::system("system"),
            Turn::user(format!(
                "Fix add.\n\n{}",
                tool_call_turn("def add(a, b):\n    return a - b", Some("assert add(2, 3) == 5"))
                    .trim_start_matches("Thought: run it\n")
            )),
        ];
        let generator = ScriptedGenerator::new(vec![&final_answer_turn(
            "def add(a, b):\n    return a + b",
        )]);
        let executor = passes_when_fixed();
        let outcome = run_attempt(prefix, None, &generator, &executor, &config(2), |_| {})
            .expect("attempt");

        assert!(outcome.stop.is_accepted());
        assert_eq!(outcome.iterations, 1);
        let requests = executor.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].code.contains("a - b"));
        let first_call = &generator.calls()[0].turns;
        assert_eq!(first_call[2].role, Role::Assistant);
        assert!(first_call[3].content.contains("\"ok\":false"));
    }

    #[test]
    fn exhaustion_reports_latest_candidate() {
        let generator = ScriptedGenerator::repeating(&tool_call_turn(
            "def add(a, b):\n    return a * b\n\nif __name__ == '__main__':\n    print(add(1, 2))",
            None,
        ));
        let executor = ScriptedExecutor::from_fn(|_| assertion_failure());
        let outcome = run_attempt(
            plain_prefix(),
            Some("assert add(2, 3) == 5".into()),
            &generator,
            &executor,
            &config(2),
            |_| {},
        )
        .expect("attempt");

        assert_eq!(
            outcome.stop,
            AttemptStop::Exhausted {
                best_effort_code: Some("def add(a, b):\n    return a * b".to_string())
            }
        );
        assert_eq!(outcome.executions, 2);
    }

    #[test]
    fn unknown_tool_gets_feedback() {
        let generator = ScriptedGenerator::new(vec![
            "Action: shell\nAction Input: {\"code\": \"ls\"}",
            &final_answer_turn("def add(a, b):\n    return a + b"),
        ]);
        let executor = passes_when_fixed();
        let outcome = run_attempt(
            plain_prefix(),
            None,
            &generator,
            &executor,
            &config(3),
            |_| {},
        )
        .expect("attempt");

        assert!(outcome.stop.is_accepted());
        assert_eq!(executor.requests().len(), 1);
        assert!(
            generator.calls()[1]
                .turns
                .last()
                .is_some_and(|turn| turn.content.contains("UNKNOWN_TOOL"))
        );
    }

    #[test]
    fn passing_run_switches_to_rationale_profile() {
        let generator = ScriptedGenerator::new(vec![
            &tool_call_turn("def add(a, b):\n    return a + b", Some("assert add(2, 3) == 5")),
            &final_answer_turn("def add(a, b):\n    return a + b"),
        ]);
        let executor = passes_when_fixed();
        let attempt_config = config(3);
        run_attempt(
            plain_prefix(),
            None,
            &generator,
            &executor,
            &attempt_config,
            |_| {},
        )
        .expect("attempt");

        let calls = generator.calls();
        assert_eq!(calls[0].config, attempt_config.profiles.payload);
        assert_eq!(calls[1].config, attempt_config.profiles.rationale);
    }

    #[test]
    fn generator_failure_is_an_error() {
        let generator = ScriptedGenerator::new(Vec::new());
        let executor = ScriptedExecutor::passing();
        let err = run_attempt(
            plain_prefix(),
            None,
            &generator,
            &executor,
            &config(3),
            |_| {},
        )
        .expect_err("generator failure");
        assert!(format!("{err:#}").contains("generate iteration 1"));
    }

    #[test]
    fn on_turn_sees_every_appended_turn() {
        let generator = ScriptedGenerator::repeating("nothing useful");
        let executor = ScriptedExecutor::passing();
        let mut seen = 0usize;
        let outcome = run_attempt(
            plain_prefix(),
            None,
            &generator,
            &executor,
            &config(2),
            |_| seen += 1,
        )
        .expect("attempt");
        assert_eq!(seen, 4);
        assert_eq!(outcome.turns.len(), 6);
    }
}
