use serde::{Deserialize, Serialize};

use crate::judge::Judgment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Final code passed the hidden test.
    Pass,
    /// Final code failed the hidden test.
    Fail,
    /// The attempt ended without any code to score.
    NoCandidate,
    /// Host failure: generator, sandbox or I/O.
    Error,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
            Outcome::NoCandidate => "no_candidate",
            Outcome::Error => "error",
        }
    }
}

/// Classify a finished attempt. `judgment` is `None` when nothing was scored.
pub fn classify_outcome(candidate: Option<&str>, judgment: Option<&Judgment>) -> Outcome {
    match (candidate, judgment) {
        (None, _) => Outcome::NoCandidate,
        (Some(_), Some(judgment)) if judgment.passed => Outcome::Pass,
        (Some(_), Some(_)) => Outcome::Fail,
        (Some(_), None) => Outcome::Error,
    }
}
