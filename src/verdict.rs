//! Test verdict classification.
//!
//! The runner's exit code is authoritative. The textual summary pytest prints
//! is a secondary signal: it refines the detail message and can downgrade an
//! exit-0 run to a failure, but only when it carries an explicit positive
//! failure count.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

/// Matches one `N label` count in a pytest summary line.
static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+) (passed|failed|errors?|skipped|xfailed|xpassed|warnings?|deselected|rerun)\b")
        .unwrap()
});

/// Outcome of a test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub success: bool,
    pub exit_code: i32,
    pub details: String,
    pub stdout: String,
    pub stderr: String,
}

/// pytest's exit-code convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerOutcome {
    AllPassed,
    SomeFailed,
    Interrupted,
    InternalError,
    UsageError,
    NoTestsCollected,
    Unknown(i32),
}

impl RunnerOutcome {
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Self::AllPassed,
            1 => Self::SomeFailed,
            2 => Self::Interrupted,
            3 => Self::InternalError,
            4 => Self::UsageError,
            5 => Self::NoTestsCollected,
            other => Self::Unknown(other),
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::AllPassed
    }

    pub fn description(self) -> String {
        match self {
            Self::AllPassed => "All tests passed".to_string(),
            Self::SomeFailed => "Some tests failed".to_string(),
            Self::Interrupted => "Test execution was interrupted".to_string(),
            Self::InternalError => "Internal test runner error".to_string(),
            Self::UsageError => "Test runner usage error".to_string(),
            Self::NoTestsCollected => "No tests were collected".to_string(),
            Self::Unknown(code) => format!("Unknown exit code: {}", code),
        }
    }
}

/// Counts parsed from the last summary line of a test run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSummary {
    counts: Vec<(u64, String)>,
}

impl TestSummary {
    /// Find the last line of `output` that carries `N label` counts.
    pub fn parse(output: &str) -> Option<Self> {
        output.lines().rev().find_map(|line| {
            let counts: Vec<(u64, String)> = COUNT_RE
                .captures_iter(line)
                .filter_map(|caps| Some((caps[1].parse().ok()?, caps[2].to_string())))
                .collect();
            (!counts.is_empty()).then_some(Self { counts })
        })
    }

    pub fn count(&self, label: &str) -> u64 {
        self.counts
            .iter()
            .filter(|(_, l)| l == label || l.strip_suffix('s') == Some(label))
            .map(|(n, _)| n)
            .sum()
    }

    pub fn failed(&self) -> u64 {
        self.count("failed")
    }

    pub fn errors(&self) -> u64 {
        self.count("error")
    }

    /// The failure part of the summary, e.g. `3 failed, 1 error`.
    pub fn failure_text(&self) -> String {
        self.render(|label| matches!(label, "failed" | "error" | "errors"))
    }

    fn render(&self, keep: impl Fn(&str) -> bool) -> String {
        self.counts
            .iter()
            .filter(|(_, label)| keep(label))
            .map(|(n, label)| format!("{} {}", n, label))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for TestSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render(|_| true))
    }
}

/// Classify a finished test run.
pub fn classify(exit_code: i32, stdout: &str, stderr: &str) -> Verdict {
    let outcome = RunnerOutcome::from_exit_code(exit_code);
    let plain = strip_ansi_escapes::strip_str(stdout);
    let summary = TestSummary::parse(&plain);

    let mut success = outcome.is_success();
    let mut details = match (&summary, outcome) {
        (Some(summary), RunnerOutcome::AllPassed | RunnerOutcome::SomeFailed) => {
            summary.to_string()
        }
        _ => outcome.description(),
    };

    if success {
        match &summary {
            Some(summary) if summary.failed() > 0 || summary.errors() > 0 => {
                details = summary.failure_text();
                success = false;
                warn!(
                    exit_code,
                    summary = %summary,
                    "verdict:override exit code reported success but summary reports failures"
                );
            }
            _ if plain.to_lowercase().contains("failed") => {
                debug!("verdict:unquantified failure mention ignored");
            }
            _ => {}
        }
    }

    debug!(exit_code, success, details = %details, "verdict:classified");
    Verdict {
        success,
        exit_code,
        details,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}
