use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::resolve::Target;

/// Exit code reported for a copy that hit the per-item timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit code reported when the copy tool could not be started.
pub const SPAWN_EXIT_CODE: i32 = 127;
/// Exit code reported when the copy tool was killed by a signal.
pub const SIGNAL_EXIT_CODE: i32 = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    Timeout {
        #[serde(with = "duration_text")]
        after: Duration,
    },
    Exit {
        code: i32,
    },
    Signal,
    Spawn {
        message: String,
    },
}

impl Failure {
    pub fn exit_code(&self) -> i32 {
        match self {
            Failure::Timeout { .. } => TIMEOUT_EXIT_CODE,
            Failure::Exit { code } => *code,
            Failure::Signal => SIGNAL_EXIT_CODE,
            Failure::Spawn { .. } => SPAWN_EXIT_CODE,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Timeout { after } => {
                write!(f, "timed out after {}", humantime::format_duration(*after))
            }
            Failure::Exit { code } => write!(f, "exit status {}", code),
            Failure::Signal => write!(f, "terminated by signal"),
            Failure::Spawn { message } => write!(f, "could not start: {}", message),
        }
    }
}

mod duration_text {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Copied,
    SkippedUnexpanded,
    SkippedUpToDate,
    SkippedFiltered,
    Failed(Failure),
}

impl Outcome {
    pub fn kind(&self) -> &str {
        match self {
            Outcome::Copied => "copied",
            Outcome::SkippedUnexpanded => "skipped (unexpanded)",
            Outcome::SkippedUpToDate => "skipped (digest identical)",
            Outcome::SkippedFiltered => "skipped (filtered)",
            Outcome::Failed(_) => "failed",
        }
    }
}

/// One reference and what happened to it. Built once its outcome is known.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorItem {
    pub source: String,
    pub destination: Option<String>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub items: Vec<MirrorItem>,
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Exit code of the item that stopped the run when continue-on-error is off.
    pub aborted_with: Option<i32>,
}

impl RunSummary {
    pub fn push(&mut self, item: MirrorItem) {
        match item.outcome {
            Outcome::Copied => self.copied += 1,
            Outcome::Failed(_) => self.failed += 1,
            _ => self.skipped += 1,
        }
        self.items.push(item);
    }

    pub fn exit_code(&self) -> i32 {
        match self.aborted_with {
            Some(code) => code,
            None if self.failed > 0 => 1,
            None => 0,
        }
    }
}

/// JSON document written with `--report`.
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub target: &'a Target,
    pub conflicted_keys: Vec<&'a str>,
    pub summary: &'a RunSummary,
}
