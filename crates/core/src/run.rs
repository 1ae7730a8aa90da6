//! Import run lifecycle.
//!
//! A run moves `Running -> Completed` or `Running -> Failed`, and back from
//! `Failed -> Running` only through an explicit retry. The transition methods
//! here return `false` instead of applying a change that would break those
//! rules, so store implementations can apply them blindly under a lock.
//!
//! Every execution of a run is numbered. A retry starts a new attempt, and
//! stores reject progress writes that carry an older attempt number, so a
//! body that outlived its lease can never touch the run again.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Run identifier.
pub type RunId = Uuid;

/// Status of an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::validation(format!("unknown run status '{}'", other))),
        }
    }
}

/// One execution attempt of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub run_id: RunId,
    /// 1 for the first execution, bumped by every retry
    pub number: u32,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.run_id, self.number)
    }
}

/// One end-to-end execution of the pipeline against one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRun {
    pub id: RunId,
    pub owner_id: String,
    pub file_name: String,
    /// URL or filesystem path the source bytes are fetched from
    pub source_url: String,
    pub status: RunStatus,
    /// Unknown until the source has been parsed
    pub total_rows: Option<u64>,
    pub processed_rows: u64,
    /// Set only while Failed
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Set on Completed or Failed
    pub completed_at: Option<DateTime<Utc>>,
    /// Current execution attempt
    pub attempt: u32,
    /// Last liveness signal from the process executing the run
    pub heartbeat_at: DateTime<Utc>,
}

impl IngestionRun {
    /// Creates a fresh run in the Running state.
    pub fn new(
        owner_id: impl Into<String>,
        file_name: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            file_name: file_name.into(),
            source_url: source_url.into(),
            status: RunStatus::Running,
            total_rows: None,
            processed_rows: 0,
            error_message: None,
            started_at: now,
            completed_at: None,
            attempt: 1,
            heartbeat_at: now,
        }
    }

    pub fn current_attempt(&self) -> Attempt {
        Attempt {
            run_id: self.id,
            number: self.attempt,
        }
    }

    /// Whether `attempt` is the live execution of this run.
    pub fn is_executing(&self, attempt: Attempt) -> bool {
        self.status == RunStatus::Running && self.current_attempt() == attempt
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }

    /// Records the total row count. Ignored once the run is terminal.
    pub fn set_total(&mut self, total: u64) -> bool {
        if self.status != RunStatus::Running {
            return false;
        }
        self.total_rows = Some(total);
        self.processed_rows = self.processed_rows.min(total);
        true
    }

    /// Advances the processed counter, clamped to the total once known.
    pub fn advance(&mut self, delta: u64) -> bool {
        if self.status != RunStatus::Running {
            return false;
        }
        let next = self.processed_rows.saturating_add(delta);
        self.processed_rows = match self.total_rows {
            Some(total) => next.min(total),
            None => next,
        };
        true
    }

    /// Running -> Completed; processed is forced to the total.
    pub fn mark_completed(&mut self) -> bool {
        if self.status != RunStatus::Running {
            return false;
        }
        let total = self.total_rows.unwrap_or(self.processed_rows);
        self.total_rows = Some(total);
        self.processed_rows = total;
        self.status = RunStatus::Completed;
        self.error_message = None;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Running -> Failed; processed keeps its last checkpoint.
    pub fn mark_failed(&mut self, message: &str) -> bool {
        if self.status != RunStatus::Running {
            return false;
        }
        self.status = RunStatus::Failed;
        self.error_message = Some(failure_message(message));
        self.completed_at = Some(Utc::now());
        true
    }

    /// Refreshes the liveness timestamp of a Running run.
    pub fn touch(&mut self) -> bool {
        if self.status != RunStatus::Running {
            return false;
        }
        self.heartbeat_at = Utc::now();
        true
    }

    /// Failed -> Running as a new attempt, counters and failure details cleared.
    pub fn rewind_for_retry(&mut self) -> bool {
        if self.status != RunStatus::Failed {
            return false;
        }
        let now = Utc::now();
        self.status = RunStatus::Running;
        self.total_rows = None;
        self.processed_rows = 0;
        self.error_message = None;
        self.completed_at = None;
        self.started_at = now;
        self.attempt = self.attempt.saturating_add(1);
        self.heartbeat_at = now;
        true
    }
}

/// Failed runs always expose a non-empty message.
pub fn failure_message(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        "import failed".to_string()
    } else {
        trimmed.to_string()
    }
}
