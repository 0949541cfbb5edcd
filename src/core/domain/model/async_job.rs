//! Asynchronous control-plane jobs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle of a job submitted to the control plane. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a job as reported by `queryAsyncJobResult`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Succeeded,
    /// The job ended in error; carries the control plane's reason when it gave one.
    Failed(Option<String>),
}

impl JobStatus {
    /// Maps the numeric `jobstatus` field (0 pending, 1 success, 2 failure).
    #[must_use]
    pub fn from_code(code: u8, reason: Option<String>) -> Self {
        match code {
            0 => JobStatus::Pending,
            1 => JobStatus::Succeeded,
            _ => JobStatus::Failed(reason),
        }
    }
}

/// What a mutating control-plane call handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command completed synchronously.
    Completed,
    /// The command was queued as a job that must be polled.
    Submitted(JobId),
}

impl CommandOutcome {
    #[must_use]
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            CommandOutcome::Completed => None,
            CommandOutcome::Submitted(id) => Some(id),
        }
    }
}
