use serde::Serialize;
use uuid::Uuid;

use crate::models::job::{ConnectionHealth, JobId, JobSnapshot};
use crate::services::timeout::JobTimeoutError;

/// Lifecycle of a sync session.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Active,
    TornDown,
}

/// Which source delivered the currently stored snapshot.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    Push,
    Poll,
}

/// What callers see of a session, re-published on every change.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionView {
    pub session_id: Uuid,
    pub job_id: JobId,
    pub state: SessionState,
    pub snapshot: Option<JobSnapshot>,
    pub connection_health: ConnectionHealth,
    pub is_polling: bool,
    pub timed_out: bool,
    pub last_source: Option<UpdateSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionView {
    pub fn new(session_id: Uuid, job_id: JobId) -> Self {
        Self {
            session_id,
            job_id,
            state: SessionState::Idle,
            snapshot: None,
            connection_health: ConnectionHealth::Connecting,
            is_polling: false,
            timed_out: false,
            last_source: None,
            error: None,
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The job reached a terminal phase.
    Terminal(JobSnapshot),
    /// Monitoring gave up; the caller must resubmit.
    TimedOut(JobTimeoutError),
    /// The caller stopped tracking, or switched to another job.
    Cancelled,
}
