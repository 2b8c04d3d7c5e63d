use std::time::Duration;

use tokio::time::Instant;

use crate::models::job::{JobId, JobPhase};

/// Watchdog declaring a job stuck after an absolute ceiling.
///
/// The ceiling runs from session start and is never extended by phase
/// changes; a new guard is built for every newly tracked job.
pub struct JobTimeoutGuard {
    job_id: JobId,
    ceiling: Duration,
    deadline: Instant,
    state: GuardState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardState {
    Armed,
    Fired,
    Cancelled,
}

impl JobTimeoutGuard {
    pub fn new(job_id: JobId, ceiling: Duration, started_at: Instant) -> Self {
        Self {
            job_id,
            ceiling,
            deadline: started_at + ceiling,
            state: GuardState::Armed,
        }
    }

    /// Deadline to sleep until, while the guard can still fire.
    pub fn deadline(&self) -> Option<Instant> {
        (self.state == GuardState::Armed).then_some(self.deadline)
    }

    pub fn cancel(&mut self) {
        if self.state == GuardState::Armed {
            self.state = GuardState::Cancelled;
        }
    }

    /// Check the guard at `now` against the phase currently stored.
    ///
    /// `None` for `phase` means no snapshot ever arrived, which counts as
    /// stuck. Returns the error at most once.
    pub fn check(&mut self, now: Instant, phase: Option<JobPhase>) -> Option<JobTimeoutError> {
        if self.state != GuardState::Armed || now < self.deadline {
            return None;
        }
        if phase.is_some_and(JobPhase::is_terminal) {
            self.state = GuardState::Cancelled;
            return None;
        }

        self.state = GuardState::Fired;
        Some(JobTimeoutError {
            job_id: self.job_id.clone(),
            phase,
            ceiling: self.ceiling,
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error(
    "Job {job_id} did not finish within {} seconds (last phase: {}); monitoring stopped, resubmit to try again",
    .ceiling.as_secs(),
    .phase.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
)]
pub struct JobTimeoutError {
    pub job_id: JobId,
    pub phase: Option<JobPhase>,
    pub ceiling: Duration,
}
