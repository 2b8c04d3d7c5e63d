//! Adaptive status polling.
//!
//! [`PollLoop`] fetches the job record on a self-rescheduling timer. The
//! delay before each next fetch comes from an [`IntervalPolicy`] evaluated
//! against the phase the owning session currently holds, so polling slows
//! down on its own while the job is idle and speeds up while it works.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::job::{JobId, JobPhase, JobSnapshot};
use crate::models::update::{decode_snapshot, MalformedUpdate};
use crate::services::api::{FetchError, JobStatusApi};

/// Interval rules for the poll timer.
#[derive(Debug, Clone)]
pub struct IntervalPolicy {
    /// First interval while the job is processing, generating or auditing.
    pub active_base: Duration,
    /// Added per attempt while the job is working.
    pub active_growth: Duration,
    /// Ceiling for the grown active interval.
    pub active_max: Duration,
    /// Fixed interval for every other phase.
    pub idle: Duration,
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self {
            active_base: Duration::from_secs(3),
            active_growth: Duration::from_millis(500),
            active_max: Duration::from_secs(10),
            idle: Duration::from_secs(10),
        }
    }
}

impl IntervalPolicy {
    /// Delay after fetch number `attempt` (0-based) given the current phase.
    pub fn interval(&self, phase: Option<JobPhase>, attempt: u32) -> Duration {
        match phase {
            Some(p) if p.is_working() => {
                let grown = self
                    .active_growth
                    .checked_mul(attempt)
                    .and_then(|g| self.active_base.checked_add(g))
                    .unwrap_or(self.active_max);
                grown.min(self.active_max)
            }
            _ => self.idle,
        }
    }
}

/// What a fetch reports to the owning session.
#[derive(Debug)]
pub enum PollEvent {
    Fetched(JobSnapshot),
    /// Transient; the loop keeps its schedule.
    FetchFailed(FetchError),
    Malformed(MalformedUpdate),
}

/// Self-rescheduling status fetcher owned by one session.
pub struct PollLoop {
    job_id: JobId,
    api: Arc<dyn JobStatusApi>,
    policy: IntervalPolicy,
    phase: watch::Receiver<Option<JobPhase>>,
    events: mpsc::UnboundedSender<PollEvent>,
    parent: CancellationToken,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl PollLoop {
    pub fn new(
        job_id: JobId,
        api: Arc<dyn JobStatusApi>,
        policy: IntervalPolicy,
        phase: watch::Receiver<Option<JobPhase>>,
        events: mpsc::UnboundedSender<PollEvent>,
        parent: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            api,
            policy,
            phase,
            events,
            parent,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Fetch once without touching the timer.
    pub fn fetch_now(&self) {
        let job_id = self.job_id.clone();
        let api = self.api.clone();
        let events = self.events.clone();
        let cancel = self.parent.child_token();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = fetch(&job_id, api.as_ref(), &events) => {}
            }
        });
    }

    /// Fetch immediately, then keep fetching on the policy's schedule.
    /// Does nothing if the loop is already running.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }

        let cancel = self.parent.child_token();
        let job_id = self.job_id.clone();
        let api = self.api.clone();
        let policy = self.policy.clone();
        let phase = self.phase.clone();
        let events = self.events.clone();
        let task_cancel = cancel.clone();

        tracing::info!(job_id = %job_id, "Polling started");

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {}
                _ = run(&job_id, api.as_ref(), &policy, &phase, &events) => {}
            }
        });

        self.running = Some((cancel, task));
    }

    /// Cancel the pending timer. Safe to call repeatedly.
    ///
    /// A fetch already on the wire is abandoned; its result is never reported.
    pub fn stop(&mut self) {
        if let Some((cancel, task)) = self.running.take() {
            cancel.cancel();
            task.abort();
            tracing::info!(job_id = %self.job_id, "Polling stopped");
        }
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    job_id: &JobId,
    api: &dyn JobStatusApi,
    policy: &IntervalPolicy,
    phase: &watch::Receiver<Option<JobPhase>>,
    events: &mpsc::UnboundedSender<PollEvent>,
) {
    let mut attempt = 0u32;
    loop {
        if !fetch(job_id, api, events).await {
            return;
        }

        let current = *phase.borrow();
        let delay = policy.interval(current, attempt);
        tracing::trace!(
            job_id = %job_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Next poll scheduled"
        );
        attempt = attempt.saturating_add(1);
        tokio::time::sleep(delay).await;
    }
}

/// One fetch-and-decode. Returns `false` once the owner stopped listening.
async fn fetch(
    job_id: &JobId,
    api: &dyn JobStatusApi,
    events: &mpsc::UnboundedSender<PollEvent>,
) -> bool {
    metrics::counter!("job_sync_fetches_total").increment(1);

    let event = match api.fetch_job_status(job_id).await {
        Ok(raw) => match decode_snapshot(job_id, raw) {
            Ok(snapshot) => PollEvent::Fetched(snapshot),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Dropping malformed status response");
                PollEvent::Malformed(e)
            }
        },
        Err(e) => {
            metrics::counter!("job_sync_fetch_failures_total").increment(1);
            tracing::warn!(job_id = %job_id, error = %e, "Status fetch failed, will retry on schedule");
            PollEvent::FetchFailed(e)
        }
    };

    events.send(event).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_working_phases_grow_to_ceiling() {
        let policy = IntervalPolicy::default();
        let phase = Some(JobPhase::Generating);
        assert_eq!(policy.interval(phase, 0), Duration::from_secs(3));
        assert_eq!(policy.interval(phase, 1), Duration::from_millis(3500));
        assert_eq!(policy.interval(phase, 4), Duration::from_secs(5));
        assert_eq!(policy.interval(phase, 100), Duration::from_secs(10));
        assert_eq!(policy.interval(phase, u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_other_phases_use_fixed_idle_interval() {
        let policy = IntervalPolicy::default();
        for phase in [None, Some(JobPhase::Pending), Some(JobPhase::Correcting)] {
            assert_eq!(policy.interval(phase, 0), Duration::from_secs(10));
            assert_eq!(policy.interval(phase, 9), Duration::from_secs(10));
        }
    }
}
