//! Live push subscription for one job, with reconnect-with-backoff.
//!
//! The subscription task opens the channel, normalizes every record into a
//! [`JobSnapshot`] and reports health transitions to its owner. When the
//! channel fails it retries with exponential backoff until `max_attempts` is
//! exhausted, then stays `Disconnected` and leaves the job to polling.
//!
//! The subscription never stops on the content of an update. Only its owner
//! knows whether a terminal snapshot was accepted, so only [`PushSubscription::close`]
//! ends it.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::job::{ConnectionHealth, JobId, JobSnapshot};
use crate::models::update::{decode_snapshot, MalformedUpdate};
use crate::services::channel::{ChannelError, ChannelSignal, JobChannel};

/// Tunable parameters for the reconnect backoff.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Attempts made before the subscription stops retrying.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// Delay before reconnect attempt `attempt` (1-based), doubling from the base.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// What the subscription reports to its owner.
#[derive(Debug)]
pub enum PushEvent {
    Health(ConnectionHealth),
    Snapshot(JobSnapshot),
    Malformed(MalformedUpdate),
    ChannelFailed(ChannelError),
    /// Reconnect attempts are exhausted; no further events follow.
    GaveUp { attempts: u32 },
}

/// Handle to a running push subscription.
pub struct PushSubscription {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PushSubscription {
    /// Start subscribing to `job_id`. Health starts at `Connecting`.
    pub fn open(
        job_id: JobId,
        channel: Arc<dyn JobChannel>,
        backoff: BackoffConfig,
        events: mpsc::UnboundedSender<PushEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    tracing::debug!(job_id = %job_id, "Push subscription cancelled");
                }
                _ = run(&job_id, channel.as_ref(), &backoff, &events) => {}
            }
        });

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Cancel the channel and any pending reconnect. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run(
    job_id: &JobId,
    channel: &dyn JobChannel,
    backoff: &BackoffConfig,
    events: &mpsc::UnboundedSender<PushEvent>,
) {
    let mut attempt = 0u32;

    loop {
        let _ = events.send(PushEvent::Health(ConnectionHealth::Connecting));

        let error = match channel.open(job_id).await {
            Ok(signals) => consume(job_id, signals, &mut attempt, events).await,
            Err(e) => e,
        };

        tracing::warn!(job_id = %job_id, error = %error, "Push channel failed");
        let _ = events.send(PushEvent::Health(ConnectionHealth::Disconnected));
        let _ = events.send(PushEvent::ChannelFailed(error));

        attempt += 1;
        if attempt > backoff.max_attempts {
            tracing::warn!(
                job_id = %job_id,
                attempts = backoff.max_attempts,
                "Reconnect attempts exhausted, relying on polling"
            );
            let _ = events.send(PushEvent::GaveUp {
                attempts: backoff.max_attempts,
            });
            return;
        }

        let delay = backoff.delay_for(attempt);
        tracing::info!(
            job_id = %job_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting push channel"
        );
        metrics::counter!("job_sync_reconnect_attempts_total").increment(1);
        tokio::time::sleep(delay).await;
    }
}

/// Drain one open channel until it fails or closes.
async fn consume(
    job_id: &JobId,
    mut signals: futures::stream::BoxStream<'static, ChannelSignal>,
    attempt: &mut u32,
    events: &mpsc::UnboundedSender<PushEvent>,
) -> ChannelError {
    while let Some(signal) = signals.next().await {
        match signal {
            ChannelSignal::Subscribed => {
                tracing::info!(job_id = %job_id, "Push channel connected");
                *attempt = 0;
                let _ = events.send(PushEvent::Health(ConnectionHealth::Connected));
            }
            ChannelSignal::Update(raw) => match decode_snapshot(job_id, raw) {
                Ok(snapshot) => {
                    metrics::counter!("job_sync_push_updates_total").increment(1);
                    let _ = events.send(PushEvent::Snapshot(snapshot));
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Dropping malformed push update");
                    let _ = events.send(PushEvent::Malformed(e));
                }
            },
            ChannelSignal::Malformed(detail) => {
                tracing::warn!(job_id = %job_id, detail = %detail, "Dropping malformed push frame");
                let _ = events.send(PushEvent::Malformed(MalformedUpdate::Frame(detail)));
            }
            ChannelSignal::Error(message) => return ChannelError::Rejected(message),
        }
    }

    ChannelError::Closed
}
