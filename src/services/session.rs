//! Per-job sync orchestration.
//!
//! A [`SyncSession`] owns one [`SnapshotStore`], one [`PushSubscription`],
//! one [`PollLoop`] and one [`JobTimeoutGuard`]. All of them report into a
//! single actor task, which is the only place session state changes. When
//! the session tears down, the actor drops its receivers and cancels its
//! token, so nothing started under the session can touch anything anymore.
//!
//! [`JobTracker`] holds at most one session and replaces it when a different
//! job is tracked.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::SyncSettings;
use crate::models::job::{ConnectionHealth, JobId, JobPhase, JobSnapshot};
use crate::models::session::{SessionOutcome, SessionState, SessionView, UpdateSource};
use crate::services::api::JobStatusApi;
use crate::services::channel::JobChannel;
use crate::services::fallback::FallbackController;
use crate::services::poll::{PollEvent, PollLoop};
use crate::services::push::{PushEvent, PushSubscription};
use crate::services::store::SnapshotStore;
use crate::services::timeout::JobTimeoutGuard;

/// External collaborators shared by every session.
#[derive(Clone)]
pub struct SyncDeps {
    pub api: Arc<dyn JobStatusApi>,
    pub channel: Arc<dyn JobChannel>,
}

impl SyncDeps {
    pub fn new(api: Arc<dyn JobStatusApi>, channel: Arc<dyn JobChannel>) -> Self {
        Self { api, channel }
    }
}

enum SessionCommand {
    Refresh,
}

/// Caller-side handle of a running session.
///
/// Dropping the handle tears the session down.
pub struct SyncSession {
    job_id: JobId,
    session_id: Uuid,
    view: watch::Receiver<SessionView>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
    task: Option<JoinHandle<SessionOutcome>>,
}

impl SyncSession {
    /// Start tracking `job_id`. Must be called from within a tokio runtime.
    ///
    /// Performs the first status fetch and opens the push channel right away.
    pub fn start(job_id: JobId, deps: &SyncDeps, settings: &SyncSettings) -> Self {
        let session_id = Uuid::new_v4();
        let now = Instant::now();
        let cancel = CancellationToken::new();

        let (view_tx, view_rx) = watch::channel(SessionView::new(session_id, job_id.clone()));
        let (phase_tx, phase_rx) = watch::channel(None);
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let span = tracing::info_span!("sync_session", job_id = %job_id, session_id = %session_id);

        let poll = PollLoop::new(
            job_id.clone(),
            deps.api.clone(),
            settings.poll.clone(),
            phase_rx,
            poll_tx,
            cancel.clone(),
        );
        let push = PushSubscription::open(
            job_id.clone(),
            deps.channel.clone(),
            settings.backoff.clone(),
            push_tx,
            cancel.child_token(),
        );

        let actor = SessionActor {
            job_id: job_id.clone(),
            store: SnapshotStore::new(job_id.clone()),
            fallback: FallbackController::new(settings.fallback_activation_delay, now),
            guard: JobTimeoutGuard::new(job_id.clone(), settings.job_timeout, now),
            push,
            poll,
            health: ConnectionHealth::Connecting,
            last_source: None,
            view: view_tx,
            phase: phase_tx,
        };

        let task = tokio::spawn(
            actor
                .run(push_rx, poll_rx, command_rx, cancel.clone())
                .instrument(span),
        );

        Self {
            job_id,
            session_id,
            view: view_rx,
            commands: command_tx,
            cancel,
            task: Some(task),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Latest published view.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Receiver that is notified on every change of the view.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn is_active(&self) -> bool {
        self.view.borrow().state != SessionState::TornDown && !self.cancel.is_cancelled()
    }

    /// Fetch the job status now, outside the poll schedule.
    pub fn refresh(&self) {
        let _ = self.commands.send(SessionCommand::Refresh);
    }

    /// Stop tracking. Safe to call repeatedly.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session to end.
    pub async fn finished(mut self) -> SessionOutcome {
        match self.task.take() {
            Some(task) => task.await.unwrap_or(SessionOutcome::Cancelled),
            None => SessionOutcome::Cancelled,
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SessionActor {
    job_id: JobId,
    store: SnapshotStore,
    fallback: FallbackController,
    guard: JobTimeoutGuard,
    push: PushSubscription,
    poll: PollLoop,
    health: ConnectionHealth,
    last_source: Option<UpdateSource>,
    view: watch::Sender<SessionView>,
    phase: watch::Sender<Option<JobPhase>>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut push_events: mpsc::UnboundedReceiver<PushEvent>,
        mut poll_events: mpsc::UnboundedReceiver<PollEvent>,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        cancel: CancellationToken,
    ) -> SessionOutcome {
        tracing::info!("Sync session started");
        metrics::gauge!("job_sync_active_sessions").increment(1.0);

        self.poll.fetch_now();
        self.publish(SessionState::Active, None);

        let outcome = loop {
            let arming = self.fallback.arming_deadline();
            let timeout_at = self.guard.deadline();

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break SessionOutcome::Cancelled,

                _ = sleep_until(timeout_at) => {
                    let phase = self.store.current().map(|s| s.phase);
                    if let Some(err) = self.guard.check(Instant::now(), phase) {
                        break SessionOutcome::TimedOut(err);
                    }
                }

                Some(event) = push_events.recv() => {
                    if let Some(done) = self.on_push(event) {
                        break done;
                    }
                }

                Some(event) = poll_events.recv() => {
                    if let Some(done) = self.on_poll(event) {
                        break done;
                    }
                }

                Some(command) = commands.recv() => match command {
                    SessionCommand::Refresh => {
                        tracing::debug!("Manual refresh requested");
                        self.poll.fetch_now();
                    }
                },

                _ = sleep_until(arming) => {
                    let state = self.fallback.on_timer(Instant::now());
                    tracing::debug!(?state, "Fallback arming timer elapsed");
                    self.reconcile();
                }
            }
        };

        self.teardown(&outcome);
        cancel.cancel();
        outcome
    }

    fn on_push(&mut self, event: PushEvent) -> Option<SessionOutcome> {
        match event {
            PushEvent::Health(health) => {
                self.health = health;
                self.fallback.on_health(health, Instant::now());
                self.reconcile();
            }
            PushEvent::Snapshot(snapshot) => {
                self.fallback.on_push_snapshot(Instant::now());
                self.apply(snapshot, UpdateSource::Push);
                self.reconcile();
            }
            PushEvent::Malformed(_) => {
                metrics::counter!("job_sync_malformed_updates_total").increment(1);
            }
            PushEvent::ChannelFailed(e) => {
                tracing::debug!(error = %e, "Push channel failure reported");
            }
            PushEvent::GaveUp { attempts } => {
                tracing::info!(attempts, "Push channel given up, polling carries the session");
            }
        }
        self.finished()
    }

    fn on_poll(&mut self, event: PollEvent) -> Option<SessionOutcome> {
        match event {
            PollEvent::Fetched(snapshot) => {
                self.apply(snapshot, UpdateSource::Poll);
                self.publish(SessionState::Active, None);
            }
            PollEvent::FetchFailed(_) => {}
            PollEvent::Malformed(_) => {
                metrics::counter!("job_sync_malformed_updates_total").increment(1);
            }
        }
        self.finished()
    }

    fn apply(&mut self, snapshot: JobSnapshot, source: UpdateSource) {
        let accepted_phase = match self.store.apply(snapshot) {
            Some(outcome) if outcome.accepted => Some(outcome.current.phase),
            _ => None,
        };

        match accepted_phase {
            Some(phase) => {
                self.last_source = Some(source);
                self.phase.send_replace(Some(phase));
            }
            None => metrics::counter!("job_sync_rejected_updates_total").increment(1),
        }
    }

    /// Bring the poll loop in line with the fallback decision and publish.
    fn reconcile(&mut self) {
        let wants = self.fallback.wants_polling() && !self.store.is_terminal();
        if wants && !self.poll.is_running() {
            self.poll.start();
        } else if !wants && self.poll.is_running() {
            self.poll.stop();
        }
        self.publish(SessionState::Active, None);
    }

    fn finished(&self) -> Option<SessionOutcome> {
        self.store
            .current()
            .filter(|s| s.is_terminal())
            .map(|s| SessionOutcome::Terminal(s.clone()))
    }

    fn publish(&self, state: SessionState, error: Option<String>) {
        let next = SessionView {
            session_id: self.view.borrow().session_id,
            job_id: self.job_id.clone(),
            state,
            snapshot: self.store.current().cloned(),
            connection_health: self.health,
            is_polling: self.poll.is_running(),
            timed_out: error.is_some(),
            last_source: self.last_source,
            error,
        };

        self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn teardown(&mut self, outcome: &SessionOutcome) {
        self.push.close();
        self.poll.stop();
        self.guard.cancel();

        let error = match outcome {
            SessionOutcome::Terminal(snapshot) => {
                tracing::info!(phase = %snapshot.phase, "Job reached terminal phase");
                None
            }
            SessionOutcome::TimedOut(err) => {
                tracing::error!(error = %err, "Job timed out");
                metrics::counter!("job_sync_timeouts_total").increment(1);
                Some(err.to_string())
            }
            SessionOutcome::Cancelled => {
                tracing::info!("Sync session cancelled");
                None
            }
        };

        self.publish(SessionState::TornDown, error);
        metrics::gauge!("job_sync_active_sessions").decrement(1.0);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Keeps at most one session alive, replacing it when the tracked job changes.
pub struct JobTracker {
    deps: SyncDeps,
    settings: SyncSettings,
    current: Option<SyncSession>,
}

impl JobTracker {
    pub fn new(deps: SyncDeps, settings: SyncSettings) -> Self {
        Self {
            deps,
            settings,
            current: None,
        }
    }

    /// Track `job_id`, tearing down any session for a different job first.
    ///
    /// Tracking the job that is already being tracked returns the running session.
    pub fn track(&mut self, job_id: JobId) -> &SyncSession {
        let reuse = self
            .current
            .as_ref()
            .is_some_and(|s| s.job_id() == &job_id && s.is_active());

        if !reuse {
            if let Some(previous) = self.current.take() {
                tracing::info!(
                    previous_job = %previous.job_id(),
                    next_job = %job_id,
                    "Switching tracked job"
                );
                previous.cancel();
            }
        }

        let deps = &self.deps;
        let settings = &self.settings;
        self.current
            .get_or_insert_with(|| SyncSession::start(job_id, deps, settings))
    }

    pub fn current(&self) -> Option<&SyncSession> {
        self.current.as_ref()
    }

    /// Stop tracking and hand back the session so callers can await its end.
    pub fn cancel(&mut self) -> Option<SyncSession> {
        let session = self.current.take()?;
        session.cancel();
        Some(session)
    }
}
