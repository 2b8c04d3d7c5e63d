//! Label Job Tracker
//!
//! Keeps a client-side view of a long-running label generation/audit job
//! fresh until it reaches a terminal outcome. Updates arrive from a push
//! channel and from status polling; a per-job sync session reconciles both
//! through an ordering-aware snapshot store, falls back to polling when the
//! channel is down or silent, and gives up on jobs that never finish.

pub mod config;
pub mod models;
pub mod services;

pub use config::{SyncConfig, SyncSettings};
pub use models::job::{ConnectionHealth, JobId, JobPhase, JobSnapshot, OrderingKey};
pub use models::session::{SessionOutcome, SessionState, SessionView, UpdateSource};
pub use services::session::{JobTracker, SyncDeps, SyncSession};

/// Start a session for `job_id`. Must be called from within a tokio runtime.
pub fn track(job_id: impl Into<JobId>, deps: &SyncDeps, settings: &SyncSettings) -> SyncSession {
    SyncSession::start(job_id.into(), deps, settings)
}

/// Stop a session started with [`track`].
pub fn cancel(session: &SyncSession) {
    session.cancel();
}
