use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

/// Opaque identifier of a server-side verification job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Phase of a generation/audit job as reported by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobPhase {
    Pending,
    Processing,
    Generating,
    Auditing,
    Correcting,
    NeedsReview,
    Completed,
    Failed,
    Cancelled,
}

impl JobPhase {
    /// No further transition happens once a job reaches one of these phases.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Failed | JobPhase::Cancelled | JobPhase::NeedsReview
        )
    }

    /// Phases in which the server is actively working and polls run fast.
    pub fn is_working(self) -> bool {
        matches!(
            self,
            JobPhase::Processing | JobPhase::Generating | JobPhase::Auditing
        )
    }
}

/// Key used to order snapshots of the same job.
///
/// Keys of different kinds are not comparable with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingKey {
    Sequence(u64),
    UpdatedAt(DateTime<Utc>),
}

impl PartialOrd for OrderingKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (OrderingKey::Sequence(a), OrderingKey::Sequence(b)) => Some(a.cmp(b)),
            (OrderingKey::UpdatedAt(a), OrderingKey::UpdatedAt(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// One observation of a job's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub phase: JobPhase,
    pub progress: f64,
    pub ordering_key: Option<OrderingKey>,
    /// Image reference, score, violations and anything else the server sends.
    #[serde(default)]
    pub result_fields: Map<String, Value>,
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn score(&self) -> Option<f64> {
        self.result_fields.get("score").and_then(Value::as_f64)
    }

    pub fn violations(&self) -> Option<&Vec<Value>> {
        self.result_fields.get("violations").and_then(Value::as_array)
    }
}

/// Health of the push channel, independent of whether polling runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionHealth {
    Connected,
    Connecting,
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_terminal_phases() {
        let terminal: Vec<JobPhase> = [
            JobPhase::Pending,
            JobPhase::Processing,
            JobPhase::Generating,
            JobPhase::Auditing,
            JobPhase::Correcting,
            JobPhase::NeedsReview,
            JobPhase::Completed,
            JobPhase::Failed,
            JobPhase::Cancelled,
        ]
        .into_iter()
        .filter(|p| p.is_terminal())
        .collect();

        assert_eq!(
            terminal,
            vec![
                JobPhase::NeedsReview,
                JobPhase::Completed,
                JobPhase::Failed,
                JobPhase::Cancelled
            ]
        );
    }

    #[test]
    fn test_correcting_is_active_but_not_working() {
        assert!(!JobPhase::Correcting.is_terminal());
        assert!(!JobPhase::Correcting.is_working());
        assert!(JobPhase::Auditing.is_working());
    }

    #[test]
    fn test_phase_parses_snake_case() {
        assert_eq!(JobPhase::from_str("needs_review").unwrap(), JobPhase::NeedsReview);
        assert_eq!(JobPhase::Generating.to_string(), "generating");
        assert!(JobPhase::from_str("exploded").is_err());
    }

    #[test]
    fn test_mixed_ordering_keys_are_incomparable() {
        let seq = OrderingKey::Sequence(4);
        let ts = OrderingKey::UpdatedAt(Utc::now());
        assert_eq!(seq.partial_cmp(&ts), None);
        assert!(OrderingKey::Sequence(3) < seq);
    }
}
