use std::cmp::Ordering;

use tracing::debug;

use crate::models::job::{JobId, JobSnapshot};

/// Holds the last accepted snapshot of one job.
///
/// `apply` is the single serialization point for push and poll deliveries:
/// a candidate only replaces the stored snapshot when it is causally newer.
pub struct SnapshotStore {
    job_id: JobId,
    current: Option<JobSnapshot>,
}

/// Result of offering a candidate to the store.
#[derive(Debug)]
pub struct ApplyOutcome<'a> {
    pub accepted: bool,
    pub current: &'a JobSnapshot,
}

impl SnapshotStore {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&JobSnapshot> {
        self.current.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.current.as_ref().is_some_and(JobSnapshot::is_terminal)
    }

    /// Offer `candidate` to the store.
    ///
    /// Returns `None` only when the candidate belongs to another job and the
    /// store is still empty.
    pub fn apply(&mut self, candidate: JobSnapshot) -> Option<ApplyOutcome<'_>> {
        let accept = candidate.job_id == self.job_id && self.supersedes(&candidate);

        if accept {
            debug!(
                job_id = %self.job_id,
                phase = %candidate.phase,
                progress = candidate.progress,
                "Snapshot accepted"
            );
            self.current = Some(candidate);
        } else {
            debug!(
                job_id = %self.job_id,
                candidate_job = %candidate.job_id,
                phase = %candidate.phase,
                "Snapshot rejected"
            );
        }

        self.current.as_ref().map(|current| ApplyOutcome {
            accepted: accept,
            current,
        })
    }

    fn supersedes(&self, candidate: &JobSnapshot) -> bool {
        let Some(stored) = &self.current else {
            return true;
        };
        if stored.is_terminal() {
            return false;
        }
        match (&stored.ordering_key, &candidate.ordering_key) {
            (Some(old), Some(new)) => match new.partial_cmp(old) {
                Some(Ordering::Greater) => true,
                Some(_) => false,
                // Keys of different kinds cannot be ordered; take the newer delivery.
                None => true,
            },
            // Unordered snapshots only fill an empty store.
            (_, None) => false,
            (None, Some(_)) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobPhase, OrderingKey};
    use chrono::{TimeZone, Utc};
    use serde_json::Map;

    fn snap(phase: JobPhase, key: Option<u64>) -> JobSnapshot {
        JobSnapshot {
            job_id: JobId::new("job-1"),
            phase,
            progress: 0.0,
            ordering_key: key.map(OrderingKey::Sequence),
            result_fields: Map::new(),
            error: None,
        }
    }

    fn store() -> SnapshotStore {
        SnapshotStore::new(JobId::new("job-1"))
    }

    #[test]
    fn test_newer_key_wins_in_either_order() {
        let a = snap(JobPhase::Processing, Some(1));
        let b = snap(JobPhase::Auditing, Some(2));

        let mut forward = store();
        forward.apply(a.clone());
        forward.apply(b.clone());

        let mut reverse = store();
        reverse.apply(b.clone());
        let outcome = reverse.apply(a).unwrap();
        assert!(!outcome.accepted);

        assert_eq!(forward.current(), Some(&b));
        assert_eq!(reverse.current(), Some(&b));
    }

    #[test]
    fn test_equal_key_is_rejected() {
        let mut s = store();
        s.apply(snap(JobPhase::Processing, Some(5)));
        let outcome = s.apply(snap(JobPhase::Generating, Some(5))).unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.current.phase, JobPhase::Processing);
    }

    #[test]
    fn test_terminal_locks_store() {
        let mut s = store();
        s.apply(snap(JobPhase::Completed, Some(2)));
        assert!(s.is_terminal());

        for candidate in [
            snap(JobPhase::Processing, Some(99)),
            snap(JobPhase::Failed, None),
            snap(JobPhase::Auditing, Some(1)),
        ] {
            let outcome = s.apply(candidate).unwrap();
            assert!(!outcome.accepted);
            assert_eq!(outcome.current.phase, JobPhase::Completed);
        }
    }

    #[test]
    fn test_unordered_snapshot_only_fills_empty_store() {
        let mut s = store();
        assert!(s.apply(snap(JobPhase::Pending, None)).unwrap().accepted);
        assert!(!s.apply(snap(JobPhase::Processing, None)).unwrap().accepted);
        assert!(s.apply(snap(JobPhase::Processing, Some(1))).unwrap().accepted);
        assert!(!s.apply(snap(JobPhase::Generating, None)).unwrap().accepted);
        assert_eq!(s.current().unwrap().phase, JobPhase::Processing);
    }

    #[test]
    fn test_mixed_key_kinds_take_newer_delivery() {
        let mut s = store();
        s.apply(snap(JobPhase::Processing, Some(4)));
        let mut stamped = snap(JobPhase::Auditing, None);
        stamped.ordering_key = Some(OrderingKey::UpdatedAt(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        ));
        assert!(s.apply(stamped).unwrap().accepted);
    }

    #[test]
    fn test_other_job_never_applies() {
        let mut s = store();
        let mut foreign = snap(JobPhase::Completed, Some(1));
        foreign.job_id = JobId::new("job-2");
        assert!(s.apply(foreign.clone()).is_none());

        s.apply(snap(JobPhase::Processing, Some(1)));
        foreign.ordering_key = Some(OrderingKey::Sequence(50));
        let outcome = s.apply(foreign).unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.current.job_id, JobId::new("job-1"));
    }
}
