//! Decoding of raw job records into [`JobSnapshot`]s.
//!
//! Both the status endpoint and the push channel deliver loosely-typed JSON
//! rows. Decoding is strict about the phase and the job id and lenient about
//! everything else: unknown fields are carried through as result fields.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::models::job::{JobId, JobPhase, JobSnapshot, OrderingKey};

/// Row shape shared by status responses and push records.
#[derive(Debug, Deserialize)]
struct RawJobRecord {
    #[serde(default, alias = "jobId")]
    job_id: Option<String>,
    #[serde(default, alias = "phase")]
    status: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default, alias = "seq", alias = "version")]
    sequence: Option<Value>,
    #[serde(default, alias = "updatedAt")]
    updated_at: Option<Value>,
    #[serde(default)]
    state: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// Decode a raw record for `expected` into a snapshot.
pub fn decode_snapshot(expected: &JobId, raw: Value) -> Result<JobSnapshot, MalformedUpdate> {
    let record: RawJobRecord = serde_json::from_value(raw)?;

    if let Some(found) = &record.job_id {
        if found != expected.as_str() {
            return Err(MalformedUpdate::JobMismatch {
                expected: expected.to_string(),
                found: found.clone(),
            });
        }
    }

    let mut result_fields = record.rest;
    let mut status = record.status;
    let mut progress = record.progress;

    // The nested state blob wins over top-level columns.
    if let Some(state) = record.state {
        let mut blob = expand_state(state)?;
        if let Some(phase) = blob.remove("phase").or_else(|| blob.remove("status")) {
            status = Some(
                phase
                    .as_str()
                    .ok_or_else(|| MalformedUpdate::InvalidState("phase is not a string".into()))?
                    .to_string(),
            );
        }
        if let Some(p) = blob.remove("progress") {
            progress = Some(
                p.as_f64()
                    .ok_or_else(|| MalformedUpdate::InvalidState("progress is not a number".into()))?,
            );
        }
        result_fields.extend(blob);
    }

    let status = status.ok_or(MalformedUpdate::MissingPhase)?;
    let phase =
        JobPhase::from_str(&status).map_err(|_| MalformedUpdate::UnknownPhase(status.clone()))?;

    let progress = match progress {
        Some(p) => p.clamp(0.0, 100.0),
        None if phase == JobPhase::Completed => 100.0,
        None => 0.0,
    };

    let ordering_key = read_ordering_key(record.sequence.as_ref(), record.updated_at.as_ref());

    Ok(JobSnapshot {
        job_id: expected.clone(),
        phase,
        progress,
        ordering_key,
        result_fields,
        error: record.error,
    })
}

/// Pick the ordering key, preferring the sequence number.
///
/// Keys that cannot be read leave the snapshot unordered instead of failing
/// the whole record.
fn read_ordering_key(sequence: Option<&Value>, updated_at: Option<&Value>) -> Option<OrderingKey> {
    let sequence = sequence.and_then(Value::as_u64).map(OrderingKey::Sequence);
    let updated_at = updated_at
        .and_then(Value::as_str)
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .map(|ts| OrderingKey::UpdatedAt(ts.with_timezone(&Utc)));
    sequence.or(updated_at)
}

/// The state blob arrives either as an object or as JSON text.
fn expand_state(state: Value) -> Result<Map<String, Value>, MalformedUpdate> {
    match state {
        Value::Object(map) => Ok(map),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(MalformedUpdate::InvalidState(
                "state text is not a JSON object".into(),
            )),
            Err(e) => Err(MalformedUpdate::InvalidState(e.to_string())),
        },
        Value::Null => Ok(Map::new()),
        other => Err(MalformedUpdate::InvalidState(format!(
            "unexpected state type: {other}"
        ))),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MalformedUpdate {
    #[error("Update is not a valid job record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid state blob: {0}")]
    InvalidState(String),

    #[error("Update carries no phase")]
    MissingPhase,

    #[error("Unknown job phase: {0}")]
    UnknownPhase(String),

    #[error("Update for job {found} delivered to tracker of job {expected}")]
    JobMismatch { expected: String, found: String },

    #[error("Malformed channel frame: {0}")]
    Frame(String),
}
