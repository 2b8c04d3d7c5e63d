//! Canned job records as the verification service sends them

#![allow(dead_code)]

use serde_json::{json, Value};

/// A status row with a sequence number.
pub fn record(job: &str, phase: &str, seq: u64) -> Value {
    json!({
        "job_id": job,
        "status": phase,
        "progress": progress_for(phase),
        "sequence": seq,
    })
}

/// A status row the server sent before it started numbering updates.
pub fn unordered(job: &str, phase: &str) -> Value {
    json!({
        "job_id": job,
        "status": phase,
    })
}

/// Finished audit with the result carried in a nested state blob.
pub fn completed(job: &str, seq: u64, score: u64) -> Value {
    let state = json!({
        "phase": "completed",
        "progress": 100,
        "score": score,
        "violations": [
            { "rule": "government_warning", "severity": "minor" }
        ],
    });
    json!({
        "job_id": job,
        "status": "auditing",
        "sequence": seq,
        "image_url": format!("r2://labels/{job}.png"),
        "state": state.to_string(),
    })
}

fn progress_for(phase: &str) -> u64 {
    match phase {
        "pending" => 0,
        "processing" => 10,
        "generating" => 40,
        "auditing" => 70,
        "correcting" => 85,
        _ => 100,
    }
}
