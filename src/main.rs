use std::net::SocketAddr;
use std::sync::Arc;

use label_job_tracker::{
    config::SyncConfig,
    services::{api::HttpJobApi, channel::WebSocketChannel},
    JobId, JobTracker, SessionOutcome, SyncDeps,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let job_id = match std::env::args().nth(1) {
        Some(id) => JobId::new(id),
        None => {
            eprintln!("usage: label-job-tracker <job-id>");
            std::process::exit(2);
        }
    };

    // Load configuration from environment
    let config = SyncConfig::from_env()?;

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse()?;
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        tracing::info!("Serving Prometheus metrics on {}", addr);
    }

    metrics::describe_counter!("job_sync_fetches_total", "Status fetches issued");
    metrics::describe_counter!("job_sync_fetch_failures_total", "Status fetches that failed");
    metrics::describe_counter!("job_sync_push_updates_total", "Job updates received over push");
    metrics::describe_counter!(
        "job_sync_malformed_updates_total",
        "Updates dropped because they could not be decoded"
    );
    metrics::describe_counter!(
        "job_sync_reconnect_attempts_total",
        "Push channel reconnect attempts"
    );
    metrics::describe_counter!(
        "job_sync_rejected_updates_total",
        "Snapshots rejected as stale or out of order"
    );
    metrics::describe_counter!("job_sync_timeouts_total", "Jobs declared stuck");
    metrics::describe_gauge!("job_sync_active_sessions", "Sync sessions currently running");

    let api = HttpJobApi::new(
        &config.api_base_url,
        config.api_token.clone(),
        config.request_timeout(),
    )?;
    let channel = WebSocketChannel::new(&config.push_url, config.api_token.clone());
    let deps = SyncDeps::new(Arc::new(api), Arc::new(channel));

    let mut tracker = JobTracker::new(deps, config.settings());
    let mut updates = tracker.track(job_id.clone()).subscribe();

    tracing::info!(job_id = %job_id, "Tracking job");

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                println!("{}", serde_json::to_string(&view)?);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, cancelling");
                if let Some(session) = tracker.current() {
                    session.cancel();
                }
            }
        }
    }

    let outcome = match tracker.cancel() {
        Some(session) => session.finished().await,
        None => SessionOutcome::Cancelled,
    };

    match outcome {
        SessionOutcome::Terminal(snapshot) => {
            tracing::info!(
                job_id = %job_id,
                phase = %snapshot.phase,
                score = snapshot.score(),
                violations = snapshot.violations().map(Vec::len),
                "Job finished"
            );
            Ok(())
        }
        SessionOutcome::TimedOut(err) => {
            tracing::error!(job_id = %job_id, error = %err, "Monitoring gave up");
            std::process::exit(1);
        }
        SessionOutcome::Cancelled => Ok(()),
    }
}
