//! Scripted collaborators for session tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use label_job_tracker::services::api::{FetchError, JobStatusApi};
use label_job_tracker::services::channel::{ChannelError, ChannelSignal, JobChannel};
use label_job_tracker::services::poll::IntervalPolicy;
use label_job_tracker::services::push::BackoffConfig;
use label_job_tracker::{JobId, SessionView, SyncDeps, SyncSettings};

enum Scripted {
    Ok(Value),
    Fail(String),
}

#[derive(Default)]
struct JobScript {
    queue: VecDeque<(Duration, Scripted)>,
    sticky: Option<Value>,
}

/// Status API answering from per-job scripts.
///
/// Responses are consumed in order; once a job's script runs dry the last
/// successful record is repeated. The response is picked when the request is
/// issued, so a delayed response carries the data of its issue time.
#[derive(Default)]
pub struct ScriptedApi {
    scripts: Mutex<HashMap<String, JobScript>>,
    calls: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, job: &str, record: Value) {
        self.respond_after(job, Duration::ZERO, record);
    }

    pub fn respond_after(&self, job: &str, delay: Duration, record: Value) {
        self.scripts
            .lock()
            .unwrap()
            .entry(job.to_string())
            .or_default()
            .queue
            .push_back((delay, Scripted::Ok(record)));
    }

    pub fn fail(&self, job: &str, message: &str) {
        self.scripts
            .lock()
            .unwrap()
            .entry(job.to_string())
            .or_default()
            .queue
            .push_back((Duration::ZERO, Scripted::Fail(message.to_string())));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self, job: &str) -> (Duration, Result<Value, FetchError>) {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.entry(job.to_string()).or_default();
        match script.queue.pop_front() {
            Some((delay, Scripted::Ok(value))) => {
                script.sticky = Some(value.clone());
                (delay, Ok(value))
            }
            Some((delay, Scripted::Fail(message))) => {
                (delay, Err(FetchError::Unavailable(message)))
            }
            None => match &script.sticky {
                Some(value) => (Duration::ZERO, Ok(value.clone())),
                None => (
                    Duration::ZERO,
                    Err(FetchError::Unavailable("no scripted response".into())),
                ),
            },
        }
    }
}

impl JobStatusApi for ScriptedApi {
    fn fetch_job_status<'a>(&'a self, job_id: &'a JobId) -> BoxFuture<'a, Result<Value, FetchError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = self.next(job_id.as_str());
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }
}

/// Server side of one opened scripted channel.
pub struct ChannelServer {
    pub job_id: JobId,
    tx: mpsc::UnboundedSender<ChannelSignal>,
}

impl ChannelServer {
    pub fn subscribed(&self) {
        let _ = self.tx.send(ChannelSignal::Subscribed);
    }

    pub fn update(&self, record: Value) {
        let _ = self.tx.send(ChannelSignal::Update(record));
    }

    pub fn garbage(&self, detail: &str) {
        let _ = self.tx.send(ChannelSignal::Malformed(detail.to_string()));
    }

    pub fn error(&self, message: &str) {
        let _ = self.tx.send(ChannelSignal::Error(message.to_string()));
    }

    /// True once the client side dropped the channel.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Push channel whose server side is driven by the test.
pub struct ScriptedChannel {
    servers: mpsc::UnboundedSender<ChannelServer>,
    refuse: AtomicBool,
    opens: AtomicUsize,
}

impl ScriptedChannel {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            servers,
            refuse: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
        });
        (channel, rx)
    }

    /// Make every following open fail.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl JobChannel for ScriptedChannel {
    fn open<'a>(
        &'a self,
        job_id: &'a JobId,
    ) -> BoxFuture<'a, Result<BoxStream<'static, ChannelSignal>, ChannelError>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ChannelError::Connect("connection refused".into()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let _ = self.servers.send(ChannelServer {
                job_id: job_id.clone(),
                tx,
            });

            let signals = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|signal| (signal, rx))
            });
            Ok(signals.boxed())
        })
    }
}

pub fn deps(api: &Arc<ScriptedApi>, channel: &Arc<ScriptedChannel>) -> SyncDeps {
    SyncDeps::new(api.clone(), channel.clone())
}

/// Round numbers that keep paused-clock arithmetic readable.
pub fn test_settings() -> SyncSettings {
    SyncSettings {
        fallback_activation_delay: Duration::from_secs(5),
        poll: IntervalPolicy {
            active_base: Duration::from_secs(3),
            active_growth: Duration::ZERO,
            active_max: Duration::from_secs(3),
            idle: Duration::from_secs(10),
        },
        backoff: BackoffConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            max_attempts: 3,
        },
        job_timeout: Duration::from_secs(600),
    }
}

/// Wait until the view satisfies `f`, failing the test after `within`.
pub async fn wait_for<F>(rx: &mut watch::Receiver<SessionView>, within: Duration, f: F) -> SessionView
where
    F: FnMut(&SessionView) -> bool,
{
    timeout(within, rx.wait_for(f))
        .await
        .expect("view did not reach the expected state in time")
        .expect("session closed before reaching the expected state")
        .clone()
}
