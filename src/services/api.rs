use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::Value;

use crate::models::job::JobId;

/// Point-in-time status read for one job.
pub trait JobStatusApi: Send + Sync + 'static {
    /// Fetch the raw job record. Idempotent; may fail transiently.
    fn fetch_job_status<'a>(&'a self, job_id: &'a JobId) -> BoxFuture<'a, Result<Value, FetchError>>;
}

/// Client for the verification service's job status endpoint.
pub struct HttpJobApi {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpJobApi {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(FetchError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn status_url(&self, job_id: &JobId) -> String {
        format!("{}/api/v1/verify/{}", self.base_url, job_id)
    }
}

impl JobStatusApi for HttpJobApi {
    fn fetch_job_status<'a>(&'a self, job_id: &'a JobId) -> BoxFuture<'a, Result<Value, FetchError>> {
        Box::pin(async move {
            let mut request = self.http.get(self.status_url(job_id));
            if let Some(token) = &self.api_token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(FetchError::Http)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            response.json::<Value>().await.map_err(FetchError::Http)
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Status endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Status endpoint unavailable: {0}")]
    Unavailable(String),
}
