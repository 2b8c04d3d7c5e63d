//! Push channel primitive for job updates.
//!
//! A [`JobChannel`] opens one live stream of [`ChannelSignal`]s for a single
//! job. The stream ending means the server closed the channel; dropping it
//! closes the channel from our side.

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::models::job::JobId;

/// One event delivered by an open channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    /// The server confirmed the subscription.
    Subscribed,
    /// A raw job record.
    Update(Value),
    /// A frame that could not be understood.
    Malformed(String),
    /// The server or transport reported a failure; the stream ends after it.
    Error(String),
}

/// Opens push channels for jobs.
pub trait JobChannel: Send + Sync + 'static {
    fn open<'a>(
        &'a self,
        job_id: &'a JobId,
    ) -> BoxFuture<'a, Result<BoxStream<'static, ChannelSignal>, ChannelError>>;
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Subscribe {
        job_id: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<&'a str>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Subscribed,
    Update { record: Value },
    Error { message: String },
    Heartbeat,
}

/// Parse a text frame into a signal. Heartbeats produce nothing.
fn parse_frame(text: &str) -> Option<ChannelSignal> {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(ServerFrame::Subscribed) => Some(ChannelSignal::Subscribed),
        Ok(ServerFrame::Update { record }) => Some(ChannelSignal::Update(record)),
        Ok(ServerFrame::Error { message }) => Some(ChannelSignal::Error(message)),
        Ok(ServerFrame::Heartbeat) => None,
        Err(e) => Some(ChannelSignal::Malformed(e.to_string())),
    }
}

/// WebSocket push channel to the verification service.
pub struct WebSocketChannel {
    url: String,
    api_token: Option<String>,
}

impl WebSocketChannel {
    pub fn new(url: &str, api_token: Option<String>) -> Self {
        Self {
            url: url.to_string(),
            api_token,
        }
    }
}

impl JobChannel for WebSocketChannel {
    fn open<'a>(
        &'a self,
        job_id: &'a JobId,
    ) -> BoxFuture<'a, Result<BoxStream<'static, ChannelSignal>, ChannelError>> {
        Box::pin(async move {
            let (mut ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
                .await
                .map_err(|e| ChannelError::Connect(format!("{}: {e}", self.url)))?;

            let subscribe = serde_json::to_string(&ClientFrame::Subscribe {
                job_id: job_id.as_str(),
                token: self.api_token.as_deref(),
            })
            .map_err(|e| ChannelError::Send(e.to_string()))?;

            ws.send(Message::text(subscribe))
                .await
                .map_err(|e| ChannelError::Send(e.to_string()))?;

            tracing::debug!(job_id = %job_id, url = %self.url, "Push channel handshake complete");

            let signals = stream::unfold(Some(ws), |state| async move {
                let mut ws = state?;
                loop {
                    match ws.next().await {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(signal) = parse_frame(&text) {
                                return Some((signal, Some(ws)));
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::debug!(?frame, "Push channel closed by server");
                            return None;
                        }
                        // Pings are answered by tungstenite; binary frames are not part of the protocol.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Some((ChannelSignal::Error(e.to_string()), None)),
                        None => return None,
                    }
                }
            });

            Ok(signals.boxed())
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to open push channel: {0}")]
    Connect(String),

    #[error("Push channel closed unexpectedly")]
    Closed,

    #[error("Push channel reported an error: {0}")]
    Rejected(String),

    #[error("Failed to send on push channel: {0}")]
    Send(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_frames() {
        assert_eq!(
            parse_frame(r#"{"type":"subscribed","job_id":"j"}"#),
            Some(ChannelSignal::Subscribed)
        );
        assert_eq!(
            parse_frame(r#"{"type":"update","record":{"status":"pending"}}"#),
            Some(ChannelSignal::Update(json!({"status": "pending"})))
        );
        assert_eq!(
            parse_frame(r#"{"type":"error","message":"forbidden"}"#),
            Some(ChannelSignal::Error("forbidden".into()))
        );
        assert_eq!(parse_frame(r#"{"type":"heartbeat"}"#), None);
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        assert!(matches!(
            parse_frame("not json"),
            Some(ChannelSignal::Malformed(_))
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"teleport"}"#),
            Some(ChannelSignal::Malformed(_))
        ));
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let frame = serde_json::to_value(ClientFrame::Subscribe {
            job_id: "job-9",
            token: None,
        })
        .unwrap();
        assert_eq!(frame, json!({"type": "subscribe", "job_id": "job-9"}));
    }
}
