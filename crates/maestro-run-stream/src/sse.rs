//! SSE transport for run event channels.
//!
//! A background task owns the connection from the first attempt on and
//! reconnects with backoff, yielding an `Err` item for every failed connect
//! or interruption so the session can re-verify the run. The stream ends only
//! once the task gives up.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::AuthToken;
use crate::error::TransportError;
use crate::model::RunId;

const FRAME_BUFFER: usize = 64;

/// Reconnection behaviour of the SSE transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseConfig {
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Consecutive failed attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    pub use_exponential_backoff: bool,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 0,
            use_exponential_backoff: true,
        }
    }
}

impl SseConfig {
    /// Delay before the next attempt after `consecutive_failures` failures.
    pub fn backoff(&self, consecutive_failures: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.reconnect_base_delay;
        }
        let factor = 2u32.saturating_pow(consecutive_failures.min(10));
        self.reconnect_base_delay
            .saturating_mul(factor)
            .min(self.reconnect_max_delay)
    }

    fn exhausted(&self, consecutive_failures: u32) -> bool {
        self.max_reconnect_attempts > 0 && consecutive_failures >= self.max_reconnect_attempts
    }
}

pub(crate) struct SseRequest {
    pub client: reqwest::Client,
    pub url: Url,
    pub token: Option<AuthToken>,
    pub run_id: RunId,
    pub config: SseConfig,
}

/// Frames of one run, fed by the reconnect task. Dropping it stops the task.
pub(crate) struct SseFrames {
    rx: mpsc::Receiver<Result<String, TransportError>>,
    task: JoinHandle<()>,
}

impl Stream for SseFrames {
    type Item = Result<String, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for SseFrames {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts the connection task. A failing first connect is reported in-band,
/// like any later drop.
pub(crate) fn open(request: SseRequest) -> SseFrames {
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    let task = tokio::spawn(run_sse_loop(request, tx));
    SseFrames { rx, task }
}

async fn connect(request: &SseRequest) -> Result<reqwest::Response, TransportError> {
    let mut builder = request
        .client
        .get(request.url.clone())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache");
    if let Some(token) = &request.token {
        builder = builder.bearer_auth(token.expose());
    }

    let response = builder
        .send()
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        });
    }
    Ok(response)
}

async fn run_sse_loop(request: SseRequest, tx: mpsc::Sender<Result<String, TransportError>>) {
    let run_id = &request.run_id;
    let mut consecutive_failures: u32 = 0;

    loop {
        let interruption = match connect(&request).await {
            Ok(response) => {
                info!(run_id = %run_id, "SSE connection established");
                consecutive_failures = 0;
                match forward_events(response, &tx).await {
                    Some(interruption) => interruption,
                    None => {
                        debug!(run_id = %run_id, "frame receiver dropped, stopping SSE task");
                        return;
                    }
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                e
            }
        };

        warn!(run_id = %run_id, error = %interruption, "SSE connection interrupted");
        if tx.send(Err(interruption)).await.is_err() {
            return;
        }

        if request.config.exhausted(consecutive_failures) {
            error!(
                run_id = %run_id,
                attempts = consecutive_failures,
                "max reconnection attempts reached, closing event channel"
            );
            return;
        }

        let delay = request.config.backoff(consecutive_failures);
        debug!(
            run_id = %run_id,
            delay_ms = delay.as_millis() as u64,
            attempts = consecutive_failures,
            "reconnecting to SSE stream"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tx.closed() => return,
        }
    }
}

/// Forwards event data until the connection drops. Returns the reason, or
/// `None` when the receiver is gone.
async fn forward_events(
    response: reqwest::Response,
    tx: &mpsc::Sender<Result<String, TransportError>>,
) -> Option<TransportError> {
    let mut events = response.bytes_stream().eventsource();

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                if event.data.is_empty() {
                    continue;
                }
                if tx.send(Ok(event.data)).await.is_err() {
                    return None;
                }
            }
            Err(e) => return Some(TransportError::Stream(e.to_string())),
        }
    }

    Some(TransportError::Stream("stream closed by server".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SseConfig::default();
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(30));
        assert_eq!(config.max_reconnect_attempts, 0);
        assert!(config.use_exponential_backoff);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = SseConfig::default();
        assert_eq!(config.backoff(0), Duration::from_secs(1));
        assert_eq!(config.backoff(1), Duration::from_secs(2));
        assert_eq!(config.backoff(3), Duration::from_secs(8));
        assert_eq!(config.backoff(5), Duration::from_secs(30));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn fixed_backoff() {
        let config = SseConfig {
            use_exponential_backoff: false,
            ..SseConfig::default()
        };
        assert_eq!(config.backoff(7), Duration::from_secs(1));
    }

    #[test]
    fn unlimited_attempts_never_exhaust() {
        let config = SseConfig::default();
        assert!(!config.exhausted(1_000));

        let bounded = SseConfig {
            max_reconnect_attempts: 3,
            ..SseConfig::default()
        };
        assert!(!bounded.exhausted(2));
        assert!(bounded.exhausted(3));
    }
}
