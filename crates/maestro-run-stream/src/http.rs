//! HTTP client for the agent API.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::channel::{EventChannelTransport, FrameStream};
use crate::config::{AuthToken, RunStreamConfig};
use crate::error::{ApiError, ProbeError, Result, TransportError};
use crate::model::{AgentRunRecord, RunId, RunSnapshot, RunStatus, ThreadId, ThreadMessage, ToolCall};
use crate::probe::RunStatusProbe;
use crate::reconciler::SnapshotSource;
use crate::sse::{self, SseConfig, SseRequest};

/// Implements every remote seam of the client: status probe, SSE event
/// channel, stop requests and snapshot reads.
#[derive(Debug, Clone)]
pub struct AgentApiClient {
    base_url: Url,
    http: reqwest::Client,
    stream_http: reqwest::Client,
    auth_token: Option<AuthToken>,
    sse: SseConfig,
}

impl AgentApiClient {
    pub fn new(config: &RunStreamConfig) -> Result<Self> {
        config.validate()?;
        let base_url = config.parsed_base_url()?;

        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout())
            .build()?;
        // The event stream is long-lived; only connecting is bounded.
        let stream_http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            base_url,
            http,
            stream_http,
            auth_token: config.auth_token.clone(),
            sse: config.sse_config(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token.expose()),
            None => req,
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))
    }

    fn run_url(&self, run_id: &RunId) -> Result<Url> {
        self.url(&format!("agent-run/{run_id}"))
    }

    /// Fetches the full status record of a run.
    pub async fn get_run(&self, run_id: &RunId) -> Result<AgentRunRecord> {
        let url = self.run_url(run_id)?;
        debug!(run_id = %run_id, url = %url, "fetching agent run");

        let response = self.apply_auth(self.http.get(url)).send().await?;
        match response.status() {
            StatusCode::OK => decode(response).await,
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(format!("agent run {run_id}"))),
            status => Err(server_error(status, response).await),
        }
    }

    /// Asks the server to cancel a run. Out of band: does not touch any open
    /// event channel.
    pub async fn request_stop(&self, run_id: &RunId) -> Result<()> {
        let url = self.url(&format!("agent-run/{run_id}/stop"))?;
        debug!(run_id = %run_id, url = %url, "requesting agent run stop");

        let response = self.apply_auth(self.http.post(url)).send().await?;
        match response.status() {
            status if status.is_success() => {
                info!(run_id = %run_id, "agent run stop requested");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(format!("agent run {run_id}"))),
            status => Err(server_error(status, response).await),
        }
    }

    pub async fn fetch_messages(&self, thread_id: &ThreadId) -> Result<Vec<ThreadMessage>> {
        self.fetch_list(&format!("thread/{thread_id}/messages"), "messages")
            .await
    }

    pub async fn fetch_tool_calls(&self, thread_id: &ThreadId) -> Result<Vec<ToolCall>> {
        self.fetch_list(&format!("thread/{thread_id}/tool-calls"), "tool_calls")
            .await
    }

    /// Lists come back either bare or wrapped as `{ "<key>": [...] }`.
    async fn fetch_list<T: DeserializeOwned>(&self, path: &str, key: &str) -> Result<Vec<T>> {
        let url = self.url(path)?;
        debug!(url = %url, "fetching list");

        let response = self.apply_auth(self.http.get(url)).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body: Value = decode(response).await?;
                let items = match body {
                    Value::Object(mut map) => map.remove(key).unwrap_or(Value::Array(vec![])),
                    other => other,
                };
                Ok(serde_json::from_value(items)?)
            }
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(path.to_string())),
            status => Err(server_error(status, response).await),
        }
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn server_error(status: StatusCode, response: reqwest::Response) -> ApiError {
    let message = response.text().await.unwrap_or_default();
    ApiError::Server {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl RunStatusProbe for AgentApiClient {
    async fn probe(&self, run_id: &RunId) -> std::result::Result<RunStatus, ProbeError> {
        match self.get_run(run_id).await {
            Ok(record) => {
                debug!(run_id = %run_id, status = %record.status, "probed run status");
                Ok(record.status)
            }
            Err(ApiError::NotFound(_)) => Err(ProbeError::NotFound(run_id.clone())),
            Err(ApiError::Decode(e)) => Err(ProbeError::Decode(e.to_string())),
            Err(ApiError::Server { status, message }) => {
                warn!(run_id = %run_id, status, "run status probe failed");
                Err(ProbeError::Transient {
                    status: Some(status),
                    message,
                })
            }
            Err(e) => Err(ProbeError::Transient {
                status: None,
                message: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl EventChannelTransport for AgentApiClient {
    async fn open(&self, run_id: &RunId) -> std::result::Result<FrameStream, TransportError> {
        let url = self
            .url(&format!("agent-run/{run_id}/stream"))
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let frames = sse::open(SseRequest {
            client: self.stream_http.clone(),
            url,
            token: self.auth_token.clone(),
            run_id: run_id.clone(),
            config: self.sse.clone(),
        });
        Ok(Box::pin(frames))
    }
}

#[async_trait]
impl SnapshotSource for AgentApiClient {
    async fn fetch_snapshot(&self, thread_id: &ThreadId, run_id: &RunId) -> Result<RunSnapshot> {
        let (record, messages, tool_calls) = tokio::try_join!(
            self.get_run(run_id),
            self.fetch_messages(thread_id),
            self.fetch_tool_calls(thread_id),
        )?;
        Ok(RunSnapshot {
            status: record.status,
            messages,
            tool_calls,
        })
    }
}
