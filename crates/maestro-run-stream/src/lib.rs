//! Live agent-run stream client.
//!
//! Opens, supervises and tears down the push channel for a single in-progress
//! agent run, reconciling it against the authoritative run status.
//!
//! - [`RunStreamClient::start`] gates on the [`TerminalRunRegistry`], probes the
//!   run status, then streams frames through the [`classify`] rule table until a
//!   terminal condition is observed.
//! - [`StreamChannelManager`] guarantees at most one open channel per run id.
//! - [`PollingReconciler`] is the slower, authoritative snapshot path.
//! - [`AgentApiClient`] is the HTTP/SSE implementation of every remote seam.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use maestro_run_stream::{AgentApiClient, RunStreamClient, RunStreamConfig};
//!
//! let config = RunStreamConfig::default().with_base_url("https://agents.example.com/api");
//! let api = Arc::new(AgentApiClient::new(&config)?);
//! let client = RunStreamClient::new(api.clone(), api);
//!
//! let handle = client.start("run_123".into(), Arc::new(my_observer));
//! // ... later, from the UI teardown path:
//! handle.dispose();
//! ```

mod channel;
mod classifier;
mod config;
mod error;
mod http;
mod model;
mod probe;
mod reconciler;
mod registry;
mod session;
mod sse;

pub use channel::{
    ChannelEvent, ChannelHandle, EventChannelTransport, FrameStream, StreamChannelManager,
};
pub use classifier::{classify, FrameClass, TerminalKind};
pub use config::{AuthToken, RunStreamConfig};
pub use error::{ApiError, ConfigError, ProbeError, Result, SessionError, TransportError};
pub use http::AgentApiClient;
pub use model::{AgentRunRecord, RunId, RunSnapshot, RunStatus, ThreadId, ThreadMessage, ToolCall};
pub use probe::RunStatusProbe;
pub use reconciler::{PollingReconciler, ReconcilerHandle, SnapshotSource, ThreadView};
pub use registry::TerminalRunRegistry;
pub use session::{
    transition, Effect, Input, Recheck, RunStreamClient, RunStreamObserver, SessionHandle,
    SessionState,
};
pub use sse::SseConfig;
