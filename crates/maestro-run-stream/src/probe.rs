//! Single-shot status query against the authoritative run service.

use async_trait::async_trait;

use crate::error::ProbeError;
use crate::model::{RunId, RunStatus};

/// Fetches the current lifecycle state of a run.
///
/// Each call is a network round trip. The session calls it once on start and
/// once per channel error, never on a timer.
#[async_trait]
pub trait RunStatusProbe: Send + Sync {
    async fn probe(&self, run_id: &RunId) -> Result<RunStatus, ProbeError>;
}
