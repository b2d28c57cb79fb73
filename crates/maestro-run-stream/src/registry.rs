//! Process-wide set of runs already known to be finished.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::model::RunId;

/// Write-once set of terminal run ids.
///
/// Presence means "known terminal"; absence means "unknown", not "running".
/// There is no removal: entries live until the process exits. Clones share the
/// same underlying set.
// TODO: bound the set (LRU or age-based) before embedding this in a
// long-running daemon; a page-lifetime client never gets large enough to care.
#[derive(Debug, Clone, Default)]
pub struct TerminalRunRegistry {
    runs: Arc<RwLock<HashSet<RunId>>>,
}

impl TerminalRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `run_id` as terminal. Returns `true` if it was not known before.
    pub fn mark_terminal(&self, run_id: &RunId) -> bool {
        let inserted = self
            .runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id.clone());
        if inserted {
            debug!(run_id = %run_id, "run marked terminal");
        }
        inserted
    }

    pub fn is_known_terminal(&self, run_id: &RunId) -> bool {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(run_id)
    }

    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
