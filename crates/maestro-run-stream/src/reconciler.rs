//! Fixed-interval snapshot polling.
//!
//! The snapshot is the system of record; the live stream only gets updates to
//! the caller sooner. The reconciler merges each snapshot into a [`ThreadView`]
//! and publishes it until the run leaves `running`/`queued`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::model::{RunId, RunSnapshot, RunStatus, ThreadId, ThreadMessage, ToolCall};
use crate::registry::TerminalRunRegistry;

/// Fetches the authoritative state of one run.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(
        &self,
        thread_id: &ThreadId,
        run_id: &RunId,
    ) -> Result<RunSnapshot, ApiError>;
}

/// Merged, caller-visible state of a thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadView {
    /// `None` until the first snapshot arrives.
    pub status: Option<RunStatus>,
    pub messages: Vec<ThreadMessage>,
    pub tool_calls: Vec<ToolCall>,
    /// Successful polls so far.
    pub polls: u64,
}

impl ThreadView {
    /// Upserts by id: a later snapshot wins, first-appearance order is kept.
    pub fn merge(&mut self, snapshot: RunSnapshot) {
        self.status = Some(snapshot.status);
        upsert(&mut self.messages, snapshot.messages, |m| m.message_id.clone());
        upsert(&mut self.tool_calls, snapshot.tool_calls, |t| t.id.clone());
        self.polls += 1;
    }

    /// `true` once the run has left `running`/`queued`.
    pub fn is_settled(&self) -> bool {
        self.status.is_some_and(RunStatus::is_terminal)
    }
}

fn upsert<T>(items: &mut Vec<T>, incoming: Vec<T>, key: impl Fn(&T) -> String) {
    let mut index: HashMap<String, usize> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (key(item), i))
        .collect();

    for item in incoming {
        match index.get(&key(&item)) {
            Some(&i) => items[i] = item,
            None => {
                index.insert(key(&item), items.len());
                items.push(item);
            }
        }
    }
}

pub struct PollingReconciler {
    source: Arc<dyn SnapshotSource>,
    registry: TerminalRunRegistry,
    interval: Duration,
}

impl PollingReconciler {
    pub fn new(source: Arc<dyn SnapshotSource>, registry: TerminalRunRegistry, interval: Duration) -> Self {
        Self {
            source,
            registry,
            interval,
        }
    }

    /// Starts polling. The first fetch happens immediately.
    pub fn spawn(self, thread_id: ThreadId, run_id: RunId) -> ReconcilerHandle {
        let (view_tx, view_rx) = watch::channel(ThreadView::default());
        let task = tokio::spawn(self.run(thread_id, run_id.clone(), view_tx));
        ReconcilerHandle {
            run_id,
            view: view_rx,
            task,
        }
    }

    async fn run(self, thread_id: ThreadId, run_id: RunId, view_tx: watch::Sender<ThreadView>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(thread_id = %thread_id, run_id = %run_id, interval_ms = self.interval.as_millis() as u64, "polling run snapshots");

        loop {
            ticker.tick().await;

            let snapshot = match self.source.fetch_snapshot(&thread_id, &run_id).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "snapshot fetch failed, retrying next tick");
                    continue;
                }
            };

            debug!(
                run_id = %run_id,
                status = %snapshot.status,
                messages = snapshot.messages.len(),
                tool_calls = snapshot.tool_calls.len(),
                "snapshot fetched"
            );

            let mut settled = false;
            view_tx.send_modify(|view| {
                view.merge(snapshot);
                settled = view.is_settled();
            });

            if settled {
                self.registry.mark_terminal(&run_id);
                info!(run_id = %run_id, "run settled, polling stopped");
                return;
            }
        }
    }
}

/// Running reconciler. Dropping it stops polling.
#[derive(Debug)]
pub struct ReconcilerHandle {
    run_id: RunId,
    view: watch::Receiver<ThreadView>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn view(&self) -> ThreadView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ThreadView> {
        self.view.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the run to settle. Returns the last published view if
    /// polling was stopped first.
    pub async fn settled(&self) -> ThreadView {
        let mut view = self.view.clone();
        if let Ok(settled) = view.wait_for(ThreadView::is_settled).await {
            return settled.clone();
        }
        let last = view.borrow().clone();
        last
    }

    pub fn stop(&self) {
        if !self.task.is_finished() {
            debug!(run_id = %self.run_id, "stopping reconciler");
        }
        self.task.abort();
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(id: &str, text: &str) -> ThreadMessage {
        ThreadMessage {
            message_id: id.to_string(),
            kind: "assistant".to_string(),
            content: json!(text),
            created_at: None,
        }
    }

    fn snapshot(status: RunStatus, messages: Vec<ThreadMessage>) -> RunSnapshot {
        RunSnapshot {
            status,
            messages,
            tool_calls: vec![],
        }
    }

    #[test]
    fn merge_upserts_and_keeps_order() {
        let mut view = ThreadView::default();
        view.merge(snapshot(
            RunStatus::Running,
            vec![message("m1", "hel"), message("m2", "tool")],
        ));
        view.merge(snapshot(
            RunStatus::Running,
            vec![message("m3", "new"), message("m1", "hello")],
        ));

        let ids: Vec<_> = view.messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
        assert_eq!(view.messages[0].content, json!("hello"));
        assert_eq!(view.polls, 2);
    }

    #[test]
    fn queued_and_running_are_not_settled() {
        let mut view = ThreadView::default();
        assert!(!view.is_settled());
        view.merge(snapshot(RunStatus::Queued, vec![]));
        assert!(!view.is_settled());
        view.merge(snapshot(RunStatus::Stopped, vec![]));
        assert!(view.is_settled());
    }
}
