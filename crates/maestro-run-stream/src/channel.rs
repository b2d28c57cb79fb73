//! Ownership of live event channels, at most one per run id.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::model::RunId;

/// Frames in transport order. `Err` items are blips the transport is already
/// recovering from; the stream ends only once the transport gives up.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Opens the server-to-client push channel of one run.
#[async_trait]
pub trait EventChannelTransport: Send + Sync {
    async fn open(&self, run_id: &RunId) -> Result<FrameStream, TransportError>;
}

/// What a channel pump forwards to its owning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Frame(String),
    Error(TransportError),
    /// The transport could not establish the channel at all.
    OpenFailed(TransportError),
    /// The transport stopped retrying; no more frames will arrive.
    Ended,
}

struct OpenChannel {
    generation: u64,
    task: JoinHandle<()>,
}

struct ManagerInner {
    transport: Arc<dyn EventChannelTransport>,
    channels: Mutex<HashMap<RunId, OpenChannel>>,
    next_generation: AtomicU64,
}

impl ManagerInner {
    fn channels(&self) -> MutexGuard<'_, HashMap<RunId, OpenChannel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, run_id: &RunId, generation: Option<u64>) -> bool {
        let mut channels = self.channels();
        let matches = channels
            .get(run_id)
            .is_some_and(|open| generation.map_or(true, |g| g == open.generation));
        if !matches {
            return false;
        }
        if let Some(open) = channels.remove(run_id) {
            open.task.abort();
            info!(run_id = %run_id, generation = open.generation, "event channel closed");
        }
        true
    }
}

/// Single owner of every open channel.
///
/// All open/close/replace paths go through this type, and the
/// close-existing-then-open-new sequence runs under one lock, so concurrent
/// `open` calls for the same run never leave two channels alive. Clones share
/// the same channel table.
#[derive(Clone)]
pub struct StreamChannelManager {
    inner: Arc<ManagerInner>,
}

impl StreamChannelManager {
    pub fn new(transport: Arc<dyn EventChannelTransport>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                channels: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Opens a channel for `run_id`, forwarding everything it yields to `sink`.
    ///
    /// An existing channel for the same run is closed first. Must be called
    /// from within a Tokio runtime.
    pub fn open(&self, run_id: &RunId, sink: mpsc::UnboundedSender<ChannelEvent>) -> ChannelHandle {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let mut channels = self.inner.channels();

        if let Some(previous) = channels.remove(run_id) {
            previous.task.abort();
            warn!(
                run_id = %run_id,
                replaced = previous.generation,
                generation,
                "replacing existing event channel"
            );
        }

        let task = tokio::spawn(pump(
            Arc::clone(&self.inner.transport),
            run_id.clone(),
            generation,
            sink,
        ));
        channels.insert(run_id.clone(), OpenChannel { generation, task });
        info!(run_id = %run_id, generation, "event channel opened");

        ChannelHandle {
            run_id: run_id.clone(),
            generation,
            inner: Arc::clone(&self.inner),
            released: false,
        }
    }

    /// Closes whatever channel is open for `run_id`. No-op when none is.
    pub fn close(&self, run_id: &RunId) -> bool {
        self.inner.release(run_id, None)
    }

    /// Closes every open channel.
    pub fn close_all(&self) {
        let mut channels = self.inner.channels();
        for (run_id, open) in channels.drain() {
            open.task.abort();
            info!(run_id = %run_id, generation = open.generation, "event channel closed");
        }
    }

    pub fn is_open(&self, run_id: &RunId) -> bool {
        self.inner.channels().contains_key(run_id)
    }

    /// Generation of the channel currently open for `run_id`.
    pub fn generation(&self, run_id: &RunId) -> Option<u64> {
        self.inner.channels().get(run_id).map(|open| open.generation)
    }

    /// Number of open channels across all runs.
    pub fn open_count(&self) -> usize {
        self.inner.channels().len()
    }
}

/// Scoped ownership of one opened channel.
///
/// Closing (or dropping) the handle closes its own channel only: if a newer
/// channel has since replaced it for the same run, that one is left alone.
pub struct ChannelHandle {
    run_id: RunId,
    generation: u64,
    inner: Arc<ManagerInner>,
    released: bool,
}

impl ChannelHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` if this call actually closed a live channel.
    pub fn close(mut self) -> bool {
        self.released = true;
        self.inner.release(&self.run_id, Some(self.generation))
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if !self.released {
            self.inner.release(&self.run_id, Some(self.generation));
        }
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("run_id", &self.run_id)
            .field("generation", &self.generation)
            .finish()
    }
}

async fn pump(
    transport: Arc<dyn EventChannelTransport>,
    run_id: RunId,
    generation: u64,
    sink: mpsc::UnboundedSender<ChannelEvent>,
) {
    let mut stream = match transport.open(&run_id).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(run_id = %run_id, generation, error = %e, "failed to open event channel");
            let _ = sink.send(ChannelEvent::OpenFailed(e));
            return;
        }
    };

    let mut frames = 0u64;
    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(frame) => {
                frames += 1;
                ChannelEvent::Frame(frame)
            }
            Err(e) => ChannelEvent::Error(e),
        };
        if sink.send(event).is_err() {
            debug!(run_id = %run_id, generation, "session gone, stopping pump");
            return;
        }
    }

    debug!(run_id = %run_id, generation, frames, "event channel stream ended");
    let _ = sink.send(ChannelEvent::Ended);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PendingTransport;

    #[async_trait]
    impl EventChannelTransport for PendingTransport {
        async fn open(&self, _run_id: &RunId) -> Result<FrameStream, TransportError> {
            Ok(Box::pin(futures::stream::pending()))
        }
    }

    fn manager() -> StreamChannelManager {
        StreamChannelManager::new(Arc::new(PendingTransport))
    }

    #[tokio::test]
    async fn reopening_replaces_previous_channel() {
        let manager = manager();
        let run = RunId::from("r1");
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let first = manager.open(&run, tx1);
        let second = manager.open(&run, tx2);

        assert_eq!(manager.open_count(), 1);
        assert_eq!(manager.generation(&run), Some(second.generation()));

        // The stale handle must not close the newer channel.
        assert!(!first.close());
        assert!(manager.is_open(&run));
        assert!(second.close());
        assert!(!manager.is_open(&run));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let manager = manager();
        let run = RunId::from("r1");
        assert!(!manager.close(&run));

        let (tx, _rx) = mpsc::unbounded_channel();
        let _handle = manager.open(&run, tx);
        assert!(manager.close(&run));
        assert!(!manager.close(&run));
        assert_eq!(manager.open_count(), 0);
    }

    #[tokio::test]
    async fn dropping_handle_releases_channel() {
        let manager = manager();
        let run = RunId::from("r2");
        let (tx, _rx) = mpsc::unbounded_channel();
        {
            let _handle = manager.open(&run, tx);
            assert!(manager.is_open(&run));
        }
        assert!(!manager.is_open(&run));
    }

    #[tokio::test]
    async fn replaced_pump_drops_its_sink() {
        let manager = manager();
        let run = RunId::from("r3");
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let _first = manager.open(&run, tx1);
        let _second = manager.open(&run, tx2);

        assert_eq!(rx1.recv().await, None);
    }

    #[tokio::test]
    async fn channels_for_distinct_runs_coexist() {
        let manager = manager();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let _a = manager.open(&RunId::from("a"), tx1);
        let _b = manager.open(&RunId::from("b"), tx2);
        assert_eq!(manager.open_count(), 2);

        manager.close_all();
        assert_eq!(manager.open_count(), 0);
    }
}
