//! Run stream session: the orchestrator.
//!
//! A session is an explicit finite state machine. [`transition`] is pure: it
//! maps `(state, input)` to the next state plus a list of [`Effect`]s, and the
//! driver task executes those effects (probe, open/close channel, callbacks).
//!
//! ```text
//! Idle --start--> Probing --running--> Streaming --terminal--> Closing --> Closed
//!   \                \--not running--------------------------> Closing
//!    \--known terminal--> Blocked
//! ```
//!
//! A channel error while streaming does not end the session by itself: the run
//! status is probed again and only a non-running answer is treated as fatal.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelHandle, EventChannelTransport, StreamChannelManager};
use crate::classifier::{classify, FrameClass, TerminalKind};
use crate::error::{ProbeError, SessionError, TransportError};
use crate::model::{RunId, RunStatus};
use crate::probe::RunStatusProbe;
use crate::registry::TerminalRunRegistry;

/// Receives the outcome of a session. Calls arrive in frame order from a
/// single task; `on_error` and `on_close` each fire at most once.
pub trait RunStreamObserver: Send + Sync {
    fn on_message(&self, content: &str);
    fn on_error(&self, error: &SessionError);
    fn on_close(&self);
}

/// Why a streaming session is re-probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recheck {
    /// A transient channel error; the transport keeps retrying meanwhile.
    TransportError,
    /// The channel is gone for good.
    ChannelEnded { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Known terminal at start; no probe, no channel.
    Blocked,
    Probing,
    Streaming { recheck: Option<Recheck> },
    Closing { notify: bool },
    Closed,
}

impl SessionState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Blocked | Self::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Start { known_terminal: bool },
    Probed(Result<RunStatus, ProbeError>),
    Frame(String),
    TransportError(TransportError),
    ChannelEnded { reason: String },
    /// A newer session replaced this session's channel.
    Superseded,
    ChannelClosed,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Probe,
    OpenChannel,
    Deliver(String),
    MarkTerminal,
    NotifyError(SessionError),
    CloseChannel,
    NotifyClose,
}

fn close_with(mut effects: Vec<Effect>) -> (SessionState, Vec<Effect>) {
    effects.push(Effect::CloseChannel);
    (SessionState::Closing { notify: true }, effects)
}

fn not_running(status: RunStatus) -> Vec<Effect> {
    let mut effects = Vec::with_capacity(2);
    if status.is_terminal() {
        effects.push(Effect::MarkTerminal);
    }
    effects.push(Effect::NotifyError(SessionError::NotRunning {
        status: Some(status),
    }));
    effects
}

fn verified_failure(status: Option<RunStatus>) -> Vec<Effect> {
    let mut effects = Vec::with_capacity(2);
    let reason = match status {
        Some(status) => {
            if status.is_terminal() {
                effects.push(Effect::MarkTerminal);
            }
            format!("run status is {status}")
        }
        None => {
            effects.push(Effect::MarkTerminal);
            "run not found".to_string()
        }
    };
    effects.push(Effect::NotifyError(
        SessionError::TransportFailedAfterVerification { reason },
    ));
    effects
}

fn terminal_frame(kind: TerminalKind, raw: String) -> (SessionState, Vec<Effect>) {
    let effects = match kind {
        TerminalKind::NotFoundMidStream => vec![
            Effect::MarkTerminal,
            Effect::NotifyError(SessionError::NotFoundMidStream),
        ],
        TerminalKind::CompletedFinal => vec![
            Effect::MarkTerminal,
            Effect::Deliver(raw),
            Effect::NotifyError(SessionError::RunEnded),
        ],
        TerminalKind::ThreadRunEnd => vec![
            Effect::MarkTerminal,
            Effect::NotifyError(SessionError::RunEnded),
        ],
    };
    close_with(effects)
}

/// The session transition function.
pub fn transition(state: SessionState, input: Input) -> (SessionState, Vec<Effect>) {
    use SessionState as S;

    match (state, input) {
        (S::Idle, Input::Start { known_terminal: true }) => (
            S::Blocked,
            vec![
                Effect::NotifyError(SessionError::NotRunning { status: None }),
                Effect::NotifyClose,
            ],
        ),
        (S::Idle, Input::Start { known_terminal: false }) => (S::Probing, vec![Effect::Probe]),

        (S::Probing, Input::Probed(Ok(status))) if status.is_live() => {
            (S::Streaming { recheck: None }, vec![Effect::OpenChannel])
        }
        (S::Probing, Input::Probed(Ok(status))) => close_with(not_running(status)),
        (S::Probing, Input::Probed(Err(e))) if e.is_not_found() => close_with(vec![
            Effect::MarkTerminal,
            Effect::NotifyError(SessionError::NotRunning { status: None }),
        ]),
        (S::Probing, Input::Probed(Err(e))) => close_with(vec![Effect::NotifyError(
            SessionError::ProbeTransient {
                message: e.to_string(),
            },
        )]),

        (S::Streaming { recheck }, Input::Frame(raw)) => match classify(&raw) {
            FrameClass::Ping => (S::Streaming { recheck }, vec![]),
            FrameClass::Ordinary(content) => {
                (S::Streaming { recheck }, vec![Effect::Deliver(content)])
            }
            FrameClass::Terminal(kind) => terminal_frame(kind, raw),
        },

        (S::Streaming { recheck: None }, Input::TransportError(_)) => (
            S::Streaming {
                recheck: Some(Recheck::TransportError),
            },
            vec![Effect::Probe],
        ),
        // A re-probe is already in flight; further blips are folded into it.
        (S::Streaming { recheck: Some(recheck) }, Input::TransportError(_)) => {
            (S::Streaming { recheck: Some(recheck) }, vec![])
        }

        (S::Streaming { recheck: None }, Input::ChannelEnded { reason }) => (
            S::Streaming {
                recheck: Some(Recheck::ChannelEnded { reason }),
            },
            vec![Effect::Probe],
        ),
        (S::Streaming { recheck: Some(Recheck::TransportError) }, Input::ChannelEnded { reason }) => (
            S::Streaming {
                recheck: Some(Recheck::ChannelEnded { reason }),
            },
            vec![],
        ),
        (S::Streaming { recheck: Some(ended) }, Input::ChannelEnded { .. }) => {
            (S::Streaming { recheck: Some(ended) }, vec![])
        }

        (S::Streaming { recheck: Some(Recheck::TransportError) }, Input::Probed(result)) => {
            match result {
                Ok(status) if status.is_live() => (S::Streaming { recheck: None }, vec![]),
                Ok(status) => close_with(verified_failure(Some(status))),
                Err(e) if e.is_not_found() => close_with(verified_failure(None)),
                // Unverified: the transport keeps retrying.
                Err(_) => (S::Streaming { recheck: None }, vec![]),
            }
        }
        (S::Streaming { recheck: Some(Recheck::ChannelEnded { reason }) }, Input::Probed(result)) => {
            match result {
                Ok(status) if !status.is_live() => close_with(verified_failure(Some(status))),
                Err(e) if e.is_not_found() => close_with(verified_failure(None)),
                Ok(_) | Err(_) => {
                    close_with(vec![Effect::NotifyError(SessionError::ChannelLost { reason })])
                }
            }
        }

        (S::Streaming { .. }, Input::Superseded) => close_with(vec![]),

        (S::Closing { notify }, Input::ChannelClosed) => {
            let effects = if notify { vec![Effect::NotifyClose] } else { vec![] };
            (S::Closed, effects)
        }

        (state @ (S::Blocked | S::Closed | S::Closing { .. }), Input::Cancel) => (state, vec![]),
        (_, Input::Cancel) => (S::Closing { notify: false }, vec![Effect::CloseChannel]),

        // Anything else (late probe answers, frames after close) is stale.
        (state, _) => (state, vec![]),
    }
}

/// Entry point for watching runs.
///
/// Cheap to clone; clones share the channel table and the terminal registry.
#[derive(Clone)]
pub struct RunStreamClient {
    probe: Arc<dyn RunStatusProbe>,
    manager: StreamChannelManager,
    registry: TerminalRunRegistry,
}

impl RunStreamClient {
    pub fn new(probe: Arc<dyn RunStatusProbe>, transport: Arc<dyn EventChannelTransport>) -> Self {
        Self {
            probe,
            manager: StreamChannelManager::new(transport),
            registry: TerminalRunRegistry::new(),
        }
    }

    /// Uses `registry` instead of a private one, so several clients (or a
    /// polling reconciler) share what they learn about finished runs.
    pub fn with_registry(mut self, registry: TerminalRunRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &TerminalRunRegistry {
        &self.registry
    }

    pub fn channels(&self) -> &StreamChannelManager {
        &self.manager
    }

    /// Starts watching `run_id`.
    ///
    /// If the run is already known terminal, `on_error` and `on_close` fire
    /// before this returns and nothing is spawned. Otherwise the probe and
    /// stream run on a Tokio task, so this must be called within a runtime.
    pub fn start(&self, run_id: RunId, observer: Arc<dyn RunStreamObserver>) -> SessionHandle {
        let known_terminal = self.registry.is_known_terminal(&run_id);
        let cancel = CancellationToken::new();
        let channel = Arc::new(Mutex::new(None));
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let mut driver = SessionDriver {
            run_id: run_id.clone(),
            probe: Arc::clone(&self.probe),
            manager: self.manager.clone(),
            registry: self.registry.clone(),
            observer,
            state: SessionState::Idle,
            state_tx,
            cancel: cancel.clone(),
            channel: Arc::clone(&channel),
            channel_rx: None,
            pending_probe: None,
        };

        if known_terminal {
            info!(run_id = %run_id, "run already known terminal, not streaming");
        }
        driver.apply(Input::Start { known_terminal });

        if !driver.state.is_finished() {
            tokio::spawn(driver.run());
        }

        SessionHandle {
            run_id,
            cancel,
            channel,
            state: state_rx,
        }
    }
}

/// Disposer for one session. Dropping it disposes the session.
pub struct SessionHandle {
    run_id: RunId,
    cancel: CancellationToken,
    channel: Arc<Mutex<Option<ChannelHandle>>>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state.borrow().is_finished()
    }

    /// Waits until the session reaches `Closed` or `Blocked`.
    pub async fn finished(&self) -> SessionState {
        let mut state = self.state.clone();
        if let Ok(finished) = state.wait_for(SessionState::is_finished).await {
            return finished.clone();
        }
        let last = state.borrow().clone();
        last
    }

    /// Cancels the session and closes its channel.
    ///
    /// Idempotent, and a no-op after the session already finished. Fires no
    /// callbacks.
    pub fn dispose(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let handle = self
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            debug!(run_id = %self.run_id, "session disposed, closing channel");
            handle.close();
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("run_id", &self.run_id)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

struct SessionDriver {
    run_id: RunId,
    probe: Arc<dyn RunStatusProbe>,
    manager: StreamChannelManager,
    registry: TerminalRunRegistry,
    observer: Arc<dyn RunStreamObserver>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    cancel: CancellationToken,
    channel: Arc<Mutex<Option<ChannelHandle>>>,
    channel_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    pending_probe: Option<BoxFuture<'static, Result<RunStatus, ProbeError>>>,
}

impl SessionDriver {
    async fn run(mut self) {
        while !self.state.is_finished() {
            let input = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Input::Cancel,
                result = poll_probe(&mut self.pending_probe) => {
                    self.pending_probe = None;
                    Input::Probed(result)
                }
                event = recv_channel(&mut self.channel_rx) => self.channel_input(event),
            };
            self.apply(input);
        }
        debug!(run_id = %self.run_id, state = ?self.state, "session driver exiting");
    }

    fn channel_input(&mut self, event: Option<ChannelEvent>) -> Input {
        match event {
            Some(ChannelEvent::Frame(frame)) => Input::Frame(frame),
            Some(ChannelEvent::Error(e)) => {
                warn!(run_id = %self.run_id, error = %e, "event channel error, re-probing run status");
                Input::TransportError(e)
            }
            // The pump exits after either of these; its sink closing is not a
            // supersession.
            Some(ChannelEvent::OpenFailed(e)) => {
                self.channel_rx = None;
                Input::ChannelEnded {
                    reason: e.to_string(),
                }
            }
            Some(ChannelEvent::Ended) => {
                self.channel_rx = None;
                Input::ChannelEnded {
                    reason: "transport stopped reconnecting".to_string(),
                }
            }
            None => {
                self.channel_rx = None;
                info!(run_id = %self.run_id, "event channel replaced by a newer session");
                Input::Superseded
            }
        }
    }

    fn apply(&mut self, input: Input) {
        let (next, effects) = transition(self.state.clone(), input);
        if next != self.state {
            debug!(run_id = %self.run_id, from = ?self.state, to = ?next, "session transition");
        }
        self.state = next;
        self.state_tx.send_replace(self.state.clone());

        for effect in effects {
            self.execute(effect);
        }

        if matches!(self.state, SessionState::Closing { .. }) {
            self.apply(Input::ChannelClosed);
        }
    }

    fn execute(&mut self, effect: Effect) {
        let cancelled = self.cancel.is_cancelled();
        match effect {
            Effect::Probe => {
                let probe = Arc::clone(&self.probe);
                let run_id = self.run_id.clone();
                self.pending_probe = Some(Box::pin(async move { probe.probe(&run_id).await }));
            }
            Effect::OpenChannel => {
                if cancelled {
                    return;
                }
                let (tx, rx) = mpsc::unbounded_channel();
                let handle = self.manager.open(&self.run_id, tx);
                *self.channel.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                self.channel_rx = Some(rx);
            }
            Effect::Deliver(content) => {
                if !cancelled {
                    self.observer.on_message(&content);
                }
            }
            Effect::MarkTerminal => {
                self.registry.mark_terminal(&self.run_id);
            }
            Effect::NotifyError(error) => {
                info!(run_id = %self.run_id, error = %error, "run stream session ending");
                if !cancelled {
                    self.observer.on_error(&error);
                }
            }
            Effect::CloseChannel => {
                let handle = self
                    .channel
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(handle) = handle {
                    handle.close();
                }
                self.channel_rx = None;
                self.pending_probe = None;
            }
            Effect::NotifyClose => {
                if !cancelled {
                    self.observer.on_close();
                }
            }
        }
    }
}

async fn poll_probe(
    pending: &mut Option<BoxFuture<'static, Result<RunStatus, ProbeError>>>,
) -> Result<RunStatus, ProbeError> {
    match pending.as_mut() {
        Some(probe) => probe.await,
        None => std::future::pending().await,
    }
}

async fn recv_channel(rx: &mut Option<mpsc::UnboundedReceiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming() -> SessionState {
        SessionState::Streaming { recheck: None }
    }

    #[test]
    fn known_terminal_start_is_blocked() {
        let (state, effects) = transition(SessionState::Idle, Input::Start { known_terminal: true });
        assert_eq!(state, SessionState::Blocked);
        assert_eq!(
            effects,
            vec![
                Effect::NotifyError(SessionError::NotRunning { status: None }),
                Effect::NotifyClose,
            ]
        );
    }

    #[test]
    fn start_probes() {
        let (state, effects) = transition(SessionState::Idle, Input::Start { known_terminal: false });
        assert_eq!(state, SessionState::Probing);
        assert_eq!(effects, vec![Effect::Probe]);
    }

    #[test]
    fn running_probe_opens_channel() {
        let (state, effects) =
            transition(SessionState::Probing, Input::Probed(Ok(RunStatus::Running)));
        assert_eq!(state, streaming());
        assert_eq!(effects, vec![Effect::OpenChannel]);
    }

    #[test]
    fn terminal_probe_marks_and_closes() {
        let (state, effects) =
            transition(SessionState::Probing, Input::Probed(Ok(RunStatus::Error)));
        assert_eq!(state, SessionState::Closing { notify: true });
        assert_eq!(
            effects,
            vec![
                Effect::MarkTerminal,
                Effect::NotifyError(SessionError::NotRunning {
                    status: Some(RunStatus::Error)
                }),
                Effect::CloseChannel,
            ]
        );
    }

    #[test]
    fn queued_probe_closes_without_marking() {
        let (_, effects) = transition(SessionState::Probing, Input::Probed(Ok(RunStatus::Queued)));
        assert!(!effects.contains(&Effect::MarkTerminal));
        assert!(effects.contains(&Effect::NotifyError(SessionError::NotRunning {
            status: Some(RunStatus::Queued)
        })));
    }

    #[test]
    fn not_found_probe_marks_terminal() {
        let (state, effects) = transition(
            SessionState::Probing,
            Input::Probed(Err(ProbeError::NotFound(RunId::from("r1")))),
        );
        assert_eq!(state, SessionState::Closing { notify: true });
        assert_eq!(
            effects,
            vec![
                Effect::MarkTerminal,
                Effect::NotifyError(SessionError::NotRunning { status: None }),
                Effect::CloseChannel,
            ]
        );

        let (state, effects) = transition(state, Input::ChannelClosed);
        assert_eq!(state, SessionState::Closed);
        assert_eq!(effects, vec![Effect::NotifyClose]);
    }

    #[test]
    fn transient_probe_does_not_mark() {
        let (state, effects) = transition(
            SessionState::Probing,
            Input::Probed(Err(ProbeError::Transient {
                status: Some(502),
                message: "bad gateway".to_string(),
            })),
        );
        assert_eq!(state, SessionState::Closing { notify: true });
        assert!(!effects.contains(&Effect::MarkTerminal));
        assert!(matches!(
            effects[0],
            Effect::NotifyError(SessionError::ProbeTransient { .. })
        ));
    }

    #[test]
    fn ping_has_no_effect() {
        let (state, effects) = transition(streaming(), Input::Frame(r#"{"type":"ping"}"#.into()));
        assert_eq!(state, streaming());
        assert!(effects.is_empty());
    }

    #[test]
    fn ordinary_frame_is_delivered() {
        let (state, effects) = transition(streaming(), Input::Frame("hello".into()));
        assert_eq!(state, streaming());
        assert_eq!(effects, vec![Effect::Deliver("hello".into())]);
    }

    #[test]
    fn completed_final_delivers_then_ends() {
        let raw = r#"{"type":"status","status":"completed","message":"Stream ended with status: completed"}"#;
        let (state, effects) = transition(streaming(), Input::Frame(raw.into()));
        assert_eq!(state, SessionState::Closing { notify: true });
        assert_eq!(
            effects,
            vec![
                Effect::MarkTerminal,
                Effect::Deliver(raw.into()),
                Effect::NotifyError(SessionError::RunEnded),
                Effect::CloseChannel,
            ]
        );
    }

    #[test]
    fn missing_run_frame_closes_without_delivery() {
        let raw = r#"{"type":"status","status":"error","message":"Agent run r1 not found in active runs"}"#;
        let (state, effects) = transition(streaming(), Input::Frame(raw.into()));
        assert_eq!(state, SessionState::Closing { notify: true });
        assert_eq!(
            effects,
            vec![
                Effect::MarkTerminal,
                Effect::NotifyError(SessionError::NotFoundMidStream),
                Effect::CloseChannel,
            ]
        );
    }

    #[test]
    fn transport_error_reprobes_once() {
        let err = TransportError::Stream("reset".into());
        let (state, effects) = transition(streaming(), Input::TransportError(err.clone()));
        assert_eq!(effects, vec![Effect::Probe]);

        let (state, effects) = transition(state, Input::TransportError(err));
        assert!(effects.is_empty(), "second blip must not probe again");
        assert_eq!(
            state,
            SessionState::Streaming {
                recheck: Some(Recheck::TransportError)
            }
        );
    }

    #[test]
    fn reprobe_running_keeps_streaming_silently() {
        let state = SessionState::Streaming {
            recheck: Some(Recheck::TransportError),
        };
        let (state, effects) = transition(state, Input::Probed(Ok(RunStatus::Running)));
        assert_eq!(state, streaming());
        assert!(effects.is_empty());
    }

    #[test]
    fn reprobe_completed_is_verified_failure() {
        let state = SessionState::Streaming {
            recheck: Some(Recheck::TransportError),
        };
        let (state, effects) = transition(state, Input::Probed(Ok(RunStatus::Completed)));
        assert_eq!(state, SessionState::Closing { notify: true });
        assert_eq!(
            effects,
            vec![
                Effect::MarkTerminal,
                Effect::NotifyError(SessionError::TransportFailedAfterVerification {
                    reason: "run status is completed".into()
                }),
                Effect::CloseChannel,
            ]
        );
    }

    #[test]
    fn reprobe_not_found_is_verified_failure() {
        let (state, effects) = transition(
            streaming(),
            Input::TransportError(TransportError::Stream("reset".into())),
        );
        assert_eq!(effects, vec![Effect::Probe]);

        let (state, effects) = transition(
            state,
            Input::Probed(Err(ProbeError::NotFound(RunId::from("r1")))),
        );
        assert_eq!(state, SessionState::Closing { notify: true });
        assert_eq!(
            effects,
            vec![
                Effect::MarkTerminal,
                Effect::NotifyError(SessionError::TransportFailedAfterVerification {
                    reason: "run not found".into()
                }),
                Effect::CloseChannel,
            ]
        );
    }

    #[test]
    fn reprobe_transient_keeps_streaming() {
        let state = SessionState::Streaming {
            recheck: Some(Recheck::TransportError),
        };
        let (state, effects) = transition(
            state,
            Input::Probed(Err(ProbeError::Transient {
                status: None,
                message: "timeout".into(),
            })),
        );
        assert_eq!(state, streaming());
        assert!(effects.is_empty());
    }

    #[test]
    fn ended_channel_with_running_run_is_lost() {
        let (state, effects) = transition(
            streaming(),
            Input::ChannelEnded {
                reason: "gave up".into(),
            },
        );
        assert_eq!(effects, vec![Effect::Probe]);

        let (state, effects) = transition(state, Input::Probed(Ok(RunStatus::Running)));
        assert_eq!(state, SessionState::Closing { notify: true });
        assert_eq!(
            effects,
            vec![
                Effect::NotifyError(SessionError::ChannelLost {
                    reason: "gave up".into()
                }),
                Effect::CloseChannel,
            ]
        );
    }

    #[test]
    fn superseded_session_closes_without_error() {
        let (state, effects) = transition(streaming(), Input::Superseded);
        assert_eq!(state, SessionState::Closing { notify: true });
        assert_eq!(effects, vec![Effect::CloseChannel]);

        let (state, effects) = transition(state, Input::ChannelClosed);
        assert_eq!(state, SessionState::Closed);
        assert_eq!(effects, vec![Effect::NotifyClose]);
    }

    #[test]
    fn cancel_is_silent() {
        for state in [SessionState::Idle, SessionState::Probing, streaming()] {
            let (state, effects) = transition(state, Input::Cancel);
            assert_eq!(state, SessionState::Closing { notify: false });
            assert_eq!(effects, vec![Effect::CloseChannel]);

            let (state, effects) = transition(state, Input::ChannelClosed);
            assert_eq!(state, SessionState::Closed);
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn finished_states_ignore_everything() {
        for state in [SessionState::Closed, SessionState::Blocked] {
            for input in [
                Input::Cancel,
                Input::Frame("late".into()),
                Input::Probed(Ok(RunStatus::Running)),
                Input::Superseded,
            ] {
                let (next, effects) = transition(state.clone(), input);
                assert_eq!(next, state);
                assert!(effects.is_empty());
            }
        }
    }
}
