mod config;

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Context};
use clap::Parser;
use maestro_run_stream::{
    AgentApiClient, PollingReconciler, RunStreamClient, RunStreamObserver, SessionError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Args;

/// Prints forwarded frames to stdout and remembers how the session ended.
#[derive(Default)]
struct PrintObserver {
    outcome: Mutex<Option<SessionError>>,
}

impl PrintObserver {
    fn outcome(&self) -> Option<SessionError> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RunStreamObserver for PrintObserver {
    fn on_message(&self, content: &str) {
        println!("{content}");
    }

    fn on_error(&self, error: &SessionError) {
        info!(error = %error, "run stream ended");
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.clone());
    }

    fn on_close(&self) {
        info!("run stream closed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = args
        .run_stream_config()
        .context("failed to load run stream configuration")?;
    let run_id = args.run_id();

    let api = Arc::new(AgentApiClient::new(&config)?);
    info!(base_url = %api.base_url(), run_id = %run_id, "agent API client ready");

    if args.stop {
        api.request_stop(&run_id)
            .await
            .with_context(|| format!("failed to stop run {run_id}"))?;
        info!(run_id = %run_id, "stop requested");
        return Ok(());
    }

    let client = RunStreamClient::new(api.clone(), api.clone());

    let reconciler = match (args.poll, args.thread_id()) {
        (true, Some(thread_id)) => Some(
            PollingReconciler::new(api.clone(), client.registry().clone(), config.poll_interval())
                .spawn(thread_id, run_id.clone()),
        ),
        _ => None,
    };

    let observer = Arc::new(PrintObserver::default());
    let session = client.start(run_id.clone(), observer.clone());

    tokio::select! {
        state = session.finished() => {
            info!(run_id = %run_id, state = ?state, "session finished");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!(run_id = %run_id, "interrupted, closing stream");
            session.dispose();
        }
    }

    if let Some(reconciler) = reconciler {
        let view = reconciler.view();
        info!(
            run_id = %run_id,
            status = ?view.status,
            messages = view.messages.len(),
            tool_calls = view.tool_calls.len(),
            polls = view.polls,
            "last polled snapshot"
        );
        reconciler.stop();
    }

    match observer.outcome() {
        None
        | Some(SessionError::RunEnded)
        | Some(SessionError::NotRunning { .. })
        | Some(SessionError::NotFoundMidStream) => Ok(()),
        Some(error) => bail!("run {run_id}: {error}"),
    }
}
