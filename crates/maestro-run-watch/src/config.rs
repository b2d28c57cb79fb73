use std::path::PathBuf;

use clap::Parser;
use maestro_run_stream::{ConfigError, RunId, RunStreamConfig, ThreadId};

/// Follow a single agent run: print its live frames until it finishes
#[derive(Parser, Debug)]
#[command(name = "maestro-run-watch")]
pub struct Args {
    /// Agent run id
    pub run_id: String,

    /// Thread the run belongs to (required for --poll)
    #[arg(long)]
    pub thread: Option<String>,

    /// Agent API root (or set MAESTRO_API_URL env var)
    #[arg(long, env = "MAESTRO_API_URL")]
    pub api_url: Option<String>,

    /// Bearer token (or set MAESTRO_API_TOKEN env var)
    #[arg(long, env = "MAESTRO_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// TOML config file
    #[arg(long, env = "MAESTRO_RUN_STREAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Give up after this many failed reconnects (0 = never)
    #[arg(long)]
    pub max_reconnect_attempts: Option<u32>,

    /// Also poll thread snapshots alongside the stream
    #[arg(long, requires = "thread")]
    pub poll: bool,

    /// Ask the server to stop the run, then exit
    #[arg(long, conflicts_with = "poll")]
    pub stop: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Args {
    pub fn run_id(&self) -> RunId {
        RunId::new(self.run_id.clone())
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread.as_deref().map(ThreadId::from)
    }

    /// File settings first, then flags and environment on top.
    pub fn run_stream_config(&self) -> Result<RunStreamConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RunStreamConfig::load(path)?,
            None => RunStreamConfig::default(),
        };
        if let Some(url) = &self.api_url {
            config = config.with_base_url(url.clone());
        }
        if let Some(token) = &self.token {
            config = config.with_auth_token(token.clone());
        }
        if let Some(attempts) = self.max_reconnect_attempts {
            config = config.with_max_reconnect_attempts(attempts);
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "maestro-run-watch",
            "r1",
            "--api-url",
            "https://agents.example.com/api",
            "--token",
            "t0k",
            "--max-reconnect-attempts",
            "3",
        ]);
        let config = args.run_stream_config().unwrap();
        assert_eq!(config.base_url, "https://agents.example.com/api");
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.auth_token.map(|t| t.expose().to_string()), Some("t0k".into()));
    }

    #[test]
    fn poll_requires_thread() {
        assert!(Args::try_parse_from(["maestro-run-watch", "r1", "--poll"]).is_err());
        assert!(Args::try_parse_from(["maestro-run-watch", "r1", "--poll", "--thread", "t1"]).is_ok());
    }
}
