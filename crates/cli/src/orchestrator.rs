use std::path::PathBuf;
use std::time::Duration;

use hgremote_mirror::{HgCheckout, MirrorError};
use hgremote_relay::{RelayError, RelayHandle, RelayServer, RelaySession};
use hgremote_runtime_config::{BridgeConfig, TransportSettings};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::invocation::Invocation;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("transport helper command is empty")]
    EmptyTransport,

    #[error("failed to run `{command}`: {source}")]
    TransportSpawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` failed with error code {code}")]
    Transport { command: String, code: i32 },

    #[error("`{command}` was terminated by a signal")]
    TransportKilled { command: String },

    #[error("interrupted")]
    Interrupted,
}

impl OrchestratorError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted => 130,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// What a successful run touched.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub mirror_dir: PathBuf,
    /// Whether this run created the mirror.
    pub cloned: bool,
    pub relay: RelaySession,
    pub transport_exit: i32,
}

/// Synchronize the mirror of `invocation.url` with git in one pass.
///
/// Mirror setup, relay start, pull, transport helper, push, relay stop.
/// The relay is stopped and joined on every path once started; an error
/// from the sync itself wins over one from shutting the relay down.
pub async fn run(invocation: &Invocation, config: &BridgeConfig) -> Result<RunSummary> {
    info!(remote = %invocation.remote, url = %invocation.url, "synchronizing hg remote");

    let checkout = HgCheckout::new(&invocation.git_dir, &invocation.url, config.mirror.clone());
    let cloned = checkout.ensure_initialized().await?;

    let mut relay = RelayServer::new(checkout.sidecar_dir(), config.relay.clone()).start();
    let outcome = sync_through_relay(&checkout, &mut relay, config).await;
    let teardown = relay.stop().await;

    match (outcome, teardown) {
        (Ok((session, transport_exit)), Ok(())) => Ok(RunSummary {
            mirror_dir: checkout.mirror_dir().to_path_buf(),
            cloned,
            relay: session,
            transport_exit,
        }),
        (Ok(_), Err(stop_err)) => Err(stop_err.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(stop_err)) => {
            warn!("relay shutdown failed after an earlier error: {stop_err}");
            Err(e)
        }
    }
}

async fn sync_through_relay(
    checkout: &HgCheckout,
    relay: &mut RelayHandle,
    config: &BridgeConfig,
) -> Result<(RelaySession, i32)> {
    let poll = Duration::from_millis(config.relay.ready_poll_ms.max(1));
    let session = relay.wait_ready(poll).await?;
    debug!("relay ready at {}", session.repo_url);

    // Always pull and always push: which way git is going is only visible
    // inside the remote-helper stream we do not parse.
    checkout.pull().await?;
    let transport_exit = run_transport(&config.transport, &session.repo_url).await?;
    checkout.push().await?;

    Ok((session, transport_exit))
}

/// Run the git-side transport helper against the relay and wait for it.
///
/// The helper inherits stdin/stdout, taking over the remote-helper
/// conversation with git. Ctrl-C stops the wait and kills the helper.
async fn run_transport(settings: &TransportSettings, repo_url: &str) -> Result<i32> {
    let Some((program, args)) = settings.command.split_first() else {
        return Err(OrchestratorError::EmptyTransport);
    };
    let command = format!("{} {repo_url}", settings.command.join(" "));
    debug!("running {command}");

    let mut child = Command::new(program)
        .args(args)
        .arg(repo_url)
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| OrchestratorError::TransportSpawn {
            command: command.clone(),
            source,
        })?;

    let status = tokio::select! {
        status = child.wait() => status.map_err(|source| OrchestratorError::TransportSpawn {
            command: command.clone(),
            source,
        })?,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("interrupted while waiting for {command}");
            let _ = child.kill().await;
            return Err(OrchestratorError::Interrupted);
        }
    };

    match status.code() {
        Some(code) if settings.allowed_exit_codes.contains(&code) => {
            debug!("{command} exited with {code}");
            Ok(code)
        }
        Some(code) => Err(OrchestratorError::Transport { command, code }),
        None => Err(OrchestratorError::TransportKilled { command }),
    }
}
