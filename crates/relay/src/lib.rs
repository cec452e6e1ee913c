//! Local smart-HTTP relay for the hg-git sidecar.
//!
//! `git remote-http` only speaks HTTP, while the sidecar is a plain bare
//! repository on disk. [`RelayServer`] listens on a loopback port and hands
//! every request to a fresh `git http-backend` process (see [`cgi`]),
//! replying with whatever the backend printed.

pub mod cgi;
pub mod error;

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method, Uri, Version},
    response::Response,
};
use hgremote_runtime_config::RelaySettings;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::cgi::{BackendConfig, CgiRequest};
pub use crate::error::{RelayErr, RelayError, Result};

/// Address details of a running relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySession {
    pub port: u16,
    /// `http://localhost:<port>/`
    pub base_url: String,
    /// `base_url` followed by the served repository's directory name.
    pub repo_url: String,
}

impl RelaySession {
    pub fn new(port: u16, project_name: &str) -> Self {
        let base_url = format!("http://localhost:{port}/");
        let repo_url = format!("{base_url}{project_name}");
        Self {
            port,
            base_url,
            repo_url,
        }
    }
}

/// Serves one bare repository over smart HTTP via `git http-backend`.
#[derive(Debug, Clone)]
pub struct RelayServer {
    repo_dir: PathBuf,
    settings: RelaySettings,
}

impl RelayServer {
    pub fn new(repo_dir: impl Into<PathBuf>, settings: RelaySettings) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            settings,
        }
    }

    /// Name the repository is served under (its directory name).
    pub fn project_name(&self) -> String {
        project_name(&self.repo_dir)
    }

    /// Spawn the listener task and return immediately.
    ///
    /// The session becomes available through [`RelayHandle::session`] once a
    /// port is bound.
    pub fn start(self) -> RelayHandle {
        let published = Arc::new(OnceLock::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(serve(self, Arc::clone(&published), shutdown_rx));
        RelayHandle {
            session: published,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

fn project_name(repo_dir: &Path) -> String {
    repo_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "git".to_string())
}

/// Owner's handle on a running relay.
///
/// Dropping the handle signals shutdown but cannot wait for it; call
/// [`RelayHandle::stop`] to also join the listener task.
pub struct RelayHandle {
    session: Arc<OnceLock<RelaySession>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl RelayHandle {
    pub fn session(&self) -> Option<&RelaySession> {
        self.session.get()
    }

    /// Poll every `poll` until the relay is bound.
    ///
    /// Fails with the listener's own error if it exits first (for example
    /// when no port in range is free).
    pub async fn wait_ready(&mut self, poll: Duration) -> Result<RelaySession> {
        loop {
            if let Some(session) = self.session.get() {
                return Ok(session.clone());
            }
            match self.task.take() {
                Some(task) if task.is_finished() => {
                    task.await??;
                    return Err(RelayError::ListenerExited);
                }
                Some(task) => self.task = Some(task),
                None => return Err(RelayError::ListenerExited),
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Whether the listener task has been joined.
    pub fn is_stopped(&self) -> bool {
        self.task.is_none()
    }

    /// Shut the listener down and wait for its task to finish. Idempotent.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await??;
            debug!("relay task joined");
        }
        Ok(())
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Listeners for one port on every loopback address `localhost` may
/// resolve to.
#[derive(Debug)]
pub struct LoopbackListeners {
    pub v4: TcpListener,
    /// `None` when the host has no IPv6 loopback.
    pub v6: Option<TcpListener>,
}

impl LoopbackListeners {
    pub fn port(&self) -> std::io::Result<u16> {
        Ok(self.v4.local_addr()?.port())
    }
}

/// Bind the first loopback port at or above `base` that is free on both
/// `127.0.0.1` and `[::1]`.
///
/// Port 0 lets the OS choose; every attempt then asks for a fresh port.
pub async fn bind_first_free(base: u16, attempts: u32) -> Result<LoopbackListeners> {
    let mut port = base;
    let mut remaining = attempts.max(1);
    loop {
        match bind_loopback(port).await {
            Ok(listeners) => return Ok(listeners),
            Err(e) => debug!("port {port} unavailable: {e}"),
        }
        remaining -= 1;
        if remaining == 0 {
            break;
        }
        if base != 0 {
            match port.checked_add(1) {
                Some(next) => port = next,
                None => break,
            }
        }
    }
    Err(RelayError::NoFreePort {
        first: base,
        last: port,
    })
}

async fn bind_loopback(port: u16) -> std::io::Result<LoopbackListeners> {
    let v4 = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
    let port = v4.local_addr()?.port();
    let v6 = match TcpListener::bind((Ipv6Addr::LOCALHOST, port)).await {
        Ok(listener) => Some(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => return Err(e),
        Err(e) => {
            debug!("serving IPv4 loopback only: {e}");
            None
        }
    };
    Ok(LoopbackListeners { v4, v6 })
}

struct RelayState {
    backend: BackendConfig,
}

async fn serve(
    server: RelayServer,
    published: Arc<OnceLock<RelaySession>>,
    shutdown: oneshot::Receiver<()>,
) -> Result<()> {
    let listeners =
        bind_first_free(server.settings.base_port, server.settings.max_port_attempts).await?;
    let port = listeners.port()?;

    let repo_dir = std::path::absolute(&server.repo_dir)?;
    let project_root = repo_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| repo_dir.clone());
    let session = RelaySession::new(port, &project_name(&repo_dir));

    let state = Arc::new(RelayState {
        backend: BackendConfig {
            git_command: server.settings.git_command.clone().into(),
            project_root,
            repo_dir,
            remote_user: server.settings.remote_user.clone(),
            server_port: port,
        },
    });

    info!("relay serving {} at {}", state.backend.repo_dir.display(), session.repo_url);
    let _ = published.set(session);

    let LoopbackListeners { v4, v6 } = listeners;
    let app = router(state);
    let (stop_tx, stop_rx) = watch::channel(false);
    let trigger = async move {
        let _ = shutdown.await;
        let _ = stop_tx.send(true);
        Ok::<(), std::io::Error>(())
    };
    let serve_v4 = {
        let app = app.clone();
        let stop = stop_rx.clone();
        async move {
            axum::serve(v4, app)
                .with_graceful_shutdown(stopped(stop))
                .await
        }
    };
    let serve_v6 = async move {
        match v6 {
            Some(listener) => {
                axum::serve(listener, app)
                    .with_graceful_shutdown(stopped(stop_rx))
                    .await
            }
            None => Ok(()),
        }
    };
    tokio::try_join!(trigger, serve_v4, serve_v6)?;

    debug!("relay listener on port {port} closed");
    Ok(())
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .fallback(relay_request)
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn relay_request(
    State(state): State<Arc<RelayState>>,
    method: Method,
    version: Version,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, RelayErr> {
    let env = cgi::request_env(
        &state.backend,
        CgiRequest {
            method: &method,
            version,
            uri: &uri,
            headers: &headers,
            content_length: body.len(),
        },
    );

    let output = cgi::run_backend(&state.backend, env, body)
        .await
        .map_err(RelayErr::from_backend("failed to run git http-backend"))?;
    if !output.status.success() {
        warn!("git http-backend exited with {} for {method} {uri}", output.status);
    }

    let parsed = cgi::parse_cgi_response(output.stdout);
    let mut response = Response::new(Body::from(parsed.body));
    for (name, value) in parsed.headers {
        response.headers_mut().append(name, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_urls_point_at_repository() {
        let session = RelaySession::new(8091, "git");
        assert_eq!(session.base_url, "http://localhost:8091/");
        assert_eq!(session.repo_url, "http://localhost:8091/git");
    }

    #[test]
    fn project_name_is_directory_name() {
        let server = RelayServer::new("/work/.git/hgremotes/x/.hg/git", RelaySettings::default());
        assert_eq!(server.project_name(), "git");
        assert_eq!(project_name(Path::new("/")), "git");
    }

    #[tokio::test]
    async fn bind_skips_an_occupied_port() {
        let blocker = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let taken = blocker.local_addr().unwrap().port();

        let listeners = bind_first_free(taken, 50).await.expect("free port");
        let port = listeners.port().unwrap();
        assert!(port > taken, "expected a port above {taken}, got {port}");
    }

    #[tokio::test]
    async fn bind_skips_a_port_taken_on_ipv6_loopback() {
        let Ok(blocker) = std::net::TcpListener::bind((Ipv6Addr::LOCALHOST, 0)) else {
            eprintln!("no IPv6 loopback on this host; skipping");
            return;
        };
        let taken = blocker.local_addr().unwrap().port();

        let listeners = bind_first_free(taken, 50).await.expect("free port");
        let port = listeners.port().unwrap();
        assert_ne!(port, taken, "[::1]:{taken} belongs to another listener");
        assert!(port > taken);
        let v6 = listeners.v6.as_ref().expect("IPv6 loopback is available");
        assert_eq!(v6.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn os_chosen_port_is_bound_on_both_loopbacks() {
        let listeners = bind_first_free(0, 5).await.expect("free port");
        let port = listeners.port().unwrap();
        assert_ne!(port, 0);
        if let Some(v6) = &listeners.v6 {
            assert_eq!(v6.local_addr().unwrap().port(), port);
        }
    }

    #[tokio::test]
    async fn bind_gives_up_after_attempts() {
        let blocker = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let taken = blocker.local_addr().unwrap().port();

        let err = bind_first_free(taken, 1).await.expect_err("single attempt");
        assert!(matches!(
            err,
            RelayError::NoFreePort { first, last } if first == taken && last == taken
        ));
    }
}
