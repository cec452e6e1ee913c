//! `git-remote-hg`: use mercurial repositories as git remotes.
//!
//! Git runs `git-remote-hg <remote> <url>` for any `hg::<url>` remote. We keep
//! a hidden hg mirror of `<url>` whose hg-git sidecar is served over a local
//! HTTP relay, and let git's own `remote-http` helper talk to that relay.
//! Each run pulls from the remote first and pushes back afterwards, so the
//! helper does not need to understand which direction git asked for.

pub mod invocation;
pub mod orchestrator;

pub use invocation::{Invocation, InvocationError};
pub use orchestrator::{OrchestratorError, RunSummary};

/// Environment variable holding the tracing filter for the binary.
pub const LOG_ENV: &str = "GIT_REMOTE_HG_LOG";
