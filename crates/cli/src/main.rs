use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use git_remote_hg::{Invocation, LOG_ENV, OrchestratorError, orchestrator};

/// Git invokes this as `git-remote-hg <remote> [<url>]` for `hg::` remotes.
/// Stdin and stdout belong to git's remote-helper protocol; diagnostics go to
/// stderr.
#[derive(Parser)]
#[command(
    name = "git-remote-hg",
    version,
    about = "Access mercurial repositories as git remotes"
)]
struct Cli {
    /// Name of the remote, or the URL when git passes only one argument
    remote: String,

    /// Mercurial URL, with or without the `hg::` prefix
    url: Option<String>,

    /// Git metadata directory (defaults to $GIT_DIR, then discovery)
    #[arg(long)]
    git_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<OrchestratorError>()
            .map_or(1, OrchestratorError::exit_code);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let git_dir = hgremote_git_native::resolve_git_dir(cli.git_dir.as_deref())
        .context("failed to locate the git repository")?;
    let config = hgremote_runtime_config::load_config(&git_dir)
        .context("failed to load git-remote-hg configuration")?;
    let invocation = Invocation::new(git_dir, &cli.remote, cli.url.as_deref())?;

    let summary = orchestrator::run(&invocation, &config).await?;
    tracing::info!(
        "synchronized {} through {}",
        summary.mirror_dir.display(),
        summary.relay.repo_url
    );
    Ok(())
}
