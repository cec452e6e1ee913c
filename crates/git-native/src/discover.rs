use std::path::{Path, PathBuf};

use tracing::debug;

use crate::GIT_DIR_ENV;
use crate::error::Result;

/// Locate the metadata directory of the git repository we are serving.
///
/// Order: `explicit`, then `$GIT_DIR` (git exports it to remote helpers),
/// then discovery upward from the current directory.
pub fn resolve_git_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    let env_git_dir = std::env::var_os(GIT_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    let cwd = std::env::current_dir()?;
    Ok(resolve_git_dir_from(explicit, env_git_dir, &cwd))
}

/// Same as [`resolve_git_dir`] with the environment and cwd supplied.
///
/// Relative results are anchored at `cwd`.
pub fn resolve_git_dir_from(
    explicit: Option<&Path>,
    env_git_dir: Option<PathBuf>,
    cwd: &Path,
) -> PathBuf {
    let chosen = explicit
        .map(Path::to_path_buf)
        .or(env_git_dir)
        .unwrap_or_else(|| discover_from(cwd));
    cwd.join(chosen)
}

fn discover_from(cwd: &Path) -> PathBuf {
    match gix::discover(cwd) {
        Ok(repo) => repo.git_dir().to_path_buf(),
        Err(e) => {
            debug!("no repository discovered from {}: {e}", cwd.display());
            let dot_git = cwd.join(".git");
            if dot_git.exists() {
                dot_git
            } else {
                cwd.to_path_buf()
            }
        }
    }
}
