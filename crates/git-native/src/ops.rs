use std::path::Path;

use gix::Repository;

use crate::error::{GitNativeError, Result};

/// Wrap any gix-compatible error into [`GitNativeError::Gix`].
pub fn gix_err(e: impl std::error::Error + Send + Sync + 'static) -> GitNativeError {
    GitNativeError::Gix(Box::new(e))
}

/// Open a git repository at `repo_path`, bare or not.
///
/// Returns [`GitNativeError::NotARepo`] when neither `.git` nor a bare
/// `HEAD` is present.
pub fn open_repo(repo_path: &Path) -> Result<Repository> {
    let repo = gix::open(repo_path).map_err(|e| {
        if repo_path.join(".git").exists() || repo_path.join("HEAD").is_file() {
            gix_err(e)
        } else {
            GitNativeError::NotARepo(repo_path.to_path_buf())
        }
    })?;
    Ok(repo)
}

/// Find the tip commit of a ref, returning `None` if the ref doesn't exist.
pub fn find_ref_tip<'r>(repo: &'r Repository, ref_name: &str) -> Result<Option<gix::Id<'r>>> {
    match repo.try_find_reference(ref_name).map_err(gix_err)? {
        Some(reference) => {
            let id = reference.into_fully_peeled_id().map_err(gix_err)?;
            Ok(Some(id))
        }
        None => Ok(None),
    }
}

/// Hex id of `refs/heads/<branch>` in the repository at `repo_dir`.
///
/// The hg-git sidecar is a bare repository; after every export the bridge
/// checks that the tracking bookmark surfaced as a branch here.
pub fn branch_tip(repo_dir: &Path, branch: &str) -> Result<Option<String>> {
    let repo = open_repo(repo_dir)?;
    let tip = find_ref_tip(&repo, &format!("refs/heads/{branch}"))?;
    Ok(tip.map(|id| id.to_string()))
}
