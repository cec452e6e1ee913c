use std::path::{Path, PathBuf};

use hgremote_runtime_config::MirrorSettings;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::README_FILE;
use crate::error::{MirrorError, Result};
use crate::path::{mirror_dir, sidecar_dir};
use crate::runner::HgRunner;

const README_BODY: &str = "\
This is a bare mercurial checkout created by git-remote-hg.
It mirrors a remote hg repository for the enclosing git repository.
Do not edit it by hand.
";

const HGRC_EXTENSIONS: &str = "
[extensions]
hgext.bookmarks =
hggit =
";

/// `hg push` exits 1 when there is nothing outgoing.
const HG_PUSH_NOTHING_TO_PUSH: i32 = 1;

/// A local hg clone of one remote, paired with its hg-git sidecar.
#[derive(Debug, Clone)]
pub struct HgCheckout {
    url: String,
    dir: PathBuf,
    settings: MirrorSettings,
    hg: HgRunner,
}

impl HgCheckout {
    /// Describe the mirror of `url` under `git_dir` without touching disk.
    pub fn new(git_dir: &Path, url: &str, settings: MirrorSettings) -> Self {
        let dir = mirror_dir(git_dir, &settings.remotes_dir, url);
        let hg = HgRunner::new(&settings.hg_command).with_echo(settings.echo_output);
        Self {
            url: url.to_string(),
            dir,
            settings,
            hg,
        }
    }

    /// Describe the mirror and create it if it does not exist yet.
    pub async fn open(git_dir: &Path, url: &str, settings: MirrorSettings) -> Result<Self> {
        let checkout = Self::new(git_dir, url, settings);
        checkout.ensure_initialized().await?;
        Ok(checkout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn mirror_dir(&self) -> &Path {
        &self.dir
    }

    pub fn sidecar_dir(&self) -> PathBuf {
        sidecar_dir(&self.dir)
    }

    /// Whether setup ran to completion. The README marker is written last.
    pub fn is_initialized(&self) -> bool {
        self.dir.join(README_FILE).is_file()
    }

    /// Clone the remote into the mirror directory unless it is already set up.
    ///
    /// Returns `true` when a clone happened. The fresh mirror has no working
    /// copy, carries the hg-git extension config, has the tracking bookmark
    /// on the primary branch, and an exported sidecar. A directory left by an
    /// interrupted setup (no marker) is removed and cloned again.
    pub async fn ensure_initialized(&self) -> Result<bool> {
        if self.is_initialized() {
            debug!("mirror already present at {}", self.dir.display());
            return Ok(false);
        }

        if tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            warn!(
                "removing incomplete mirror at {} left by an earlier run",
                self.dir.display()
            );
            tokio::fs::remove_dir_all(&self.dir)
                .await
                .map_err(|source| MirrorError::Prepare {
                    path: self.dir.clone(),
                    source,
                })?;
        }

        info!("cloning {} into {}", self.url, self.dir.display());
        if let Some(parent) = self.dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| MirrorError::Prepare {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        self.hg
            .command(["clone"])
            .arg(&self.url)
            .arg(&self.dir)
            .run()
            .await?;
        self.hg
            .command(["update", "null"])
            .current_dir(&self.dir)
            .quiet()
            .run()
            .await?;

        self.enable_extensions().await?;

        self.hg
            .command(["bookmark", "-r"])
            .arg(&self.settings.primary_branch)
            .arg(&self.settings.tracking_bookmark)
            .current_dir(&self.dir)
            .run()
            .await?;
        self.export_sidecar().await?;
        self.write_readme().await?;
        Ok(true)
    }

    /// Bring the mirror and sidecar up to date with the remote.
    pub async fn pull(&self) -> Result<()> {
        info!("pulling {}", self.url);
        self.hg.command(["pull"]).current_dir(&self.dir).run().await?;
        self.hg
            .command(["bookmark", "-f", "-r"])
            .arg(&self.settings.primary_branch)
            .arg(&self.settings.tracking_bookmark)
            .current_dir(&self.dir)
            .run()
            .await?;
        self.export_sidecar().await
    }

    /// Import sidecar commits into the mirror and push them to the remote.
    pub async fn push(&self) -> Result<()> {
        info!("pushing to {}", self.url);
        self.hg
            .command(["gimport"])
            .current_dir(&self.dir)
            .run()
            .await?;
        let code = self
            .hg
            .command(["push"])
            .current_dir(&self.dir)
            .accept_exit(HG_PUSH_NOTHING_TO_PUSH)
            .run()
            .await?;
        if code == HG_PUSH_NOTHING_TO_PUSH {
            debug!("nothing to push to {}", self.url);
        }
        Ok(())
    }

    async fn export_sidecar(&self) -> Result<()> {
        self.hg
            .command(["gexport"])
            .current_dir(&self.dir)
            .run()
            .await?;

        let sidecar = self.sidecar_dir();
        let branch = &self.settings.tracking_bookmark;
        match hgremote_git_native::branch_tip(&sidecar, branch) {
            Ok(Some(tip)) => debug!("sidecar {branch} at {tip}"),
            Ok(None) => warn!(
                "sidecar {} has no `{branch}` branch after export",
                sidecar.display()
            ),
            Err(e) => warn!("could not inspect sidecar {}: {e}", sidecar.display()),
        }
        Ok(())
    }

    async fn write_readme(&self) -> Result<()> {
        let path = self.dir.join(README_FILE);
        tokio::fs::write(&path, README_BODY)
            .await
            .map_err(|source| MirrorError::Prepare { path, source })
    }

    async fn enable_extensions(&self) -> Result<()> {
        let path = self.dir.join(".hg").join("hgrc");
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| MirrorError::Prepare {
                path: path.clone(),
                source,
            })?;
        file.write_all(HGRC_EXTENSIONS.as_bytes())
            .await
            .map_err(|source| MirrorError::Prepare {
                path: path.clone(),
                source,
            })?;
        file.flush()
            .await
            .map_err(|source| MirrorError::Prepare { path, source })
    }
}
