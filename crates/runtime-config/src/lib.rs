//! Runtime configuration for the hg bridge.
//!
//! `git-remote-hg` reads an optional `hgremote.toml` (see [`load_config`]) and
//! hands the typed sections to the mirror, relay, and orchestrator crates.
//! Every field has a default, so an absent file is the common case.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Config file name looked up inside the git metadata directory.
pub const CONFIG_FILE_NAME: &str = "hgremote.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "GIT_REMOTE_HG_CONFIG";

/// Environment override for [`MirrorSettings::hg_command`].
pub const HG_COMMAND_ENV: &str = "GIT_REMOTE_HG_HG";

/// Environment override for [`RelaySettings::base_port`].
pub const BASE_PORT_ENV: &str = "GIT_REMOTE_HG_BASE_PORT";

/// Top-level bridge configuration (persisted as `hgremote.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mirror: MirrorSettings,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub transport: TransportSettings,
}

/// How the hidden mercurial mirror is laid out and driven.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MirrorSettings {
    /// Mercurial client binary (must have hg-git available).
    #[serde(default = "default_hg_command")]
    pub hg_command: String,
    /// Directory under the git metadata dir that holds all mirrors.
    #[serde(default = "default_remotes_dir")]
    pub remotes_dir: String,
    /// Bookmark forced onto the primary branch so the sidecar exposes it.
    #[serde(default = "default_tracking_bookmark")]
    pub tracking_bookmark: String,
    #[serde(default = "default_primary_branch")]
    pub primary_branch: String,
    /// Echo hg output to stderr as `hg: <line>`.
    #[serde(default = "default_true")]
    pub echo_output: bool,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            hg_command: default_hg_command(),
            remotes_dir: default_remotes_dir(),
            tracking_bookmark: default_tracking_bookmark(),
            primary_branch: default_primary_branch(),
            echo_output: true,
        }
    }
}

/// Local HTTP relay in front of `git http-backend`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelaySettings {
    /// First port tried; the relay scans upward on bind conflicts.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_max_port_attempts")]
    pub max_port_attempts: u32,
    /// Git binary used to run `http-backend` for every request.
    #[serde(default = "default_git_command")]
    pub git_command: String,
    /// Value of `REMOTE_USER` handed to the backend (enables receive-pack).
    #[serde(default = "default_remote_user")]
    pub remote_user: String,
    #[serde(default = "default_ready_poll_ms")]
    pub ready_poll_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            max_port_attempts: default_max_port_attempts(),
            git_command: default_git_command(),
            remote_user: default_remote_user(),
            ready_poll_ms: default_ready_poll_ms(),
        }
    }
}

/// The git-side transport helper pointed at the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportSettings {
    /// Program and leading arguments; the relay repository URL is appended.
    #[serde(default = "default_transport_command")]
    pub command: Vec<String>,
    /// Exit codes treated as success. `git remote-http` routinely exits 1
    /// after a successful session, so both 0 and 1 are accepted by default.
    #[serde(default = "default_allowed_exit_codes")]
    pub allowed_exit_codes: Vec<i32>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            command: default_transport_command(),
            allowed_exit_codes: default_allowed_exit_codes(),
        }
    }
}

// ── Serde default functions ─────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_hg_command() -> String {
    "hg".to_string()
}
fn default_remotes_dir() -> String {
    "hgremotes".to_string()
}
fn default_tracking_bookmark() -> String {
    "master".to_string()
}
fn default_primary_branch() -> String {
    "default".to_string()
}
fn default_base_port() -> u16 {
    8091
}
fn default_max_port_attempts() -> u32 {
    100
}
fn default_git_command() -> String {
    "git".to_string()
}
fn default_remote_user() -> String {
    "git-remote-hg".to_string()
}
fn default_ready_poll_ms() -> u64 {
    100
}
fn default_transport_command() -> Vec<String> {
    vec!["git".to_string(), "remote-http".to_string()]
}
fn default_allowed_exit_codes() -> Vec<i32> {
    vec![0, 1]
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Parse a TOML document into a [`BridgeConfig`] and normalize it.
pub fn parse_config(text: &str) -> Result<BridgeConfig, toml::de::Error> {
    let mut config: BridgeConfig = toml::from_str(text)?;
    apply_fallbacks(&mut config);
    Ok(config)
}

/// Candidate config files, highest priority first.
pub fn config_candidates(git_dir: &Path, explicit: Option<PathBuf>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    candidates.extend(explicit);
    candidates.push(git_dir.join(CONFIG_FILE_NAME));
    if let Some(home) = home_dir() {
        candidates.push(
            home.join(".config")
                .join("git-remote-hg")
                .join("config.toml"),
        );
    }
    candidates
}

/// Load configuration for the repository whose metadata lives in `git_dir`.
///
/// The first existing file among [`config_candidates`] is used, then the
/// `GIT_REMOTE_HG_*` environment overrides are applied on top.
pub fn load_config(git_dir: &Path) -> Result<BridgeConfig, ConfigError> {
    let explicit = std::env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    let mut config = match config_candidates(git_dir, explicit)
        .into_iter()
        .find(|path| path.is_file())
    {
        Some(path) => read_config_file(&path)?,
        None => BridgeConfig::default(),
    };
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `GIT_REMOTE_HG_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut BridgeConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(hg) = lookup(HG_COMMAND_ENV).filter(|v| !v.trim().is_empty()) {
        config.mirror.hg_command = hg;
    }
    if let Some(raw) = lookup(BASE_PORT_ENV).filter(|v| !v.trim().is_empty()) {
        config.relay.base_port = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            var: BASE_PORT_ENV,
            value: raw.clone(),
        })?;
    }
    Ok(())
}

/// Repair values that would make the bridge unusable.
/// Returns true when any field was updated.
///
/// An explicitly empty `transport.command` is left alone; running with it
/// fails with a clear error instead of silently using `git remote-http`.
pub fn apply_fallbacks(config: &mut BridgeConfig) -> bool {
    let mut changed = false;

    if config.mirror.tracking_bookmark.trim().is_empty() {
        config.mirror.tracking_bookmark = default_tracking_bookmark();
        changed = true;
    }
    if config.mirror.primary_branch.trim().is_empty() {
        config.mirror.primary_branch = default_primary_branch();
        changed = true;
    }
    if config.relay.max_port_attempts == 0 {
        config.relay.max_port_attempts = 1;
        changed = true;
    }

    changed
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
