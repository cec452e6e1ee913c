use std::path::PathBuf;

/// Prefix git uses to select this helper (`hg::<url>`).
const HG_URL_PREFIX: &str = "hg::";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvocationError {
    #[error("no mercurial URL given")]
    MissingUrl,
}

/// What git asked for: which remote, at which URL, for which repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Metadata directory of the git repository being served.
    pub git_dir: PathBuf,
    pub remote: String,
    /// The mercurial URL, without any `hg::` prefix.
    pub url: String,
}

impl Invocation {
    /// Git passes `<remote> <url>`; with a single argument the remote is the
    /// URL itself.
    pub fn new(git_dir: PathBuf, remote: &str, url: Option<&str>) -> Result<Self, InvocationError> {
        let url = normalize_url(url.unwrap_or(remote));
        if url.is_empty() {
            return Err(InvocationError::MissingUrl);
        }
        Ok(Self {
            git_dir,
            remote: remote.to_string(),
            url: url.to_string(),
        })
    }
}

/// Strip the `hg::` transport prefix if git left it on.
pub fn normalize_url(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed.strip_prefix(HG_URL_PREFIX).unwrap_or(trimmed)
}
