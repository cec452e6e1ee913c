use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GitNativeError {
    #[error("not a git repository: {0}")]
    NotARepo(PathBuf),

    #[error("git error: {0}")]
    Gix(Box<dyn std::error::Error + Send + Sync>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitNativeError>;
