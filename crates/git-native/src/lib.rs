pub mod discover;
pub mod error;
pub mod ops;

#[cfg(test)]
pub(crate) mod test_utils;

pub use discover::{resolve_git_dir, resolve_git_dir_from};
pub use error::{GitNativeError, Result};
pub use ops::branch_tip;

/// Environment variable git sets for remote helpers.
pub const GIT_DIR_ENV: &str = "GIT_DIR";
