//! The hidden mercurial mirror behind every `hg::` remote.
//!
//! Each remote URL gets a full `hg` clone under
//! `<git-dir>/hgremotes/<percent-encoded-url>/`, with hg-git maintaining a
//! bare git repository (the sidecar) at `.hg/git` inside it. [`HgCheckout`]
//! creates the mirror on first use and moves changes between the remote,
//! the mirror, and the sidecar.

pub mod checkout;
pub mod error;
pub mod path;
pub mod runner;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use checkout::HgCheckout;
pub use error::{MirrorError, Result};
pub use path::{mirror_dir, mirror_dir_name, sidecar_dir};
pub use runner::HgRunner;

/// Marker file written at the mirror root.
pub const README_FILE: &str = "README.txt";
