use std::path::{Path, PathBuf};

/// Directory name for the mirror of `url`.
///
/// Every byte outside `[A-Za-z0-9-_.~]` is percent-encoded, so the name never
/// contains a separator and distinct URLs never share a directory. The two
/// names the filesystem reserves (`.` and `..`) have their dots encoded too.
pub fn mirror_dir_name(url: &str) -> String {
    match url {
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => urlencoding::encode(url).into_owned(),
    }
}

/// `<git_dir>/<remotes_dir>/<mirror_dir_name(url)>`
pub fn mirror_dir(git_dir: &Path, remotes_dir: &str, url: &str) -> PathBuf {
    git_dir.join(remotes_dir).join(mirror_dir_name(url))
}

/// Location of the hg-git bare repository inside a mirror.
pub fn sidecar_dir(mirror_dir: &Path) -> PathBuf {
    mirror_dir.join(".hg").join("git")
}
