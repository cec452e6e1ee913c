//! Stand-ins for the mercurial client, shared with downstream test suites.
//!
//! [`FakeHg`] installs a shell script that behaves like `hg` with hg-git just
//! enough for the mirror lifecycle: `clone` creates `.hg/`, `bookmark` records
//! the bookmark in `.hg/bookmarks`, `gexport` creates the bare sidecar, and
//! `push` reports "no changes found" with exit code 1 as real hg does. Every
//! invocation is appended to a log file.

use std::path::{Path, PathBuf};

/// Write an executable `#!/bin/sh` script named `name` into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("stat script").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");
    path
}

/// A fake `hg` binary and the log of its invocations.
pub struct FakeHg {
    pub program: PathBuf,
    pub log: PathBuf,
    _dir: tempfile::TempDir,
}

impl FakeHg {
    /// Install a well-behaved fake hg.
    #[cfg(unix)]
    pub fn install() -> Self {
        Self::install_with(None)
    }

    /// Install a fake hg whose `subcommand` aborts with exit code 255.
    #[cfg(unix)]
    pub fn install_failing(subcommand: &str) -> Self {
        Self::install_with(Some(subcommand))
    }

    #[cfg(unix)]
    fn install_with(failing: Option<&str>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("hg.log");
        let failure_arm = match failing {
            Some(sub) => format!("  {sub})\n    echo \"abort: {sub} failed\" >&2\n    exit 255\n    ;;\n"),
            None => String::new(),
        };
        let body = format!(
            r#"printf '%s\n' "$*" >> '{log}'
case "$1" in
{failure_arm}  clone)
    mkdir -p "$3/.hg" || exit 1
    echo "requesting all changes"
    ;;
  bookmark)
    for name in "$@"; do :; done
    echo "0123456789abcdef0123456789abcdef01234567 $name" > .hg/bookmarks
    ;;
  gexport)
    if [ ! -d .hg/git ]; then
      git init --quiet --bare .hg/git || exit 1
    fi
    ;;
  push)
    echo "no changes found"
    exit 1
    ;;
esac
exit 0
"#,
            log = log.display(),
        );
        let program = write_script(dir.path(), "hg", &body);
        Self {
            program,
            log,
            _dir: dir,
        }
    }

    /// Each invocation's argument list, in order.
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Invocations whose first argument is `subcommand`.
    pub fn count(&self, subcommand: &str) -> usize {
        self.invocations()
            .iter()
            .filter(|line| line.split_whitespace().next() == Some(subcommand))
            .count()
    }
}

/// Read the bookmark names recorded in a mirror's `.hg/bookmarks`.
pub fn bookmarks(mirror_dir: &Path) -> Vec<String> {
    std::fs::read_to_string(mirror_dir.join(".hg").join("bookmarks"))
        .unwrap_or_default()
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1).map(str::to_string))
        .collect()
}
