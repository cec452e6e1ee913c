use std::path::Path;

/// Initialize a minimal git repository for testing.
///
/// Creates a repo with an initial commit on `main` so that HEAD exists.
pub fn init_test_repo(dir: &Path) {
    run_git(dir, &["init", "--initial-branch=main"]);
    run_git(dir, &["config", "user.email", "test@test.com"]);
    run_git(dir, &["config", "user.name", "Test"]);

    std::fs::write(dir.join("README"), "test repo").unwrap();
    run_git(dir, &["add", "."]);
    run_git(dir, &["commit", "-m", "init"]);
}

/// Bare clone of `src` at `dst`, shaped like an hg-git sidecar.
pub fn clone_bare(src: &Path, dst: &Path) {
    let status = std::process::Command::new("git")
        .arg("clone")
        .arg("--quiet")
        .arg("--bare")
        .arg(src)
        .arg(dst)
        .status()
        .expect("git clone --bare failed");
    assert!(status.success(), "git clone --bare exited with {status}");
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("git {} failed: {e}", args.join(" ")));
    assert!(
        output.status.success(),
        "git {} failed\nstderr: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
}
