#![cfg(unix)]

use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use hgremote_mirror::testing::{FakeHg, bookmarks, write_script};

struct Workspace {
    tmp: tempfile::TempDir,
    hg: FakeHg,
}

impl Workspace {
    /// A git dir plus a config pointing the helper at fake `hg` and a fake
    /// transport that exits with `transport_exit`.
    fn new(transport_exit: i32) -> Self {
        Self::with_transport(&format!("exit {transport_exit}\n"))
    }

    /// Like [`Workspace::new`], with `tail` run by the fake transport after
    /// it has recorded the relay URL.
    fn with_transport(tail: &str) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let hg = FakeHg::install();
        fs::create_dir_all(tmp.path().join("repo").join(".git")).expect("git dir");

        let transport = write_script(
            tmp.path(),
            "transport",
            &format!(
                "printf '%s\\n' \"$1\" > '{}'\n{tail}",
                tmp.path().join("transport.url").display()
            ),
        );
        let ws = Self { tmp, hg };
        ws.write_config(&format!("[\"{}\"]", transport.display()));
        ws
    }

    fn write_config(&self, transport_command: &str) {
        let config = format!(
            "[mirror]\nhg_command = \"{}\"\necho_output = false\n\n\
             [relay]\nbase_port = 0\nready_poll_ms = 5\n\n\
             [transport]\ncommand = {transport_command}\n",
            self.hg.program.display(),
        );
        fs::write(self.tmp.path().join("config.toml"), config).expect("write config");
    }

    fn git_dir(&self) -> PathBuf {
        self.tmp.path().join("repo").join(".git")
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_git-remote-hg"));
        cmd.args(args)
            .current_dir(self.tmp.path())
            .env("HOME", self.tmp.path())
            .env("GIT_DIR", self.git_dir())
            .env("GIT_REMOTE_HG_CONFIG", self.tmp.path().join("config.toml"))
            .env_remove("GIT_REMOTE_HG_HG")
            .env_remove("GIT_REMOTE_HG_BASE_PORT");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("run git-remote-hg")
    }

    /// Relay URL handed to the transport, once it has started.
    fn transport_url(&self) -> Option<String> {
        fs::read_to_string(self.tmp.path().join("transport.url"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn mirror_dirs(&self) -> Vec<PathBuf> {
        match fs::read_dir(self.git_dir().join("hgremotes")) {
            Ok(entries) => entries.map(|e| e.expect("entry").path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "git-remote-hg failed\nstderr: {}",
        stderr(output)
    );
}

#[test]
fn remote_and_url_sync_into_hidden_mirror() {
    let ws = Workspace::new(0);

    let output = ws.run(&["origin", "hg::/srv/hg/project"]);
    assert_success(&output);
    assert!(output.stdout.is_empty(), "stdout belongs to git");

    let mirrors = ws.mirror_dirs();
    assert_eq!(mirrors.len(), 1);
    let mirror = &mirrors[0];
    assert_eq!(
        mirror.file_name().unwrap().to_string_lossy(),
        "%2Fsrv%2Fhg%2Fproject"
    );
    assert!(mirror.join("README.txt").is_file());
    assert_eq!(bookmarks(mirror), vec!["master"]);
    assert_eq!(ws.hg.count("push"), 1);

    let url = ws.transport_url().expect("transport ran");
    assert!(url.starts_with("http://localhost:"), "{url}");
}

#[test]
fn single_argument_is_treated_as_url() {
    let ws = Workspace::new(0);

    assert_success(&ws.run(&["hg::/srv/hg/project"]));

    let mirrors = ws.mirror_dirs();
    assert_eq!(mirrors.len(), 1);
    assert!(
        ws.hg
            .invocations()
            .iter()
            .any(|line| line.starts_with("clone /srv/hg/project ")),
        "{:?}",
        ws.hg.invocations()
    );
}

#[test]
fn git_dir_flag_overrides_environment() {
    let ws = Workspace::new(0);
    let other = ws.tmp.path().join("other").join(".git");
    fs::create_dir_all(&other).unwrap();

    let output = ws.run(&[
        "--git-dir",
        other.to_str().unwrap(),
        "origin",
        "/srv/hg/project",
    ]);
    assert_success(&output);

    assert!(ws.mirror_dirs().is_empty());
    assert!(other.join("hgremotes").is_dir());
}

#[test]
fn failing_transport_exits_nonzero() {
    let ws = Workspace::new(9);

    let output = ws.run(&["origin", "/srv/hg/project"]);

    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("Error:"), "{err}");
    assert!(err.contains("error code 9"), "{err}");
    assert_eq!(ws.hg.count("push"), 0);
}

#[test]
fn ctrl_c_during_transport_exits_130_and_frees_relay() {
    let ws = Workspace::with_transport("exec sleep 30\n");

    let mut child = ws
        .command(&["origin", "/srv/hg/project"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn git-remote-hg");

    let deadline = Instant::now() + Duration::from_secs(20);
    let url = loop {
        if let Some(url) = ws.transport_url() {
            break url;
        }
        assert!(Instant::now() < deadline, "transport never started");
        std::thread::sleep(Duration::from_millis(20));
    };

    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .expect("run kill");
    assert!(status.success());

    let output = child.wait_with_output().expect("wait for git-remote-hg");
    assert_eq!(output.status.code(), Some(130), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("interrupted"));
    assert_eq!(ws.hg.count("push"), 0);

    let port: u16 = url
        .strip_prefix("http://localhost:")
        .and_then(|rest| rest.split('/').next())
        .and_then(|p| p.parse().ok())
        .unwrap_or_else(|| panic!("unexpected relay url {url}"));
    assert!(
        std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok(),
        "relay still listening on {port}"
    );
}

#[test]
fn empty_transport_command_is_reported() {
    let ws = Workspace::new(0);
    ws.write_config("[]");

    let output = ws.run(&["origin", "/srv/hg/project"]);

    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("transport helper command is empty"), "{err}");
    assert!(ws.transport_url().is_none());
    assert_eq!(ws.hg.count("push"), 0);
}

#[test]
fn missing_url_is_an_error() {
    let ws = Workspace::new(0);

    let output = ws.run(&["origin", "hg::"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("no mercurial URL given"));
    assert!(ws.mirror_dirs().is_empty());
}

#[test]
fn help_lists_arguments() {
    let output = Command::new(env!("CARGO_BIN_EXE_git-remote-hg"))
        .arg("--help")
        .output()
        .expect("run --help");
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("--git-dir"), "{text}");
    assert!(text.contains("<REMOTE>"), "{text}");
}
