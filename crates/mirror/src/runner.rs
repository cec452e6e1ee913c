use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::{MirrorError, Result};

/// Runs the mercurial client on behalf of a mirror.
///
/// Stdout of this process carries the git remote-helper protocol, so hg's
/// output is never inherited: both of its streams are read line by line and
/// echoed to stderr as `hg: <line>`.
#[derive(Debug, Clone)]
pub struct HgRunner {
    program: OsString,
    echo: bool,
}

impl HgRunner {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            echo: true,
        }
    }

    /// Stop echoing hg output to stderr (it is still traced at debug level).
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// Start building an hg invocation.
    pub fn command<I, S>(&self, args: I) -> HgCommand<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        HgCommand {
            runner: self,
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            quiet: false,
            accepted: Vec::new(),
        }
    }
}

/// A single hg invocation. Exit code 0 is always success; other codes only
/// when listed with [`HgCommand::accept_exit`].
#[derive(Debug)]
pub struct HgCommand<'r> {
    runner: &'r HgRunner,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    quiet: bool,
    accepted: Vec<i32>,
}

impl HgCommand<'_> {
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Suppress the stderr echo for this invocation only.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn accept_exit(mut self, code: i32) -> Self {
        self.accepted.push(code);
        self
    }

    /// `hg arg1 arg2 ...` as shown in logs and errors.
    pub fn display(&self) -> String {
        let mut rendered = self.runner.program.to_string_lossy().into_owned();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        rendered
    }

    /// Run to completion, streaming output. Returns the exit code.
    pub async fn run(self) -> Result<i32> {
        let rendered = self.display();
        debug!("running {rendered}");

        let mut cmd = Command::new(&self.runner.program);
        // GIT_DIR points at the user's repository, not the hg-git sidecar.
        cmd.args(&self.args)
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| MirrorError::Spawn {
            command: rendered.clone(),
            source,
        })?;

        let echo = self.runner.echo && !self.quiet;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (out, err) = tokio::join!(relay_lines(stdout, echo), relay_lines(stderr, echo));
        out?;
        err?;

        let status = child.wait().await?;
        match status.code() {
            Some(0) => Ok(0),
            Some(code) if self.accepted.contains(&code) => {
                debug!("{rendered} exited with accepted code {code}");
                Ok(code)
            }
            code => Err(MirrorError::CommandFailed {
                command: rendered,
                code,
            }),
        }
    }
}

async fn relay_lines<R>(stream: Option<R>, echo: bool) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return Ok(());
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!(target: "hg", "{line}");
        if echo {
            eprintln!("hg: {line}");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::write_script;

    #[tokio::test]
    async fn zero_exit_is_success() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "ok", "echo fine\necho also >&2\nexit 0\n");
        let code = HgRunner::new(&script)
            .with_echo(false)
            .command(["status"])
            .run()
            .await
            .expect("run");
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn non_zero_exit_is_fatal_and_named() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "fail", "echo 'abort: no repo' >&2\nexit 255\n");
        let err = HgRunner::new(&script)
            .with_echo(false)
            .command(["pull"])
            .run()
            .await
            .expect_err("must fail");
        match err {
            MirrorError::CommandFailed { command, code } => {
                assert!(command.ends_with("fail pull"), "{command}");
                assert_eq!(code, Some(255));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn accepted_exit_code_passes_through() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "nothing", "echo 'no changes found'\nexit 1\n");
        let code = HgRunner::new(&script)
            .with_echo(false)
            .command(["push"])
            .accept_exit(1)
            .run()
            .await
            .expect("exit 1 accepted");
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = HgRunner::new(tmp.path().join("no-such-hg"))
            .command(["version"])
            .run()
            .await
            .expect_err("must fail");
        assert!(matches!(err, MirrorError::Spawn { .. }), "{err}");
    }

    #[tokio::test]
    async fn runs_in_requested_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let script = write_script(tmp.path(), "touch", "touch ran-here\n");
        HgRunner::new(&script)
            .with_echo(false)
            .command(Vec::<String>::new())
            .current_dir(&work)
            .run()
            .await
            .expect("run");
        assert!(work.join("ran-here").exists());
    }

    #[test]
    fn display_renders_program_and_args() {
        let runner = HgRunner::new("hg");
        let cmd = runner
            .command(["bookmark", "-f", "-r", "default"])
            .arg("master");
        assert_eq!(cmd.display(), "hg bookmark -f -r default master");
    }
}
