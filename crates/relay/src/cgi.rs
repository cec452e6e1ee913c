//! Bridge between HTTP requests and `git http-backend` as a CGI program.
//!
//! One backend process per request: spawn, pipe the body in, buffer all of
//! stdout, split it into CGI headers and the raw body. Nothing is streamed,
//! which keeps the relay simple at the cost of holding each pack in memory.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Output, Stdio};

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, Version};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Everything a backend invocation needs besides the request itself.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub git_command: OsString,
    /// Directory the backend resolves `PATH_INFO` against.
    pub project_root: PathBuf,
    /// The served repository; used as the backend's working directory.
    pub repo_dir: PathBuf,
    pub remote_user: String,
    pub server_port: u16,
}

/// The parts of an inbound request that end up in the CGI environment.
#[derive(Debug, Clone, Copy)]
pub struct CgiRequest<'a> {
    pub method: &'a Method,
    pub version: Version,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub content_length: usize,
}

/// Build the CGI environment for one request.
pub fn request_env(backend: &BackendConfig, req: CgiRequest<'_>) -> Vec<(String, OsString)> {
    let mut env: Vec<(String, OsString)> = vec![
        ("GATEWAY_INTERFACE".into(), "CGI/1.1".into()),
        ("SERVER_SOFTWARE".into(), "git-remote-hg".into()),
        ("SERVER_NAME".into(), "localhost".into()),
        ("SERVER_PORT".into(), backend.server_port.to_string().into()),
        ("SERVER_PROTOCOL".into(), format!("{:?}", req.version).into()),
        ("REMOTE_ADDR".into(), "127.0.0.1".into()),
        ("REQUEST_METHOD".into(), req.method.as_str().into()),
        ("PATH_INFO".into(), req.uri.path().into()),
        ("QUERY_STRING".into(), req.uri.query().unwrap_or("").into()),
        ("GIT_PROJECT_ROOT".into(), backend.project_root.clone().into()),
        ("GIT_HTTP_EXPORT_ALL".into(), "ON".into()),
        ("REMOTE_USER".into(), backend.remote_user.clone().into()),
    ];

    if let Some(content_type) = req.headers.get(axum::http::header::CONTENT_TYPE) {
        env.push(("CONTENT_TYPE".into(), header_os_value(content_type)));
    }
    // The body is fully buffered, so its real length is known even for
    // chunked uploads.
    if req.content_length > 0 {
        env.push(("CONTENT_LENGTH".into(), req.content_length.to_string().into()));
    }

    for (name, value) in req.headers {
        if name == axum::http::header::CONTENT_TYPE || name == axum::http::header::CONTENT_LENGTH {
            continue;
        }
        let var = format!("HTTP_{}", name.as_str().to_ascii_uppercase().replace('-', "_"));
        env.push((var, header_os_value(value)));
    }

    env
}

fn header_os_value(value: &HeaderValue) -> OsString {
    String::from_utf8_lossy(value.as_bytes()).into_owned().into()
}

/// Run `git http-backend` once, feeding `body` on stdin.
///
/// The body is written concurrently with draining stdout so a backend that
/// starts answering before it has read everything cannot deadlock us.
pub async fn run_backend(
    backend: &BackendConfig,
    env: Vec<(String, OsString)>,
    body: Bytes,
) -> std::io::Result<Output> {
    let mut child = Command::new(&backend.git_command)
        .arg("http-backend")
        // The served repository comes from GIT_PROJECT_ROOT + PATH_INFO, not
        // from the repository that invoked the remote helper.
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE")
        .envs(env)
        .current_dir(&backend.repo_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;

    let stdin = child.stdin.take();
    let feed = async move {
        let Some(mut stdin) = stdin else {
            return;
        };
        if !body.is_empty() {
            if let Err(e) = stdin.write_all(&body).await {
                debug!("backend stopped reading request body: {e}");
            }
        }
    };

    let ((), output) = tokio::join!(feed, child.wait_with_output());
    output
}

/// A backend reply split into CGI headers and the raw body.
#[derive(Debug)]
pub struct CgiResponse {
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Bytes,
    /// Whether a blank line terminated the header block.
    pub terminated: bool,
}

/// Split CGI output at the first blank line.
///
/// Header lines are `name: value` with surrounding whitespace trimmed and may
/// end in `\n` or `\r\n`. Lines without a colon or with names/values HTTP
/// cannot carry are dropped. If no blank line appears, the whole output is
/// the header block and the body is empty.
pub fn parse_cgi_response(raw: Vec<u8>) -> CgiResponse {
    let mut headers = Vec::new();
    let mut pos = 0;
    let mut body_start = None;

    while pos < raw.len() {
        let (line, next) = match raw[pos..].iter().position(|b| *b == b'\n') {
            Some(i) => (&raw[pos..pos + i], pos + i + 1),
            None => (&raw[pos..], raw.len()),
        };
        if line.trim_ascii().is_empty() {
            body_start = Some(next);
            break;
        }
        match parse_header_line(line) {
            Some(header) => headers.push(header),
            None => debug!(
                "skipping malformed backend header: {:?}",
                String::from_utf8_lossy(line)
            ),
        }
        pos = next;
    }

    let terminated = body_start.is_some();
    if !terminated {
        warn!("backend output had no header terminator; relaying headers only");
    }
    let body = Bytes::from(raw).slice(body_start.unwrap_or(pos)..);
    CgiResponse {
        headers,
        body,
        terminated,
    }
}

fn parse_header_line(line: &[u8]) -> Option<(HeaderName, HeaderValue)> {
    let colon = line.iter().position(|b| *b == b':')?;
    let name = HeaderName::from_bytes(line[..colon].trim_ascii()).ok()?;
    let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii()).ok()?;
    Some((name, value))
}
