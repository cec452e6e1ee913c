use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Failures of the relay itself (binding, task lifecycle).
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no free port in {first}..={last}")]
    NoFreePort { first: u16, last: u16 },

    #[error("relay listener exited before it was ready")]
    ListenerExited,

    #[error("relay task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Error response for a single relayed request.
///
/// Only raised when the backend cannot be started at all; a backend that
/// runs and fails still has its output relayed with `200 OK`.
pub struct RelayErr {
    status: StatusCode,
    message: String,
}

impl RelayErr {
    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: msg.into(),
        }
    }

    /// Build a closure that logs a backend error and returns `502 Bad Gateway`.
    pub fn from_backend<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> Self + '_ {
        move |e| {
            tracing::error!("{context}: {e}");
            Self::bad_gateway(format!("{context}: {e}"))
        }
    }
}

impl IntoResponse for RelayErr {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}
