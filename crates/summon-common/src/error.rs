use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerErrorKind {
    /// Zero running instances match the identity. The only recoverable kind.
    NoServerAvailable,
    OpenSessionFailed,
    LaunchFailed,
    Other,
}

impl std::fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerErrorKind::NoServerAvailable => write!(f, "no server available"),
            ServerErrorKind::OpenSessionFailed => write!(f, "open session failed"),
            ServerErrorKind::LaunchFailed => write!(f, "launch failed"),
            ServerErrorKind::Other => write!(f, "server error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct ServerError {
    pub kind: ServerErrorKind,
    pub detail: String,
}

impl ServerError {
    pub fn new(kind: ServerErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn no_server_available(detail: impl Into<String>) -> Self {
        Self::new(ServerErrorKind::NoServerAvailable, detail)
    }

    pub fn open_session_failed(detail: impl Into<String>) -> Self {
        Self::new(ServerErrorKind::OpenSessionFailed, detail)
    }

    pub fn launch_failed(detail: impl Into<String>) -> Self {
        Self::new(ServerErrorKind::LaunchFailed, detail)
    }

    pub fn other(detail: impl Into<String>) -> Self {
        Self::new(ServerErrorKind::Other, detail)
    }

    pub fn is_no_server_available(&self) -> bool {
        self.kind == ServerErrorKind::NoServerAvailable
    }

    /// Re-tag as `kind`, keeping the detail. Used where every failure of an
    /// operation collapses into one kind (e.g. all launch-path errors).
    pub fn into_kind(self, kind: ServerErrorKind) -> Self {
        Self { kind, ..self }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("cannot read input {}: {source}", .path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session {0} is already released")]
    SessionReleased(String),
    #[error("remote inference failed: {0}")]
    Remote(#[from] ServerError),
}

impl InvocationError {
    pub fn is_no_server_available(&self) -> bool {
        matches!(self, InvocationError::Remote(e) if e.is_no_server_available())
    }
}

/// Teardown of a bound session failed. Reported next to, never instead of,
/// the primary outcome.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to close session {session_id}: {source}")]
pub struct ReleaseError {
    pub session_id: String,
    #[source]
    pub source: ServerError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_helpers() {
        let e = ServerError::no_server_available("0 instances");
        assert!(e.is_no_server_available());
        assert_eq!(e.to_string(), "no server available: 0 instances");

        let relabeled = e.into_kind(ServerErrorKind::LaunchFailed);
        assert_eq!(relabeled.kind, ServerErrorKind::LaunchFailed);
        assert_eq!(relabeled.detail, "0 instances");
    }

    #[test]
    fn test_invocation_error_classification() {
        let remote = InvocationError::from(ServerError::no_server_available("scaled in"));
        assert!(remote.is_no_server_available());

        let io = InvocationError::Input {
            path: PathBuf::from("missing.jpg"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(!io.is_no_server_available());
        assert!(io.to_string().starts_with("cannot read input missing.jpg"));
    }
}
