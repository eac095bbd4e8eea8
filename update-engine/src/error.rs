use std::{path::PathBuf, time::Duration};

use appliance_update_core::{Root, mbr::LayoutError};
use reqwest::StatusCode;

/// Coarse classification of an [`Error`], used for exit codes and retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No credential or certificate was recorded for the target host.
    NotEnrolled,
    Unreachable,
    AuthRejected,
    DigestMismatch,
    ProtocolError,
    RolledBack,
    /// Another command holds the instance lock.
    Conflict,
    Cancelled,
    /// Local file system or configuration problem.
    Local,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("no credential recorded for `{host}` at `{path}`")]
    MissingCredential { host: String, path: PathBuf },
    #[error(
        "`{host}` requires TLS but no certificate was recorded at `{path}`; re-run with --insecure to trust on first use"
    )]
    MissingCertificate { host: String, path: PathBuf },
    #[error("failed sending request to `{url}`")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("device at `{url}` rejected the credential with status `{status}`")]
    AuthRejected { url: String, status: StatusCode },
    #[error(
        "digest mismatch for artifact `{artifact}`: local `{local}`, device `{remote}`"
    )]
    DigestMismatch {
        artifact: String,
        local: String,
        remote: String,
    },
    #[error("`{url}` returned unexpected status `{status}`: {body}")]
    UnexpectedStatus {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("malformed response from `{url}`: {reason}")]
    MalformedResponse { url: String, reason: String },
    #[error(
        "`{url}` redirected to `{location}`; the device enforces HTTPS, configure a TLS posture for this instance"
    )]
    HttpsRedirect { url: String, location: String },
    #[error("service `{0}` not found on device")]
    ServiceNotFound(String),
    #[error("device does not support `{0}`")]
    Unsupported(&'static str),
    #[error("device rolled back: it came back running build `{build_timestamp}`")]
    RolledBack {
        build_timestamp: String,
        /// Absent on devices that do not report their boot selector.
        active: Option<Root>,
    },
    #[error("device did not come back within {0:?}")]
    RebootTimeout(Duration),
    #[error("instance `{instance}` is in use by another command (lock `{path}`)")]
    Conflict { instance: String, path: PathBuf },
    #[error("operation cancelled")]
    Cancelled,
    #[error(
        "operation cancelled after the device was switched; it will testboot the new root and revert on the next reboot unless committed"
    )]
    CancelledInTestboot,
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration in `{path}`")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{url}` cannot be used as a server address")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed initializing HTTP client")]
    BuildClient(#[source] reqwest::Error),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("certificate error: {0}")]
    Certificate(String),
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            MissingCredential { .. } | MissingCertificate { .. } => ErrorKind::NotEnrolled,
            Transport { .. } | RebootTimeout(_) => ErrorKind::Unreachable,
            AuthRejected { .. } => ErrorKind::AuthRejected,
            DigestMismatch { .. } => ErrorKind::DigestMismatch,
            UnexpectedStatus { .. }
            | MalformedResponse { .. }
            | HttpsRedirect { .. }
            | ServiceNotFound(_)
            | Unsupported(_) => ErrorKind::ProtocolError,
            RolledBack { .. } => ErrorKind::RolledBack,
            Conflict { .. } => ErrorKind::Conflict,
            Cancelled | CancelledInTestboot => ErrorKind::Cancelled,
            Io { .. }
            | Config { .. }
            | InvalidUrl { .. }
            | BuildClient(_)
            | Layout(_)
            | Certificate(_) => ErrorKind::Local,
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Connection level failures and server errors are transient. Rejections,
    /// digest mismatches and anything local are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport { .. } => true,
            Error::UnexpectedStatus { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_server_errors_are_transient() {
        let status = |status| Error::UnexpectedStatus {
            url: "http://hello/update/root".into(),
            status,
            body: String::new(),
        };
        assert!(status(StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(!status(StatusCode::BAD_REQUEST).is_transient());
        let mismatch = Error::DigestMismatch {
            artifact: "root".into(),
            local: "00".into(),
            remote: "01".into(),
        };
        assert!(!mismatch.is_transient());
        assert_eq!(mismatch.kind(), ErrorKind::DigestMismatch);
    }

    #[test]
    fn cancellation_kinds() {
        assert_eq!(Error::CancelledInTestboot.kind(), ErrorKind::Cancelled);
        assert_eq!(
            Error::ServiceNotFound("hello".into()).kind(),
            ErrorKind::ProtocolError
        );
    }
}
