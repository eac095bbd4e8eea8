use std::process::{ExitCode, Termination};

use appliance_update::{Error, ErrorKind};

/// Exit codes of `appctl`. Custom exit codes are taken in accordance with the
/// Linux Standard Base Core Specification and are in the range 150-199.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    Success = 0,
    Failure = 1,
    NotEnrolled = 150,
    Unreachable = 151,
    AuthRejected = 152,
    DigestMismatch = 153,
    ProtocolError = 154,
    RolledBack = 155,
    Conflict = 156,
    Cancelled = 157,
}

impl Termination for ExitStatus {
    fn report(self) -> ExitCode {
        ExitCode::from(self as u8)
    }
}

impl From<ErrorKind> for ExitStatus {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotEnrolled => ExitStatus::NotEnrolled,
            ErrorKind::Unreachable => ExitStatus::Unreachable,
            ErrorKind::AuthRejected => ExitStatus::AuthRejected,
            ErrorKind::DigestMismatch => ExitStatus::DigestMismatch,
            ErrorKind::ProtocolError => ExitStatus::ProtocolError,
            ErrorKind::RolledBack => ExitStatus::RolledBack,
            ErrorKind::Conflict => ExitStatus::Conflict,
            ErrorKind::Cancelled => ExitStatus::Cancelled,
            ErrorKind::Local => ExitStatus::Failure,
        }
    }
}

impl From<&eyre::Report> for ExitStatus {
    fn from(err: &eyre::Report) -> Self {
        // Context added with `wrap_err` does not hide the engine error.
        err.chain()
            .find_map(|cause| cause.downcast_ref::<Error>())
            .map_or(ExitStatus::Failure, |err| err.kind().into())
    }
}

#[cfg(test)]
mod tests {
    use eyre::WrapErr as _;

    use super::*;

    #[test]
    fn engine_errors_keep_their_code_through_context() {
        let report = Err::<(), _>(Error::Conflict {
            instance: "hello".into(),
            path: "/tmp/hello/.lock".into(),
        })
        .wrap_err("failed to lock instance")
        .unwrap_err();
        assert_eq!(ExitStatus::from(&report), ExitStatus::Conflict);
    }

    #[test]
    fn other_errors_are_generic_failures() {
        let report = eyre::eyre!("something else");
        assert_eq!(ExitStatus::from(&report), ExitStatus::Failure);
    }

    #[test]
    fn cancellation_in_testboot_is_a_cancellation() {
        let report = eyre::Report::new(Error::CancelledInTestboot);
        assert_eq!(ExitStatus::from(&report), ExitStatus::Cancelled);
    }
}
