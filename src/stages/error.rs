//! Stage errors and their exit-code class.

use thiserror::Error;

use crate::config::ConfigError;
use crate::controller::ControllerError;
use crate::remote_shell::RemoteShellError;

/// Which runner exit code a failed stage maps to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureClass {
    /// Infrastructure problem; retrying the job may help.
    System,
    /// The job itself failed.
    Build,
}

/// Errors raised by lifecycle stages.
#[derive(Debug, Error)]
pub enum StageError {
    /// Configuration is missing or malformed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A controller call failed.
    #[error(transparent)]
    Controller(#[from] ControllerError),
    /// The remote shell could not run the script.
    #[error("remote shell failed: {0}")]
    RemoteShell(#[from] RemoteShellError),
    /// The job script could not be opened.
    #[error("failed to open job script {path}: {message}")]
    Script {
        /// Script path handed over by the runner.
        path: String,
        /// OS error message.
        message: String,
    },
    /// The instance exposes no SSH port.
    #[error("instance {instance_id} has no TCP port forwarded to guest port {guest_port}")]
    MissingSshPort {
        /// Instance that was resolved for the job.
        instance_id: String,
        /// Guest port that was looked up.
        guest_port: u16,
    },
    /// The job script exited with a non-zero status.
    #[error("job script exited with status {code}")]
    BuildFailed {
        /// Remote exit status.
        code: i32,
    },
    /// The driver description could not be rendered.
    #[error("failed to render driver configuration: {0}")]
    Encode(String),
}

impl StageError {
    /// Classifies the error for exit-code mapping.
    ///
    /// Transient controller errors, cancellation and remote-shell breakage
    /// are system failures. Everything else, including a failing job
    /// script, is a build failure.
    #[must_use]
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Controller(err) if err.is_transient() || err.is_cancelled() => {
                FailureClass::System
            }
            Self::RemoteShell(_) | Self::Script { .. } | Self::Encode(_) => FailureClass::System,
            Self::Config(_)
            | Self::Controller(_)
            | Self::MissingSshPort { .. }
            | Self::BuildFailed { .. } => FailureClass::Build,
        }
    }

    /// Returns `true` when the stage was stopped by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Controller(err) => err.is_cancelled(),
            Self::RemoteShell(err) => *err == RemoteShellError::Cancelled,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn timeout() -> ControllerError {
        ControllerError::Timeout {
            method: String::from("GET"),
            url: String::from("http://ctl/api/v1/vm"),
            message: String::from("deadline exceeded"),
        }
    }

    #[rstest]
    #[case::timeout(StageError::from(timeout()), FailureClass::System)]
    #[case::wrapped_timeout(
        StageError::from(timeout().context("failed to get instance i-1")),
        FailureClass::System
    )]
    #[case::cancelled(StageError::from(ControllerError::Cancelled), FailureClass::System)]
    #[case::shell_cancelled(StageError::from(RemoteShellError::Cancelled), FailureClass::System)]
    #[case::not_found(
        StageError::from(ControllerError::InstanceNotFound {
            external_id: String::from("job/1"),
        }),
        FailureClass::Build
    )]
    #[case::bad_priority(
        StageError::from(ControllerError::InvalidPriority(20_000)),
        FailureClass::Build
    )]
    #[case::config(
        StageError::from(ConfigError::MissingField(String::from("controller URL"))),
        FailureClass::Build
    )]
    #[case::script_failed(StageError::BuildFailed { code: 3 }, FailureClass::Build)]
    fn classifies_failures(#[case] error: StageError, #[case] expected: FailureClass) {
        assert_eq!(error.failure_class(), expected, "{error}");
    }

    #[rstest]
    #[case::controller(StageError::from(ControllerError::Cancelled), true)]
    #[case::shell(StageError::from(RemoteShellError::Cancelled), true)]
    #[case::timeout(StageError::from(timeout()), false)]
    #[case::build(StageError::BuildFailed { code: 1 }, false)]
    fn detects_cancellation(#[case] error: StageError, #[case] expected: bool) {
        assert_eq!(error.is_cancelled(), expected);
    }
}
