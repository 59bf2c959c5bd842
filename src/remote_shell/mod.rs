//! Remote shell collaborator: runs a job script on the leased VM.
//!
//! [`SshRemoteShell`] shells out to the system `ssh` client. The script is
//! fed to the remote login shell on stdin and the remote stdout/stderr are
//! inherited, so output streams straight into the runner's job log.

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use shell_escape::unix::escape;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Environment variable `sshpass -e` reads the password from.
pub const SSHPASS_ENV: &str = "SSHPASS";

/// Where and as whom a script is executed.
#[derive(Clone, Eq, PartialEq)]
pub struct ShellTarget {
    /// Host (node IP) to connect to.
    pub host: String,
    /// Port on the host forwarded to the VM's SSH daemon.
    pub port: u16,
    /// Login user inside the VM.
    pub user: String,
    /// Password for the login user; key-based auth when `None`.
    pub password: Option<String>,
}

impl fmt::Debug for ShellTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Errors raised while executing a remote script.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RemoteShellError {
    /// Raised when the client process cannot be started.
    #[error("failed to spawn `{program}`: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// OS error message.
        message: String,
    },
    /// Raised when waiting on the client or reading the script fails.
    #[error("{context}: {message}")]
    Io {
        /// Operation that failed.
        context: String,
        /// OS error message.
        message: String,
    },
    /// Raised when the client was terminated by a signal.
    #[error("`{program}` terminated without an exit status")]
    Terminated {
        /// Program that was terminated.
        program: String,
    },
    /// Raised when cancellation stopped the script.
    #[error("remote execution cancelled")]
    Cancelled,
}

/// Future returned by [`RemoteShell::execute`].
pub type ShellFuture<'a> = Pin<Box<dyn Future<Output = Result<i32, RemoteShellError>> + Send + 'a>>;

/// Executes a script on a remote host and reports its exit status.
pub trait RemoteShell: Send + Sync {
    /// Streams `script` to a shell on `target` and resolves to the remote
    /// exit code.
    fn execute<'a>(
        &'a self,
        target: &'a ShellTarget,
        script: std::fs::File,
        cancel: &'a CancellationToken,
    ) -> ShellFuture<'a>;
}

/// [`RemoteShell`] backed by the OpenSSH client.
#[derive(Clone, Debug)]
pub struct SshRemoteShell {
    ssh_bin: String,
    sshpass_bin: String,
}

impl Default for SshRemoteShell {
    fn default() -> Self {
        Self::new(String::from("ssh"), String::from("sshpass"))
    }
}

impl SshRemoteShell {
    /// Uses the given `ssh` and `sshpass` executables.
    #[must_use]
    pub const fn new(ssh_bin: String, sshpass_bin: String) -> Self {
        Self {
            ssh_bin,
            sshpass_bin,
        }
    }

    /// Returns the program and arguments used to reach `target`.
    ///
    /// Password logins are wrapped in `sshpass -e`; the password itself is
    /// passed through [`SSHPASS_ENV`], never on the command line.
    #[must_use]
    pub fn command_line(&self, target: &ShellTarget) -> (String, Vec<OsString>) {
        let port = target.port.to_string();
        let mut ssh_args: Vec<OsString> = [
            "-T",
            "-p",
            port.as_str(),
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "LogLevel=ERROR",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        if target.password.is_some() {
            ssh_args.extend(
                ["-o", "PreferredAuthentications=password,keyboard-interactive"]
                    .iter()
                    .map(OsString::from),
            );
        }
        ssh_args.push(OsString::from(format!("{}@{}", target.user, target.host)));

        if target.password.is_none() {
            return (self.ssh_bin.clone(), ssh_args);
        }
        let mut args = vec![OsString::from("-e"), OsString::from(&self.ssh_bin)];
        args.extend(ssh_args);
        (self.sshpass_bin.clone(), args)
    }

    async fn run(
        &self,
        target: &ShellTarget,
        script: std::fs::File,
        cancel: &CancellationToken,
    ) -> Result<i32, RemoteShellError> {
        let (program, args) = self.command_line(target);
        debug!(command = %render(&program, &args), "starting remote shell");

        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::from(script))
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(password) = &target.password {
            command.env(SSHPASS_ENV, password);
        }
        let mut child = command.spawn().map_err(|err| RemoteShellError::Spawn {
            program: program.clone(),
            message: err.to_string(),
        })?;
        info!(host = %target.host, port = target.port, "remote execution started");

        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if let Err(err) = child.kill().await {
                    debug!(error = %err, "failed to kill remote shell");
                }
                return Err(RemoteShellError::Cancelled);
            }
            status = child.wait() => status.map_err(|err| RemoteShellError::Io {
                context: format!("failed waiting for `{program}`"),
                message: err.to_string(),
            })?,
        };
        info!(code = ?status.code(), "remote execution finished");
        status
            .code()
            .ok_or(RemoteShellError::Terminated { program })
    }
}

impl RemoteShell for SshRemoteShell {
    fn execute<'a>(
        &'a self,
        target: &'a ShellTarget,
        script: std::fs::File,
        cancel: &'a CancellationToken,
    ) -> ShellFuture<'a> {
        Box::pin(self.run(target, script, cancel))
    }
}

fn render(program: &str, args: &[OsString]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(escape(program.into()).into_owned());
    parts.extend(
        args.iter()
            .map(|arg| escape(arg.to_string_lossy().into_owned().into()).into_owned()),
    );
    parts.join(" ")
}

#[cfg(test)]
mod tests;
