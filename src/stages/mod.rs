//! Lifecycle stages invoked by the GitLab runner.
//!
//! The runner calls the driver once per stage: `config` describes the
//! executor, `prepare` leases a VM for the job, `run` executes each job
//! script on it, and `cleanup` releases it. [`Lifecycle`] sequences the
//! instance repository, the scheduling poller and the remote shell for those
//! stages. Errors carry a [`FailureClass`] so the binary can pick the exit
//! code the runner expects.

mod cleanup;
mod driver;
mod error;
mod prepare;
mod run;

use tokio_util::sync::CancellationToken;

use crate::config::{ExecutorConfig, JobConfig};
use crate::controller::Transport;
use crate::instance::InstanceRepository;
use crate::poller::{ProgressObserver, SchedulingPoller, TracingObserver};
use crate::remote_shell::RemoteShell;

pub use cleanup::CleanupOutcome;
pub use driver::{DRIVER_NAME, DRIVER_VERSION, DriverConfig, DriverInfo, driver_config};
pub use error::{FailureClass, StageError};
pub use prepare::{STARTUP_SCRIPT, STARTUP_SCRIPT_TIMEOUT_SECS};

/// Runs the `prepare`, `run` and `cleanup` stages for one job.
#[derive(Debug)]
pub struct Lifecycle<T, S, O = TracingObserver> {
    config: ExecutorConfig,
    job: JobConfig,
    repository: InstanceRepository<T>,
    shell: S,
    poller: SchedulingPoller<O>,
    cancel: CancellationToken,
}

impl<T: Transport, S: RemoteShell> Lifecycle<T, S> {
    /// Creates a lifecycle polling at the configured interval.
    #[must_use]
    pub const fn new(
        config: ExecutorConfig,
        job: JobConfig,
        repository: InstanceRepository<T>,
        shell: S,
        cancel: CancellationToken,
    ) -> Self {
        let poller = SchedulingPoller::new(config.poll_interval());
        Self {
            config,
            job,
            repository,
            shell,
            poller,
            cancel,
        }
    }
}

impl<T: Transport, S: RemoteShell, O: ProgressObserver> Lifecycle<T, S, O> {
    /// Replaces the poller's progress observer.
    #[must_use]
    pub fn with_observer<P: ProgressObserver>(self, observer: P) -> Lifecycle<T, S, P> {
        Lifecycle {
            config: self.config,
            job: self.job,
            repository: self.repository,
            shell: self.shell,
            poller: self.poller.with_observer(observer),
            cancel: self.cancel,
        }
    }

    /// Returns the instance repository.
    #[must_use]
    pub const fn repository(&self) -> &InstanceRepository<T> {
        &self.repository
    }

    /// Returns the remote shell.
    #[must_use]
    pub const fn shell(&self) -> &S {
        &self.shell
    }
}
