//! Core library for the `vm-lease-executor` GitLab Custom Executor driver.
//!
//! Every CI job runs on a short-lived VM leased from a VM controller. The
//! crate talks to the controller over its REST API ([`controller`]), retries
//! transient failures ([`retry`]), models instances and resolves the VM that
//! belongs to a job ([`instance`]), waits for freshly created VMs to start
//! ([`poller`]), and streams job scripts to them over SSH
//! ([`remote_shell`]). [`stages`] ties these together for the runner's
//! `config`, `prepare`, `run` and `cleanup` stages.

pub mod config;
pub mod controller;
mod fs;
pub mod instance;
pub mod logging;
pub mod poller;
pub mod remote_shell;
pub mod retry;
pub mod stages;
pub mod test_support;

pub use config::{ConfigError, ExecutorConfig, JobConfig, TemplateRef};
pub use controller::{ClientSettings, ControllerClient, ControllerError, TlsSettings, Transport};
pub use instance::{
    CreateInstanceRequest, Instance, InstanceRepository, InstanceState, Node, Template,
    select_usable_instance,
};
pub use logging::{LogSettings, LogStream, LoggingError};
pub use poller::{ProgressObserver, SchedulingPoller, TracingObserver};
pub use remote_shell::{RemoteShell, RemoteShellError, ShellTarget, SshRemoteShell};
pub use retry::{RetryPolicy, Retryable, with_retry};
pub use stages::{CleanupOutcome, DriverConfig, FailureClass, Lifecycle, StageError, driver_config};
