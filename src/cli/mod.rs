//! Command-line interface definitions for the `vm-lease-executor` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `vm-lease-executor` binary.
#[derive(Debug, Parser)]
#[command(
    name = "vm-lease-executor",
    version,
    about = "GitLab Custom Executor driver that runs jobs on VMs leased from a VM controller",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Exit code reported when the job itself failed.
    #[arg(
        long,
        env = "BUILD_FAILURE_EXIT_CODE",
        default_value_t = 1,
        global = true
    )]
    pub(crate) build_failure_exit_code: i32,
    /// Exit code reported when the driver or its infrastructure failed.
    #[arg(
        long,
        env = "SYSTEM_FAILURE_EXIT_CODE",
        default_value_t = 2,
        global = true
    )]
    pub(crate) system_failure_exit_code: i32,
    /// Job variables forwarded by the runner.
    #[command(flatten)]
    pub(crate) job: JobArgs,
    /// Stage to execute.
    #[command(subcommand)]
    pub(crate) stage: Stage,
}

/// Per-job variables, read verbatim from the runner's environment.
#[derive(Debug, Args)]
pub(crate) struct JobArgs {
    /// Identifier of the running job.
    #[arg(long = "job-id", env = "CUSTOM_ENV_CI_JOB_ID", global = true)]
    pub(crate) job_id: Option<String>,
    /// Web URL of the running job.
    #[arg(long = "job-url", env = "CUSTOM_ENV_CI_JOB_URL", global = true)]
    pub(crate) job_url: Option<String>,
    /// Status of the job, available during cleanup.
    #[arg(long = "job-status", env = "CUSTOM_ENV_CI_JOB_STATUS", global = true)]
    pub(crate) job_status: Option<String>,
}

/// Custom executor stages.
#[derive(Debug, Subcommand)]
pub(crate) enum Stage {
    /// Print the driver configuration JSON.
    #[command(name = "config")]
    Config,
    /// Lease a VM for the job and wait until it has started.
    #[command(name = "prepare")]
    Prepare,
    /// Run a job script on the leased VM.
    #[command(name = "run")]
    Run(RunArgs),
    /// Release the job's VM.
    #[command(name = "cleanup")]
    Cleanup,
}

/// Arguments for the `run` stage.
#[derive(Debug, Args)]
pub(crate) struct RunArgs {
    /// Path of the script generated by the runner.
    pub(crate) script: String,
    /// Runner stage name, for example `build_script`.
    pub(crate) stage: String,
}
