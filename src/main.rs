//! Binary entry point for the `vm-lease-executor` GitLab Custom Executor
//! driver.

mod cli;

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use vm_lease_executor::{
    ControllerClient, ExecutorConfig, FailureClass, InstanceRepository, JobConfig, Lifecycle,
    LogSettings, LogStream, LoggingError, SshRemoteShell, StageError, driver_config, logging,
};

use cli::{Cli, JobArgs, Stage};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error("failed to write driver configuration: {0}")]
    Output(#[source] io::Error),
}

impl CliError {
    fn failure_class(&self) -> FailureClass {
        match self {
            Self::Stage(err) => err.failure_class(),
            Self::Logging(_) | Self::Output(_) => FailureClass::System,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let exit_code = match dispatch(&cli, cancel).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            exit_code_for(&cli, &err)
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: &Cli, cancel: CancellationToken) -> Result<(), CliError> {
    let config = ExecutorConfig::load_without_cli_args().map_err(StageError::from)?;
    let job = job_config(&cli.job);

    if matches!(cli.stage, Stage::Config) {
        let output = driver_config(&config, &job)?.to_json()?;
        writeln!(io::stdout(), "{output}").map_err(CliError::Output)?;
        return Ok(());
    }

    logging::init(LogSettings {
        debug: config.debug_enabled(),
        stream: log_stream(&cli.stage),
    })?;
    let settings = config.client_settings().map_err(StageError::from)?;
    let client = ControllerClient::new(&settings).map_err(StageError::from)?;
    debug!(controller = client.base_url(), "controller client ready");
    let lifecycle = Lifecycle::new(
        config,
        job,
        InstanceRepository::new(client),
        SshRemoteShell::default(),
        cancel,
    );

    match &cli.stage {
        Stage::Config => {}
        Stage::Prepare => {
            lifecycle.prepare().await?;
        }
        Stage::Run(args) => lifecycle.run(Utf8Path::new(&args.script), &args.stage).await?,
        Stage::Cleanup => {
            lifecycle.cleanup().await?;
        }
    }
    Ok(())
}

fn job_config(args: &JobArgs) -> JobConfig {
    JobConfig {
        ci_job_id: args.job_id.clone(),
        ci_job_url: args.job_url.clone(),
        ci_job_status: args.job_status.clone(),
    }
}

/// The runner only shows `cleanup` output from stdout.
const fn log_stream(stage: &Stage) -> LogStream {
    match stage {
        Stage::Cleanup => LogStream::Stdout,
        Stage::Config | Stage::Prepare | Stage::Run(_) => LogStream::Stderr,
    }
}

fn exit_code_for(cli: &Cli, err: &CliError) -> i32 {
    match err.failure_class() {
        FailureClass::System => cli.system_failure_exit_code,
        FailureClass::Build => cli.build_failure_exit_code,
    }
}

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(name) => {
                info!(signal = name, "cancelling in-flight operations");
                cancel.cancel();
            }
            Err(err) => error!(error = %err, "failed to install signal handlers"),
        }
    });
}

async fn shutdown_signal() -> io::Result<&'static str> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = terminate.recv() => Ok("SIGTERM"),
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use vm_lease_executor::{ConfigError, ControllerError};

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap_or_else(|err| panic!("parse {args:?}: {err}"))
    }

    #[test]
    fn parses_run_stage_arguments() {
        let cli = parse(&[
            "vm-lease-executor",
            "--job-id",
            "12",
            "run",
            "/tmp/script.sh",
            "build_script",
        ]);
        let Stage::Run(ref args) = cli.stage else {
            panic!("expected run stage, got {:?}", cli.stage);
        };
        assert_eq!(args.script, "/tmp/script.sh");
        assert_eq!(args.stage, "build_script");
        assert_eq!(job_config(&cli.job).ci_job_id.as_deref(), Some("12"));
    }

    #[rstest]
    #[case::build(
        CliError::Stage(StageError::BuildFailed { code: 3 }),
        7
    )]
    #[case::config(
        CliError::Stage(StageError::Config(ConfigError::Invalid(String::from("bad")))),
        7
    )]
    #[case::cancelled(CliError::Stage(StageError::Controller(ControllerError::Cancelled)), 9)]
    #[case::output(
        CliError::Output(io::Error::other("closed pipe")),
        9
    )]
    fn maps_failure_class_to_exit_code(#[case] err: CliError, #[case] expected: i32) {
        let cli = parse(&[
            "vm-lease-executor",
            "--build-failure-exit-code",
            "7",
            "--system-failure-exit-code",
            "9",
            "cleanup",
        ]);
        assert_eq!(exit_code_for(&cli, &err), expected);
    }

    #[rstest]
    #[case::cleanup(Stage::Cleanup, LogStream::Stdout)]
    #[case::prepare(Stage::Prepare, LogStream::Stderr)]
    fn cleanup_logs_to_stdout(#[case] stage: Stage, #[case] expected: LogStream) {
        assert_eq!(log_stream(&stage), expected);
    }

    #[test]
    fn write_error_renders_message() {
        let mut buf = Vec::new();
        write_error(
            &mut buf,
            &CliError::Stage(StageError::BuildFailed { code: 3 }),
        );
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert_eq!(rendered, "job script exited with status 3\n");
    }
}
