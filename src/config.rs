//! Executor configuration loaded via `ortho-config`.
//!
//! GitLab forwards job variables to custom executors with a `CUSTOM_ENV_`
//! prefix, so a `VM_LEASE_CONTROLLER_URL` job variable reaches the driver as
//! `CUSTOM_ENV_VM_LEASE_CONTROLLER_URL`. Values merge defaults, the
//! `vm-lease-executor.toml` configuration file, and the environment in that
//! order of precedence.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::controller::{ClientSettings, TlsSettings};
use crate::remote_shell::ShellTarget;

/// Name of the configuration file discovered on disk.
pub const CONFIG_FILE_NAME: &str = "vm-lease-executor.toml";

/// Environment variable pointing at an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "VM_LEASE_CONFIG_PATH";

/// Login user inside the VM when none is configured.
pub const DEFAULT_SSH_USER_NAME: &str = "anka";

/// Login password inside the VM when none is configured.
pub const DEFAULT_SSH_PASSWORD: &str = "admin";

/// Job status GitLab reports for failed jobs.
pub const FAILED_JOB_STATUS: &str = "failed";

/// Driver settings shared by every stage.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CUSTOM_ENV_VM_LEASE",
    discovery(
        app_name = "vm-lease-executor",
        env_var = "VM_LEASE_CONFIG_PATH",
        config_file_name = "vm-lease-executor.toml",
        dotfile_name = ".vm-lease-executor.toml",
        project_file_name = "vm-lease-executor.toml"
    )
)]
pub struct ExecutorConfig {
    /// Base URL of the VM controller, for example `https://ctl:8090`.
    #[ortho_config(default = String::new())]
    pub controller_url: String,
    /// Template to instantiate. Preferred over `template_name`.
    pub template_id: Option<String>,
    /// Template looked up by name when no id is configured.
    pub template_name: Option<String>,
    /// Template version tag; the controller picks the latest when unset.
    pub template_tag: Option<String>,
    /// Node to pin the instance to.
    pub node_id: Option<String>,
    /// Node group to schedule the instance in.
    pub node_group_id: Option<String>,
    /// Scheduling priority, 1 (highest) to 10000. Zero leaves it unset.
    #[ortho_config(default = 0)]
    pub priority: i32,
    /// Extra CA certificate (PEM) trusted for `https` controllers.
    pub ca_cert_path: Option<String>,
    /// Disables controller certificate verification. Unset means `false`.
    #[ortho_config(skip_cli)]
    pub skip_tls_verify: Option<bool>,
    /// Client certificate (PEM) for mutual TLS.
    pub client_cert_path: Option<String>,
    /// Private key (PEM) for `client_cert_path`.
    pub client_cert_key_path: Option<String>,
    /// Login user inside the VM. Blank falls back to `anka`.
    #[ortho_config(default = DEFAULT_SSH_USER_NAME.to_owned())]
    pub ssh_user_name: String,
    /// Login password inside the VM. Empty selects key-based auth.
    #[ortho_config(default = DEFAULT_SSH_PASSWORD.to_owned())]
    pub ssh_password: String,
    /// JSON object of extra headers sent with every controller request.
    pub custom_http_headers: Option<String>,
    /// Keeps the VM alive when the job fails, for debugging. Unset means
    /// `false`.
    #[ortho_config(skip_cli)]
    pub keep_alive_on_error: Option<bool>,
    /// Builds directory reported to the runner.
    pub builds_dir: Option<String>,
    /// Cache directory reported to the runner.
    pub cache_dir: Option<String>,
    /// vCPU override for the VM.
    pub vm_vcpu: Option<u32>,
    /// RAM override for the VM, in MiB.
    pub vm_vram_mb: Option<u32>,
    /// Per-request timeout in seconds.
    #[ortho_config(default = 10)]
    pub request_timeout_secs: u64,
    /// Idle connections kept per controller host.
    #[ortho_config(default = 20)]
    pub max_idle_conns_per_host: usize,
    /// Seconds between scheduling polls.
    #[ortho_config(default = 3)]
    pub poll_interval_secs: u64,
    /// Enables debug-level logging. Unset means `false`.
    #[ortho_config(skip_cli)]
    pub debug: Option<bool>,
}

/// How the template for a new instance is chosen.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TemplateRef {
    /// Template id used as-is.
    Id(String),
    /// Template name resolved through the controller registry.
    Name(String),
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to {CONFIG_FILE_NAME}",
            self.env_var, self.toml_key
        )
    }
}

const CONTROLLER_URL: FieldMetadata = FieldMetadata::new(
    "controller URL",
    "CUSTOM_ENV_VM_LEASE_CONTROLLER_URL",
    "controller_url",
);
const CUSTOM_HTTP_HEADERS: FieldMetadata = FieldMetadata::new(
    "custom HTTP headers",
    "CUSTOM_ENV_VM_LEASE_CUSTOM_HTTP_HEADERS",
    "custom_http_headers",
);
const VM_VCPU: FieldMetadata =
    FieldMetadata::new("VM vCPU count", "CUSTOM_ENV_VM_LEASE_VM_VCPU", "vm_vcpu");
const VM_VRAM_MB: FieldMetadata =
    FieldMetadata::new("VM RAM in MiB", "CUSTOM_ENV_VM_LEASE_VM_VRAM_MB", "vm_vram_mb");
const REQUEST_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "request timeout",
    "CUSTOM_ENV_VM_LEASE_REQUEST_TIMEOUT_SECS",
    "request_timeout_secs",
);
const POLL_INTERVAL: FieldMetadata = FieldMetadata::new(
    "poll interval",
    "CUSTOM_ENV_VM_LEASE_POLL_INTERVAL_SECS",
    "poll_interval_secs",
);
const TEMPLATE_ID: FieldMetadata = FieldMetadata::new(
    "template id or name",
    "CUSTOM_ENV_VM_LEASE_TEMPLATE_ID",
    "template_id",
);

impl ExecutorConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("vm-lease-executor")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and configuration key that fix the problem.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the controller URL is blank
    /// and [`ConfigError::Invalid`] for malformed values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.controller_url.trim();
        if url.is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                CONTROLLER_URL.description,
                CONTROLLER_URL.hint()
            )));
        }
        if !url.starts_with("http") {
            return Err(invalid(
                &CONTROLLER_URL,
                &format!("{url:?} is missing an http prefix"),
            ));
        }
        self.custom_headers()?;
        Self::require_non_zero(self.vm_vcpu.map(u64::from), &VM_VCPU)?;
        Self::require_non_zero(self.vm_vram_mb.map(u64::from), &VM_VRAM_MB)?;
        Self::require_non_zero(Some(self.request_timeout_secs), &REQUEST_TIMEOUT)?;
        Self::require_non_zero(Some(self.poll_interval_secs), &POLL_INTERVAL)?;
        Ok(())
    }

    fn require_non_zero(value: Option<u64>, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == Some(0) {
            return Err(invalid(metadata, "must be greater than zero"));
        }
        Ok(())
    }

    /// Parses `custom_http_headers` into a header map.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the value is not a JSON object of
    /// strings.
    pub fn custom_headers(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        let Some(raw) = non_blank(self.custom_http_headers.as_deref()) else {
            return Ok(BTreeMap::new());
        };
        serde_json::from_str(raw).map_err(|err| {
            invalid(
                &CUSTOM_HTTP_HEADERS,
                &format!("expected a JSON object of strings: {err}"),
            )
        })
    }

    /// Builds the controller client settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn client_settings(&self) -> Result<ClientSettings, ConfigError> {
        self.validate()?;
        let settings = ClientSettings::new(self.controller_url.as_str())
            .map_err(|err| invalid(&CONTROLLER_URL, &err.to_string()))?
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_max_idle_conns_per_host(self.max_idle_conns_per_host)
            .with_custom_headers(self.custom_headers()?)
            .with_tls(self.tls_settings());
        Ok(settings)
    }

    /// Returns the TLS options for `https` controllers.
    #[must_use]
    pub fn tls_settings(&self) -> TlsSettings {
        let path = |value: Option<&str>| non_blank(value).map(Utf8PathBuf::from);
        TlsSettings {
            ca_cert_path: path(self.ca_cert_path.as_deref()),
            skip_verify: self.skips_tls_verify(),
            client_cert_path: path(self.client_cert_path.as_deref()),
            client_key_path: path(self.client_cert_key_path.as_deref()),
        }
    }

    /// Picks the template for new instances, preferring the id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when neither an id nor a name is
    /// configured.
    pub fn template(&self) -> Result<TemplateRef, ConfigError> {
        if let Some(id) = non_blank(self.template_id.as_deref()) {
            return Ok(TemplateRef::Id(id.to_owned()));
        }
        if let Some(name) = non_blank(self.template_name.as_deref()) {
            return Ok(TemplateRef::Name(name.to_owned()));
        }
        Err(ConfigError::MissingField(format!(
            "missing {}: {} (or CUSTOM_ENV_VM_LEASE_TEMPLATE_NAME / template_name)",
            TEMPLATE_ID.description,
            TEMPLATE_ID.hint()
        )))
    }

    /// Returns the SSH login for `host:port`; an empty password selects
    /// key-based authentication.
    #[must_use]
    pub fn shell_target(&self, host: &str, port: u16) -> ShellTarget {
        ShellTarget {
            host: host.to_owned(),
            port,
            user: non_blank(Some(self.ssh_user_name.as_str()))
                .unwrap_or(DEFAULT_SSH_USER_NAME)
                .to_owned(),
            password: non_blank(Some(self.ssh_password.as_str())).map(str::to_owned),
        }
    }

    /// Returns the interval between scheduling polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Returns `true` when the VM must be kept for a job with `job_status`.
    #[must_use]
    pub fn keeps_instance(&self, job_status: Option<&str>) -> bool {
        self.keeps_alive_on_error() && job_status == Some(FAILED_JOB_STATUS)
    }

    /// Returns `true` when controller certificates go unverified.
    #[must_use]
    pub const fn skips_tls_verify(&self) -> bool {
        matches!(self.skip_tls_verify, Some(true))
    }

    /// Returns `true` when failed jobs keep their VM.
    #[must_use]
    pub const fn keeps_alive_on_error(&self) -> bool {
        matches!(self.keep_alive_on_error, Some(true))
    }

    /// Returns `true` when debug logging is requested.
    #[must_use]
    pub const fn debug_enabled(&self) -> bool {
        matches!(self.debug, Some(true))
    }
}

/// Per-job variables the runner forwards to every stage
/// (`CUSTOM_ENV_CI_JOB_ID`, `CUSTOM_ENV_CI_JOB_URL`,
/// `CUSTOM_ENV_CI_JOB_STATUS`).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct JobConfig {
    /// Identifier of the running job.
    pub ci_job_id: Option<String>,
    /// Web URL of the running job.
    pub ci_job_url: Option<String>,
    /// Status of the job, available during cleanup.
    pub ci_job_status: Option<String>,
}

impl JobConfig {
    /// Returns the job id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the runner did not provide
    /// one.
    pub fn job_id(&self) -> Result<&str, ConfigError> {
        non_blank(self.ci_job_id.as_deref()).ok_or_else(|| {
            ConfigError::MissingField(String::from(
                "missing job id: CUSTOM_ENV_CI_JOB_ID is set by the GitLab runner",
            ))
        })
    }

    /// Returns the id instances of this job are tagged with: the job URL,
    /// falling back to the job id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when neither is available.
    pub fn external_id(&self) -> Result<&str, ConfigError> {
        non_blank(self.ci_job_url.as_deref()).map_or_else(|| self.job_id(), Ok)
    }

    /// Returns the job status, when the runner reported one.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        non_blank(self.ci_job_status.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn invalid(metadata: &FieldMetadata, message: &str) -> ConfigError {
    ConfigError::Invalid(format!(
        "invalid {}: {message}; {}",
        metadata.description,
        metadata.hint()
    ))
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value is malformed.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
