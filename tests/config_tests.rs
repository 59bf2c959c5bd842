//! Configuration validation and controller client construction tests.

use camino::Utf8PathBuf;
use rstest::*;
use tempfile::TempDir;

use vm_lease_executor::test_support::{EnvGuard, executor_config};
use vm_lease_executor::{ConfigError, ControllerClient, ControllerError, ExecutorConfig};

#[fixture]
fn valid_config() -> ExecutorConfig {
    let mut config = executor_config("https://ctl.example:8090");
    config.template_id = Some(String::from("tpl-1"));
    config
}

fn temp_path(tmp: &TempDir, name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(tmp.path().join(name))
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()))
}

/// Verifies that validation produces actionable errors mentioning the
/// environment variable, the configuration file and the TOML key.
#[rstest]
#[case::url(|cfg: &mut ExecutorConfig| cfg.controller_url.clear(), "CUSTOM_ENV_VM_LEASE_CONTROLLER_URL", "controller_url")]
#[case::scheme(|cfg: &mut ExecutorConfig| cfg.controller_url = String::from("ctl:8090"), "CUSTOM_ENV_VM_LEASE_CONTROLLER_URL", "controller_url")]
#[case::headers(|cfg: &mut ExecutorConfig| cfg.custom_http_headers = Some(String::from("{")), "CUSTOM_ENV_VM_LEASE_CUSTOM_HTTP_HEADERS", "custom_http_headers")]
#[case::vcpu(|cfg: &mut ExecutorConfig| cfg.vm_vcpu = Some(0), "CUSTOM_ENV_VM_LEASE_VM_VCPU", "vm_vcpu")]
#[case::vram(|cfg: &mut ExecutorConfig| cfg.vm_vram_mb = Some(0), "CUSTOM_ENV_VM_LEASE_VM_VRAM_MB", "vm_vram_mb")]
#[case::timeout(|cfg: &mut ExecutorConfig| cfg.request_timeout_secs = 0, "CUSTOM_ENV_VM_LEASE_REQUEST_TIMEOUT_SECS", "request_timeout_secs")]
fn validation_errors_are_actionable(
    valid_config: ExecutorConfig,
    #[case] mutate: fn(&mut ExecutorConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let message = cfg
        .validate()
        .expect_err("validation should fail")
        .to_string();

    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("vm-lease-executor.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn custom_headers_reach_client_settings(valid_config: ExecutorConfig) {
    let cfg = ExecutorConfig {
        custom_http_headers: Some(String::from(r#"{"X-Request-Source": "gitlab"}"#)),
        ..valid_config
    };

    let settings = cfg
        .client_settings()
        .unwrap_or_else(|err| panic!("settings should build: {err}"));

    assert_eq!(
        settings
            .custom_headers
            .get("X-Request-Source")
            .map(String::as_str),
        Some("gitlab")
    );
    assert!(settings.is_tls());
}

#[rstest]
fn missing_ca_certificate_fails_client_construction(valid_config: ExecutorConfig) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let cfg = ExecutorConfig {
        ca_cert_path: Some(temp_path(&tmp, "missing-ca.pem").into_string()),
        ..valid_config
    };
    let settings = cfg
        .client_settings()
        .unwrap_or_else(|err| panic!("settings should build: {err}"));

    let err = ControllerClient::new(&settings).expect_err("CA must be readable");

    assert!(matches!(err, ControllerError::Tls(_)), "unexpected: {err}");
    assert!(err.to_string().contains("missing-ca.pem"), "{err}");
}

#[rstest]
fn plain_http_ignores_tls_material(valid_config: ExecutorConfig) {
    let cfg = ExecutorConfig {
        controller_url: String::from("http://ctl.example:8090"),
        ca_cert_path: Some(String::from("/nonexistent/ca.pem")),
        ..valid_config
    };
    let settings = cfg
        .client_settings()
        .unwrap_or_else(|err| panic!("settings should build: {err}"));

    let client = ControllerClient::new(&settings)
        .unwrap_or_else(|err| panic!("plain http client should build: {err}"));

    assert_eq!(client.base_url(), "http://ctl.example:8090");
}

#[tokio::test]
async fn env_overrides_reach_the_loader() {
    let _guard = EnvGuard::apply(
        &[
            ("CUSTOM_ENV_VM_LEASE_CONTROLLER_URL", "https://ctl.example:8090/"),
            ("CUSTOM_ENV_VM_LEASE_TEMPLATE_NAME", "sonoma-xcode"),
            ("CUSTOM_ENV_VM_LEASE_VM_VCPU", "6"),
        ],
        &["VM_LEASE_CONFIG_PATH", "CUSTOM_ENV_VM_LEASE_TEMPLATE_ID"],
    )
    .await;

    let cfg = ExecutorConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert_eq!(cfg.vm_vcpu, Some(6));
    assert_eq!(cfg.template_name.as_deref(), Some("sonoma-xcode"));
    assert_eq!(cfg.validate(), Ok(()));
    assert_eq!(
        cfg.client_settings()
            .map(|settings| settings.base_url)
            .map_err(|err| err.to_string()),
        Ok(String::from("https://ctl.example:8090"))
    );
}

const TOGGLE_VARS: [&str; 3] = [
    "CUSTOM_ENV_VM_LEASE_SKIP_TLS_VERIFY",
    "CUSTOM_ENV_VM_LEASE_KEEP_ALIVE_ON_ERROR",
    "CUSTOM_ENV_VM_LEASE_DEBUG",
];

fn toggles(cfg: &ExecutorConfig) -> [bool; 3] {
    [
        cfg.skips_tls_verify(),
        cfg.keeps_alive_on_error(),
        cfg.debug_enabled(),
    ]
}

#[rstest]
#[case::skip_tls_verify("CUSTOM_ENV_VM_LEASE_SKIP_TLS_VERIFY", [true, false, false])]
#[case::keep_alive_on_error("CUSTOM_ENV_VM_LEASE_KEEP_ALIVE_ON_ERROR", [false, true, false])]
#[case::debug("CUSTOM_ENV_VM_LEASE_DEBUG", [false, false, true])]
#[tokio::test]
async fn toggles_can_be_enabled_from_env(#[case] var: &str, #[case] expected: [bool; 3]) {
    let mut remove: Vec<&str> = TOGGLE_VARS.into_iter().filter(|name| *name != var).collect();
    remove.push("VM_LEASE_CONFIG_PATH");
    let _guard = EnvGuard::apply(
        &[
            ("CUSTOM_ENV_VM_LEASE_CONTROLLER_URL", "https://ctl.example:8090"),
            (var, "true"),
        ],
        &remove,
    )
    .await;

    let cfg = ExecutorConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert_eq!(toggles(&cfg), expected);
}

#[tokio::test]
async fn toggles_default_to_off() {
    let mut remove = TOGGLE_VARS.to_vec();
    remove.push("VM_LEASE_CONFIG_PATH");
    let _guard = EnvGuard::apply(
        &[("CUSTOM_ENV_VM_LEASE_CONTROLLER_URL", "https://ctl.example:8090")],
        &remove,
    )
    .await;

    let cfg = ExecutorConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert_eq!(toggles(&cfg), [false; 3]);
    assert!(!cfg.tls_settings().skip_verify);
}

#[tokio::test]
async fn toggles_load_from_config_file() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = temp_path(&tmp, "vm-lease-executor.toml");
    std::fs::write(
        &path,
        concat!(
            "controller_url = \"https://file.example:8090\"\n",
            "skip_tls_verify = true\n",
            "keep_alive_on_error = true\n",
            "debug = true\n",
        ),
    )
    .unwrap_or_else(|err| panic!("write config: {err}"));
    let mut remove = TOGGLE_VARS.to_vec();
    remove.push("CUSTOM_ENV_VM_LEASE_CONTROLLER_URL");
    let _guard = EnvGuard::apply(&[("VM_LEASE_CONFIG_PATH", path.as_str())], &remove).await;

    let cfg = ExecutorConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert_eq!(cfg.controller_url, "https://file.example:8090");
    assert_eq!(toggles(&cfg), [true; 3]);
}

#[tokio::test]
async fn env_toggle_overrides_config_file() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = temp_path(&tmp, "vm-lease-executor.toml");
    std::fs::write(
        &path,
        "controller_url = \"https://file.example:8090\"\nkeep_alive_on_error = true\n",
    )
    .unwrap_or_else(|err| panic!("write config: {err}"));
    let _guard = EnvGuard::apply(
        &[
            ("VM_LEASE_CONFIG_PATH", path.as_str()),
            ("CUSTOM_ENV_VM_LEASE_KEEP_ALIVE_ON_ERROR", "false"),
        ],
        &["CUSTOM_ENV_VM_LEASE_CONTROLLER_URL"],
    )
    .await;

    let cfg = ExecutorConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert!(!cfg.keeps_alive_on_error());
}

#[tokio::test]
async fn loaded_skip_tls_verify_reaches_tls_settings() {
    let _guard = EnvGuard::apply(
        &[
            ("CUSTOM_ENV_VM_LEASE_CONTROLLER_URL", "https://ctl.example:8090"),
            ("CUSTOM_ENV_VM_LEASE_SKIP_TLS_VERIFY", "true"),
        ],
        &["VM_LEASE_CONFIG_PATH"],
    )
    .await;

    let cfg = ExecutorConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load: {err}"));
    let settings = cfg
        .client_settings()
        .unwrap_or_else(|err| panic!("settings should build: {err}"));

    assert!(settings.tls.skip_verify);
    ControllerClient::new(&settings)
        .unwrap_or_else(|err| panic!("client should build without verification: {err}"));
}

#[test]
fn missing_template_is_reported_with_both_options() {
    let cfg = executor_config("https://ctl.example:8090");

    let error = cfg.template().expect_err("template is required");

    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(message.contains("template_id"), "{message}");
    assert!(message.contains("template_name"), "{message}");
}
