//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use rstest::rstest;

const DRIVER_ENV: &[&str] = &[
    "VM_LEASE_CONFIG_PATH",
    "CUSTOM_ENV_VM_LEASE_CONTROLLER_URL",
    "CUSTOM_ENV_VM_LEASE_TEMPLATE_ID",
    "CUSTOM_ENV_VM_LEASE_TEMPLATE_NAME",
    "CUSTOM_ENV_VM_LEASE_BUILDS_DIR",
    "CUSTOM_ENV_VM_LEASE_CACHE_DIR",
    "CUSTOM_ENV_VM_LEASE_KEEP_ALIVE_ON_ERROR",
    "CUSTOM_ENV_VM_LEASE_DEBUG",
    "CUSTOM_ENV_CI_JOB_ID",
    "CUSTOM_ENV_CI_JOB_URL",
    "CUSTOM_ENV_CI_JOB_STATUS",
    "BUILD_FAILURE_EXIT_CODE",
    "SYSTEM_FAILURE_EXIT_CODE",
];

fn driver() -> Command {
    let mut cmd = cargo_bin_cmd!("vm-lease-executor");
    for key in DRIVER_ENV {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn prints_version() {
    driver()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn config_stage_prints_driver_json() {
    let output = driver()
        .arg("config")
        .env("CUSTOM_ENV_CI_JOB_ID", "4711")
        .output()
        .unwrap_or_else(|err| panic!("run driver: {err}"));

    assert!(output.status.success(), "{output:?}");
    let rendered: serde_json::Value = serde_json::from_slice(&output.stdout)
        .unwrap_or_else(|err| panic!("config output should be JSON: {err}"));
    assert_eq!(
        rendered.get("builds_dir").and_then(|dir| dir.as_str()),
        Some("/tmp/build/4711")
    );
    assert_eq!(
        rendered.get("cache_dir").and_then(|dir| dir.as_str()),
        Some("/tmp/cache/4711")
    );
    assert_eq!(
        rendered
            .get("builds_dir_is_shared")
            .and_then(serde_json::Value::as_bool),
        Some(false)
    );
    assert_eq!(
        rendered
            .pointer("/driver/name")
            .and_then(serde_json::Value::as_str),
        Some("vm-lease-executor")
    );
}

#[test]
fn missing_controller_url_is_a_build_failure() {
    driver()
        .arg("prepare")
        .env("CUSTOM_ENV_CI_JOB_ID", "4711")
        .env("CUSTOM_ENV_VM_LEASE_TEMPLATE_ID", "tpl-1")
        .env("BUILD_FAILURE_EXIT_CODE", "17")
        .env("SYSTEM_FAILURE_EXIT_CODE", "18")
        .assert()
        .code(17)
        .stderr(predicate::str::contains(
            "CUSTOM_ENV_VM_LEASE_CONTROLLER_URL",
        ));
}

#[rstest]
#[case::prepare(&["prepare"])]
#[case::cleanup(&["cleanup"])]
fn refused_connection_maps_to_build_failure_code(#[case] args: &[&str]) {
    driver()
        .args(args)
        .env("CUSTOM_ENV_CI_JOB_ID", "4711")
        .env("CUSTOM_ENV_VM_LEASE_CONTROLLER_URL", "http://127.0.0.1:9")
        .env("CUSTOM_ENV_VM_LEASE_TEMPLATE_ID", "tpl-1")
        .args(["--build-failure-exit-code", "21"])
        .assert()
        .code(21)
        .stderr(predicate::str::contains("127.0.0.1:9"));
}

#[test]
fn run_stage_requires_script_and_stage_name() {
    driver()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("<SCRIPT>"));
}

#[test]
fn keep_alive_env_skips_termination_of_failed_job() {
    driver()
        .arg("cleanup")
        .env("CUSTOM_ENV_CI_JOB_ID", "4711")
        .env("CUSTOM_ENV_CI_JOB_STATUS", "failed")
        .env("CUSTOM_ENV_VM_LEASE_CONTROLLER_URL", "http://127.0.0.1:9")
        .env("CUSTOM_ENV_VM_LEASE_KEEP_ALIVE_ON_ERROR", "true")
        .assert()
        .success()
        .stdout(predicate::str::contains("keeping VM alive"));
}

#[test]
fn debug_env_enables_debug_logs() {
    driver()
        .arg("cleanup")
        .env("CUSTOM_ENV_CI_JOB_ID", "4711")
        .env("CUSTOM_ENV_CI_JOB_STATUS", "failed")
        .env("CUSTOM_ENV_VM_LEASE_CONTROLLER_URL", "http://127.0.0.1:9")
        .env("CUSTOM_ENV_VM_LEASE_KEEP_ALIVE_ON_ERROR", "true")
        .env("CUSTOM_ENV_VM_LEASE_DEBUG", "true")
        .assert()
        .success()
        .stdout(predicate::str::contains("controller client ready"));
}
