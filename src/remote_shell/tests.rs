//! Tests for the `ssh` backed remote shell.

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

fn target(password: Option<&str>) -> ShellTarget {
    ShellTarget {
        host: String::from("10.0.0.5"),
        port: 10_022,
        user: String::from("admin"),
        password: password.map(str::to_owned),
    }
}

fn strings(args: &[OsString]) -> Vec<String> {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

struct FakeSsh {
    _dir: TempDir,
    shell: SshRemoteShell,
    dir_path: std::path::PathBuf,
}

impl FakeSsh {
    fn script(&self, name: &str, contents: &str) -> std::fs::File {
        let path = self.dir_path.join(name);
        std::fs::write(&path, contents).unwrap_or_else(|err| panic!("write script: {err}"));
        std::fs::File::open(&path).unwrap_or_else(|err| panic!("open script: {err}"))
    }
}

/// Installs a stand-in for `ssh` that ignores its arguments and runs the
/// script from stdin locally.
#[fixture]
fn fake_ssh() -> FakeSsh {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let dir_path = dir.path().to_path_buf();
    let bin = dir_path.join("fake-ssh");
    std::fs::write(&bin, "#!/bin/sh\nexec sh -s\n")
        .unwrap_or_else(|err| panic!("write fake ssh: {err}"));
    std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755))
        .unwrap_or_else(|err| panic!("chmod fake ssh: {err}"));
    let shell = SshRemoteShell::new(bin.to_string_lossy().into_owned(), String::from("sshpass"));
    FakeSsh {
        _dir: dir,
        shell,
        dir_path,
    }
}

#[test]
fn key_based_login_runs_ssh_directly() {
    let (program, args) = SshRemoteShell::default().command_line(&target(None));
    assert_eq!(program, "ssh");
    assert_eq!(
        strings(&args),
        vec![
            "-T",
            "-p",
            "10022",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "LogLevel=ERROR",
            "admin@10.0.0.5",
        ]
    );
}

#[test]
fn password_login_wraps_ssh_in_sshpass() {
    let (program, args) = SshRemoteShell::default().command_line(&target(Some("s3cret")));
    let rendered = strings(&args);
    assert_eq!(program, "sshpass");
    assert_eq!(rendered.first().map(String::as_str), Some("-e"));
    assert_eq!(rendered.get(1).map(String::as_str), Some("ssh"));
    assert_eq!(rendered.last().map(String::as_str), Some("admin@10.0.0.5"));
    assert!(
        rendered.iter().all(|arg| !arg.contains("s3cret")),
        "password must not appear on the command line: {rendered:?}"
    );
}

#[test]
fn debug_output_redacts_password() {
    let rendered = format!("{:?}", target(Some("s3cret")));
    assert!(!rendered.contains("s3cret"), "{rendered}");
    assert!(rendered.contains("<redacted>"), "{rendered}");
}

#[test]
fn render_escapes_arguments() {
    let rendered = render("ssh", &[OsString::from("-o"), OsString::from("a b")]);
    assert_eq!(rendered, "ssh -o 'a b'");
}

#[rstest]
#[case::success("true\n", 0)]
#[case::failure("echo building\nexit 3\n", 3)]
#[case::last_command("false\n", 1)]
#[tokio::test]
async fn returns_remote_exit_code(
    fake_ssh: FakeSsh,
    #[case] contents: &str,
    #[case] expected: i32,
) {
    let script = fake_ssh.script("job.sh", contents);
    let code = fake_ssh
        .shell
        .execute(&target(None), script, &CancellationToken::new())
        .await
        .unwrap_or_else(|err| panic!("script should run: {err}"));
    assert_eq!(code, expected);
}

#[rstest]
#[tokio::test]
async fn cancellation_kills_running_script(fake_ssh: FakeSsh) {
    let script = fake_ssh.script("slow.sh", "sleep 30\n");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        fake_ssh.shell.execute(&target(None), script, &cancel),
    )
    .await
    .unwrap_or_else(|_| panic!("cancellation should stop the script promptly"));

    assert_eq!(result, Err(RemoteShellError::Cancelled));
}

#[rstest]
#[tokio::test]
async fn missing_client_is_a_spawn_error(fake_ssh: FakeSsh) {
    let script = fake_ssh.script("job.sh", "true\n");
    let shell = SshRemoteShell::new(
        String::from("/nonexistent/ssh"),
        String::from("/nonexistent/sshpass"),
    );
    let err = shell
        .execute(&target(None), script, &CancellationToken::new())
        .await
        .expect_err("missing binary");
    assert!(matches!(err, RemoteShellError::Spawn { .. }), "unexpected: {err}");
}
