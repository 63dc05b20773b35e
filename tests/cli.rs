use assert_cmd::Command;
use predicates::prelude::*;

fn devserv(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("devserv").unwrap();
    cmd.env("HOME", home).env_remove("DEVSERV_PASSWORD");
    cmd
}

#[test]
fn help_lists_every_subcommand() {
    Command::cargo_bin("devserv")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("code-server")
                .and(predicate::str::contains("desktop"))
                .and(predicate::str::contains("tunnel"))
                .and(predicate::str::contains("uninstall"))
                .and(predicate::str::contains("status")),
        );
}

#[test]
fn dry_run_code_server_walks_the_whole_workflow() {
    let home = tempfile::tempdir().unwrap();
    devserv(home.path())
        .env("DEVSERV_PASSWORD", "Abcdef12345!")
        .args([
            "code-server",
            "--dry-run",
            "-y",
            "--domain",
            "code.example.com",
            "--username",
            "dev",
        ])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Preflight checks:")
                .and(predicate::str::contains("https://code.example.com/")),
        );
}

#[test]
fn dry_run_desktop_reports_the_gateway_address() {
    let home = tempfile::tempdir().unwrap();
    devserv(home.path())
        .env("DEVSERV_PASSWORD", "Xy7!pass")
        .args(["desktop", "--dry-run", "-y", "--username", "gateway"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/guacamole/"));
}

#[test]
fn rejects_an_invalid_tunnel_name() {
    let home = tempfile::tempdir().unwrap();
    devserv(home.path())
        .args([
            "tunnel",
            "--dry-run",
            "-y",
            "--name",
            "way-too-long-tunnel-name",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("tunnel name"));
}

#[test]
fn unattended_run_fails_fast_on_a_missing_password() {
    let home = tempfile::tempdir().unwrap();
    devserv(home.path())
        .args([
            "code-server",
            "--dry-run",
            "-y",
            "--domain",
            "code.example.com",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("password"));
}

#[test]
fn status_runs_on_a_bare_host() {
    let home = tempfile::tempdir().unwrap();
    devserv(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("COMPONENT").and(predicate::str::contains("code-server")),
        );
}
