mod common;

use common::{config_for, system_under, RecordingRunner, Scripted};
use devserv::checks::HostFacts;
use devserv::config::TunnelName;
use devserv::error::AppError;
use devserv::workflows::uninstall::{self, Target};
use devserv::workflows::{code_server, desktop, tunnel};
use tempfile::tempdir;

const PASSWORD: &str = "Abcdef12345!";

#[tokio::test]
async fn code_server_provisions_in_order_and_keeps_secrets_off_argv() {
    let dir = tempdir().unwrap();
    let runner = RecordingRunner::new();
    // Fresh host: the first code-server probe reports absent, later ones
    // see the install.
    runner.rule_once("code-server --version", 1, "");

    let system = system_under(dir.path(), runner.clone());
    let config = config_for(Some("code.example.com"), "dev", Some(PASSWORD));
    let mut confirmer = Scripted::yes();

    let record = code_server::execute(config, HostFacts::simulated(), system, &mut confirmer)
        .await
        .unwrap();

    // Healthy facts leave nothing to confirm.
    assert_eq!(confirmer.asked, 0);
    assert!(runner.position("code-server.dev/install.sh").is_some());

    // Two site publishes: plain HTTP before issuance, TLS after.
    let installs: Vec<(usize, String)> = runner
        .matching("sites-available/code-server")
        .into_iter()
        .filter_map(|(i, stdin)| stdin.map(|s| (i, s)))
        .collect();
    assert_eq!(installs.len(), 2);
    let certbot = runner.position("certbot certonly").unwrap();
    assert!(!installs[0].1.contains("ssl_certificate"));
    assert!(installs[0].0 < certbot);
    assert!(installs[1].1.contains("ssl_certificate"));
    assert!(certbot < installs[1].0);

    // The password travels on stdin only.
    assert!(runner.displays().iter().all(|d| !d.contains(PASSWORD)));
    assert_eq!(
        runner.stdin_of("openssl passwd -apr1").as_deref(),
        Some(PASSWORD)
    );
    // Digest parsed from the hasher's stdout ("ok" from the double).
    assert_eq!(
        runner.stdin_of(".htpasswd-code-server").as_deref(),
        Some("dev:ok\n")
    );

    assert_eq!(record.workflow, "code-server");
    assert_eq!(record.domain.as_deref(), Some("code.example.com"));
    let ide = record.ports.iter().find(|p| p.name == "ide").unwrap();
    assert_ne!(ide.port, 0);
    assert!(dir
        .path()
        .join("state/records/code-server.json")
        .exists());
}

#[tokio::test]
async fn code_server_aborts_at_failed_issuance_without_publishing_tls() {
    let dir = tempdir().unwrap();
    let runner = RecordingRunner::new();
    runner.fail_on("certbot certonly", "rate limited");

    let system = system_under(dir.path(), runner.clone());
    let config = config_for(Some("code.example.com"), "dev", Some(PASSWORD));
    let mut confirmer = Scripted::yes();

    let err = code_server::execute(config, HostFacts::simulated(), system, &mut confirmer)
        .await
        .unwrap_err();

    match err {
        AppError::StepFailed { step, .. } => assert_eq!(step, "Obtain TLS certificate"),
        other => panic!("unexpected error: {other}"),
    }
    // Nothing after the failed step ran: no TLS site, no cron entry.
    assert!(runner
        .matching("sites-available/code-server")
        .into_iter()
        .all(|(_, stdin)| !stdin.unwrap_or_default().contains("ssl_certificate")));
    assert!(runner.position("crontab").is_none());
}

#[tokio::test]
async fn declined_warning_leaves_the_host_untouched() {
    let dir = tempdir().unwrap();
    let runner = RecordingRunner::new();
    let system = system_under(dir.path(), runner.clone());

    // Domain resolves somewhere else; the operator says no at the prompt.
    let mut facts = HostFacts::simulated();
    facts.domain_ip = Some("198.51.100.7".parse().unwrap());
    let config = config_for(Some("code.example.com"), "dev", Some(PASSWORD));
    let mut confirmer = Scripted::no();

    let err = code_server::execute(config, facts, system, &mut confirmer)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Declined(_)));
    assert_eq!(confirmer.asked, 1);
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
async fn accepted_warnings_end_up_in_the_record() {
    let dir = tempdir().unwrap();
    let runner = RecordingRunner::new();
    let system = system_under(dir.path(), runner.clone());

    let mut facts = HostFacts::simulated();
    facts.os_version = Some("22.04".to_string());
    let config = config_for(Some("code.example.com"), "dev", Some(PASSWORD));
    let mut confirmer = Scripted::yes();

    let record = code_server::execute(config, facts, system, &mut confirmer)
        .await
        .unwrap();

    assert_eq!(confirmer.asked, 1);
    assert!(record
        .accepted_warnings
        .iter()
        .any(|w| w.starts_with("operating system")));
}

#[tokio::test]
async fn desktop_takes_over_default_site_and_wires_rdp_to_the_host() {
    let dir = tempdir().unwrap();
    let runner = RecordingRunner::new();
    let system = system_under(dir.path(), runner.clone());

    let config = config_for(None, "gateway", Some("Xy7!pass"));
    let mut confirmer = Scripted::yes();

    let record = desktop::execute(config, HostFacts::simulated(), system, &mut confirmer)
        .await
        .unwrap();

    // No domain: the stock default site gives way to the catch-all.
    assert!(runner.position("sites-enabled/default").is_some());

    let gateway = record.ports.iter().find(|p| p.name == "gateway").unwrap();
    let compose = runner.stdin_of("docker-compose.yml").unwrap();
    assert!(compose.contains(&format!("127.0.0.1:{}:8080", gateway.port)));

    let mapping = runner.stdin_of("user-mapping.xml").unwrap();
    assert!(mapping.contains(r#"authorize username="gateway""#));
    assert!(mapping.contains(r#"encoding="md5""#));
    assert!(mapping.contains("<param name=\"username\">testuser</param>"));
    // RDP greeter asks for the system password itself.
    assert!(!mapping.contains("Xy7!pass"));

    assert!(dir.path().join("home/.xsession").exists());
    assert!(runner.position("docker compose").is_some());
}

#[tokio::test]
async fn tunnel_installs_cli_and_unit_but_skips_completed_sign_in() {
    let dir = tempdir().unwrap();
    let runner = RecordingRunner::new();
    // CLI absent on the first probe, present after the download.
    runner.rule_once("--version", 1, "");

    let system = system_under(dir.path(), runner.clone());
    let mut config = config_for(None, "testuser", None);
    config.tunnel_name = Some(TunnelName::parse("dev-tunnel").unwrap());
    let mut confirmer = Scripted::yes();

    let record = tunnel::execute(config, HostFacts::simulated(), system, &mut confirmer)
        .await
        .unwrap();

    assert!(runner.position("update.code.visualstudio.com").is_some());
    // `tunnel user show` succeeded, so no interactive login was launched.
    assert!(runner.position("tunnel user login").is_none());

    let unit = runner.stdin_of("vscode-tunnel.service").unwrap();
    assert!(unit.contains("tunnel --name dev-tunnel --accept-server-license-terms"));
    assert!(unit.contains("User=testuser"));
    assert_eq!(record.tunnel.as_deref(), Some("dev-tunnel"));
}

#[tokio::test]
async fn uninstall_reports_nothing_on_a_clean_host() {
    let dir = tempdir().unwrap();
    let runner = RecordingRunner::new();
    runner.rule("dpkg -s", 1, "");
    runner.rule("crontab -l", 1, "");

    let system = system_under(dir.path(), runner.clone());
    let mut confirmer = Scripted::yes();

    uninstall::run(&Target::ALL, system, &mut confirmer)
        .await
        .unwrap();

    assert_eq!(confirmer.asked, 0);
    assert!(runner.matching("rm -rf").is_empty());
}

#[tokio::test]
async fn uninstall_removes_what_it_detected() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("etc/systemd/system")).unwrap();
    std::fs::write(root.join("etc/systemd/system/code-server.service"), "[Unit]").unwrap();
    std::fs::create_dir_all(root.join("etc/nginx/sites-available")).unwrap();
    std::fs::write(root.join("etc/nginx/sites-available/code-server"), "server {}").unwrap();
    std::fs::write(root.join("etc/nginx/.htpasswd-code-server"), "dev:x").unwrap();

    let runner = RecordingRunner::new();
    runner.rule("dpkg -s", 1, "");
    runner.rule("crontab -l", 1, "");

    let system = system_under(root, runner.clone());
    let mut confirmer = Scripted::yes();

    uninstall::run(&[Target::CodeServer], system, &mut confirmer)
        .await
        .unwrap();

    assert_eq!(confirmer.asked, 1);
    assert!(runner.position("systemctl stop code-server").is_some());
    assert!(runner.position("rm -rf").is_some());
    assert!(runner
        .displays()
        .iter()
        .any(|d| d.contains("sites-available/code-server") && d.contains("rm")));
}

#[tokio::test]
async fn uninstall_reports_failures_after_finishing_the_plan() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("etc/systemd/system")).unwrap();
    std::fs::write(root.join("etc/systemd/system/code-server.service"), "[Unit]").unwrap();
    std::fs::create_dir_all(root.join("etc/nginx/sites-available")).unwrap();
    std::fs::write(root.join("etc/nginx/sites-available/code-server"), "server {}").unwrap();

    let runner = RecordingRunner::new();
    runner.rule("dpkg -s", 1, "");
    runner.rule("crontab -l", 1, "");
    runner.fail_on("rm -rf", "read-only file system");

    let system = system_under(root, runner.clone());
    let mut confirmer = Scripted::yes();

    let err = uninstall::run(&[Target::CodeServer], system, &mut confirmer)
        .await
        .unwrap_err();

    match err {
        AppError::StepFailed { step, message } => {
            assert_eq!(step, "uninstall");
            assert_eq!(message, "1 of 2 removals failed");
        }
        other => panic!("unexpected error: {other}"),
    }
    // The site removal behind the failed unit removal still ran.
    assert!(runner
        .displays()
        .iter()
        .any(|d| d.contains("rm -f") && d.contains("sites-available/code-server")));
}

#[tokio::test]
async fn uninstall_decline_removes_nothing() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("etc/systemd/system")).unwrap();
    std::fs::write(root.join("etc/systemd/system/code-server.service"), "[Unit]").unwrap();

    let runner = RecordingRunner::new();
    runner.rule("dpkg -s", 1, "");
    runner.rule("crontab -l", 1, "");

    let system = system_under(root, runner.clone());
    let mut confirmer = Scripted::no();

    let err = uninstall::run(&[Target::CodeServer], system, &mut confirmer)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Declined(_)));
    assert!(runner.matching("rm -rf").is_empty());
    assert!(runner.position("systemctl stop").is_none());
    assert!(root.join("etc/systemd/system/code-server.service").exists());
}
