use crate::checks::{self, CheckProfile, HostFacts};
use crate::config::{
    self, DomainName, RunRecord, WorkflowConfig, DESKTOP_POLICY, SERVICE_POLL, SERVICE_START_WAIT,
    STACK_START_WAIT,
};
use crate::error::AppError;
use crate::ports;
use crate::render::{self, GuacamoleStack, ProxySite, UserMapping};
use crate::runner::{first_token, CommandSpec};
use crate::steps::{Sequencer, Step, StepContext};
use crate::system::System;
use crate::ui::{self, Confirmer};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Instant;
use tokio::time::sleep;
use uuid::Uuid;

const SITE: &str = "desktop";
const PACKAGES: &[&str] = &[
    "xfce4",
    "xfce4-goodies",
    "dbus-x11",
    "xrdp",
    "docker.io",
    "docker-compose-v2",
    "nginx",
];

pub struct DesktopArgs {
    pub domain: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: u16,
    pub assume_yes: bool,
}

pub async fn run(
    args: DesktopArgs,
    system: System,
    confirmer: &mut dyn Confirmer,
) -> Result<(), AppError> {
    let config = collect_config(&args)?;
    let facts = if system.dry_run {
        HostFacts::simulated()
    } else {
        let spinner = ui::spinner("Probing host state...");
        let facts = checks::gather(
            system.runner.as_ref(),
            config.domain.as_ref(),
            Some(config.system_user.as_str()),
        )
        .await;
        spinner.finish_and_clear();
        facts
    };
    execute(config, facts, system, confirmer).await?;
    Ok(())
}

fn collect_config(args: &DesktopArgs) -> Result<WorkflowConfig, AppError> {
    let system_user = config::system_user();
    let default_username = config::validate_username(&system_user)
        .map(|_| system_user.clone())
        .unwrap_or_else(|_| "dev".to_string());

    // Domain is optional here and only ever comes in over the flag; without
    // one the gateway is published as the catch-all site.
    let domain = args.domain.as_deref().map(DomainName::parse).transpose()?;
    let username = match &args.username {
        Some(raw) => config::validate_username(raw)?,
        None if args.assume_yes => default_username,
        None => ui::prompt_username(&default_username)?,
    };
    let password = match &args.password {
        Some(password) => password.clone(),
        None if args.assume_yes => {
            return Err(AppError::MissingParam(
                "password (--password or DEVSERV_PASSWORD)".to_string(),
            ))
        }
        None => ui::prompt_password(&DESKTOP_POLICY)?,
    };

    Ok(WorkflowConfig {
        domain,
        username,
        password: Some(password),
        tunnel_name: None,
        preferred_port: args.port,
        system_user,
    })
}

pub async fn execute(
    config: WorkflowConfig,
    facts: HostFacts,
    system: System,
    confirmer: &mut dyn Confirmer,
) -> Result<RunRecord, AppError> {
    let profile = CheckProfile {
        domain: config.domain.as_ref(),
        login_password_user: Some(config.system_user.as_str()),
        policy: Some(&DESKTOP_POLICY),
        password: config.password.as_deref(),
    };
    let report = checks::evaluate(&facts, &profile);
    let accepted = checks::enforce(&report, confirmer)?;

    let host = config
        .domain
        .as_ref()
        .map(|d| d.to_string())
        .or_else(|| facts.public_ip.map(|ip| ip.to_string()))
        .unwrap_or_else(|| "<server-ip>".to_string());
    let username = config.username.clone();

    let mut cx = StepContext::new(config, system, accepted);
    let steps = steps();
    Sequencer::new().run(&steps, &mut cx).await?;

    let record = build_record(&cx);
    let record_path = if cx.system.dry_run {
        None
    } else {
        Some(record.save(&cx.system.paths.records_dir())?)
    };
    ui::print_desktop_summary(&record, &username, &host, record_path.as_deref());
    Ok(record)
}

fn steps() -> Vec<Box<dyn Step>> {
    vec![
        Box::new(InstallDesktopPackages),
        Box::new(ConfigureDesktopSession),
        Box::new(EnableDesktopServices),
        Box::new(ReserveGatewayPort),
        Box::new(InstallGatewayStack),
        Box::new(StartGatewayStack),
        Box::new(PublishGatewayRoute),
    ]
}

fn build_record(cx: &StepContext) -> RunRecord {
    RunRecord {
        id: Uuid::new_v4().to_string(),
        workflow: "desktop".to_string(),
        domain: cx.config.domain.as_ref().map(|d| d.to_string()),
        tunnel: None,
        ports: cx.ports.clone(),
        artifacts: cx
            .artifacts
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
        accepted_warnings: cx.accepted_warnings.clone(),
        created_at: Utc::now(),
    }
}

fn compose_path(cx: &StepContext) -> std::path::PathBuf {
    cx.system.paths.guacamole_dir.join("docker-compose.yml")
}

struct InstallDesktopPackages;

#[async_trait]
impl Step for InstallDesktopPackages {
    fn name(&self) -> &'static str {
        "Install desktop packages"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        cx.system.pkg.refresh().await?;
        cx.system.pkg.install(PACKAGES).await?;
        Ok(())
    }

    async fn verify(&self, cx: &StepContext) -> Result<(), AppError> {
        for package in ["xrdp", "docker.io", "nginx"] {
            if !cx.system.pkg.installed(package).await? {
                return Err(AppError::Verification(format!(
                    "package '{package}' is not installed"
                )));
            }
        }
        Ok(())
    }
}

struct ConfigureDesktopSession;

#[async_trait]
impl Step for ConfigureDesktopSession {
    fn name(&self) -> &'static str {
        "Configure desktop session"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        let xsession = cx.system.paths.home.join(".xsession");
        cx.system.write_user_file(&xsession, render::XSESSION)?;
        cx.record_artifact(xsession);

        // xrdp reads its TLS key through the ssl-cert group.
        cx.system
            .runner
            .run_ok(&CommandSpec::new("usermod", &["-aG", "ssl-cert", "xrdp"]).sudo())
            .await?;
        Ok(())
    }
}

struct EnableDesktopServices;

#[async_trait]
impl Step for EnableDesktopServices {
    fn name(&self) -> &'static str {
        "Enable desktop services"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        cx.system.svc.enable_now("xrdp").await?;
        cx.system.svc.enable_now("docker").await?;
        Ok(())
    }

    async fn verify(&self, cx: &StepContext) -> Result<(), AppError> {
        cx.system.svc.wait_active("xrdp", SERVICE_START_WAIT).await
    }
}

struct ReserveGatewayPort;

#[async_trait]
impl Step for ReserveGatewayPort {
    fn name(&self) -> &'static str {
        "Reserve gateway port"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        let lease = ports::allocate(cx.config.preferred_port)?;
        cx.record_port("gateway", lease.port());
        cx.backend = Some(lease);
        Ok(())
    }
}

struct InstallGatewayStack;

#[async_trait]
impl Step for InstallGatewayStack {
    fn name(&self) -> &'static str {
        "Install gateway stack"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        let username = cx.config.username.clone();
        let password = cx.config.password()?.to_string();
        let system_user = cx.config.system_user.clone();
        let port = cx.backend_port()?;

        // Guacamole's basic auth file wants the MD5 of the password; hash
        // over stdin so the secret stays off the command line.
        let out = cx
            .system
            .runner
            .run_ok(&CommandSpec::new("md5sum", &[]).stdin(password))
            .await?;
        let digest = first_token(&out.stdout)?;

        let home_mount = cx.system.paths.guacamole_dir.join("home");
        cx.system.ensure_dir_privileged(&home_mount, "0755").await?;

        let compose = GuacamoleStack {
            http_port: port,
            home_mount: home_mount.clone(),
        };
        let compose_file = compose_path(cx);
        cx.system
            .write_privileged(&compose_file, &compose.render(), "0644", None)
            .await?;
        cx.record_artifact(compose_file);

        let mapping = UserMapping {
            username,
            password_md5: digest,
            rdp_host: "172.17.0.1".to_string(),
            rdp_port: config::RDP_PORT,
            rdp_username: system_user,
        };
        let mapping_file = home_mount.join("user-mapping.xml");
        cx.system
            .write_privileged(&mapping_file, &mapping.render(), "0644", None)
            .await?;
        cx.record_artifact(mapping_file);
        Ok(())
    }
}

struct StartGatewayStack;

#[async_trait]
impl Step for StartGatewayStack {
    fn name(&self) -> &'static str {
        "Start gateway stack"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        if let Some(lease) = cx.backend.as_mut() {
            lease.release();
        }
        let compose_file = compose_path(cx).display().to_string();
        cx.system
            .runner
            .run_ok(
                &CommandSpec::new("docker", &["compose", "-f", &compose_file, "up", "-d"]).sudo(),
            )
            .await?;
        Ok(())
    }

    async fn verify(&self, cx: &StepContext) -> Result<(), AppError> {
        let compose_file = compose_path(cx).display().to_string();
        let spec = CommandSpec::new(
            "docker",
            &[
                "compose",
                "-f",
                &compose_file,
                "ps",
                "--status",
                "running",
                "-q",
                "guacamole",
            ],
        )
        .sudo()
        .probe();

        let started = Instant::now();
        loop {
            let out = cx.system.runner.run(&spec).await?;
            if out.success() && !out.stdout.trim().is_empty() {
                return Ok(());
            }
            if started.elapsed() > STACK_START_WAIT {
                return Err(AppError::Timeout(
                    "gateway container to report running".to_string(),
                ));
            }
            sleep(SERVICE_POLL).await;
        }
    }
}

struct PublishGatewayRoute;

#[async_trait]
impl Step for PublishGatewayRoute {
    fn name(&self) -> &'static str {
        "Publish gateway route"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        let server_name = cx.config.domain.as_ref().map(|d| d.to_string());
        if server_name.is_none() {
            // The catch-all site takes over the default_server slot.
            cx.system.proxy.disable_stock_site().await?;
        }
        let site = ProxySite {
            server_name,
            backend_port: cx.backend_port()?,
            location: "/guacamole/".to_string(),
            auth_file: None,
            acme_webroot: None,
            tls: None,
        };
        cx.system.proxy.install_site(SITE, &site.render()).await?;
        cx.system.proxy.check_config().await?;
        cx.system.proxy.reload().await?;
        cx.record_artifact(cx.system.proxy.site_path(SITE));
        Ok(())
    }
}
