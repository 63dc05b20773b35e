use crate::checks::{self, CheckProfile, HostFacts};
use crate::config::{
    self, DomainName, RunRecord, WorkflowConfig, CODE_SERVER_POLICY, SERVICE_START_WAIT,
};
use crate::error::AppError;
use crate::ports;
use crate::render::{self, ProxySite, ServiceUnit, TlsPaths};
use crate::runner::{best_effort, first_token, CommandSpec};
use crate::steps::{Sequencer, Step, StepContext, StepDisposition};
use crate::system::System;
use crate::ui::{self, Confirmer};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

const UNIT: &str = "code-server";
const SITE: &str = "code-server";
const AUTH_FILE: &str = ".htpasswd-code-server";
const INSTALLER: &str = "curl -fsSL https://code-server.dev/install.sh | sh";

pub struct CodeServerArgs {
    pub domain: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: u16,
    pub assume_yes: bool,
}

pub async fn run(
    args: CodeServerArgs,
    system: System,
    confirmer: &mut dyn Confirmer,
) -> Result<(), AppError> {
    let config = collect_config(&args)?;
    let facts = if system.dry_run {
        HostFacts::simulated()
    } else {
        let spinner = ui::spinner("Probing host state...");
        let facts = checks::gather(system.runner.as_ref(), config.domain.as_ref(), None).await;
        spinner.finish_and_clear();
        facts
    };
    execute(config, facts, system, confirmer).await?;
    Ok(())
}

fn collect_config(args: &CodeServerArgs) -> Result<WorkflowConfig, AppError> {
    let system_user = config::system_user();
    let default_username = config::validate_username(&system_user)
        .map(|_| system_user.clone())
        .unwrap_or_else(|_| "dev".to_string());

    let domain = match &args.domain {
        Some(raw) => DomainName::parse(raw)?,
        None if args.assume_yes => {
            return Err(AppError::MissingParam("domain (--domain)".to_string()))
        }
        None => ui::prompt_domain()?,
    };
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
        None => ui::prompt_password(&CODE_SERVER_POLICY)?,
    };

    Ok(WorkflowConfig {
        domain: Some(domain),
        username,
        password: Some(password),
        tunnel_name: None,
        preferred_port: args.port,
        system_user,
    })
}

/// Core of the workflow, past all prompting: check, sequence, record.
pub async fn execute(
    config: WorkflowConfig,
    facts: HostFacts,
    system: System,
    confirmer: &mut dyn Confirmer,
) -> Result<RunRecord, AppError> {
    let profile = CheckProfile {
        domain: config.domain.as_ref(),
        login_password_user: None,
        policy: Some(&CODE_SERVER_POLICY),
        password: config.password.as_deref(),
    };
    let report = checks::evaluate(&facts, &profile);
    let accepted = checks::enforce(&report, confirmer)?;

    let mut cx = StepContext::new(config, system, accepted);
    let steps = steps();
    Sequencer::new().run(&steps, &mut cx).await?;

    let record = build_record(&cx);
    let record_path = if cx.system.dry_run {
        None
    } else {
        Some(record.save(&cx.system.paths.records_dir())?)
    };
    ui::print_code_server_summary(&record, record_path.as_deref());
    Ok(record)
}

fn steps() -> Vec<Box<dyn Step>> {
    vec![
        Box::new(InstallBasePackages),
        Box::new(InstallCodeServer),
        Box::new(ReserveBackendPort),
        Box::new(InstallIdeUnit),
        Box::new(StartIdeService),
        Box::new(WriteProxyCredentials),
        Box::new(PublishHttpRoute),
        Box::new(ObtainCertificate),
        Box::new(PublishTlsRoute),
        Box::new(ScheduleRenewal),
    ]
}

fn build_record(cx: &StepContext) -> RunRecord {
    RunRecord {
        id: Uuid::new_v4().to_string(),
        workflow: "code-server".to_string(),
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

async fn code_server_installed(cx: &StepContext) -> bool {
    cx.system
        .runner
        .run(&CommandSpec::new("code-server", &["--version"]).probe())
        .await
        .map(|out| out.success())
        .unwrap_or(false)
}

struct InstallBasePackages;

#[async_trait]
impl Step for InstallBasePackages {
    fn name(&self) -> &'static str {
        "Install base packages"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        cx.system.pkg.refresh().await?;
        cx.system.pkg.install(&["nginx", "certbot"]).await?;
        Ok(())
    }

    async fn verify(&self, cx: &StepContext) -> Result<(), AppError> {
        for package in ["nginx", "certbot"] {
            if !cx.system.pkg.installed(package).await? {
                return Err(AppError::Verification(format!(
                    "package '{package}' is not installed"
                )));
            }
        }
        Ok(())
    }
}

struct InstallCodeServer;

#[async_trait]
impl Step for InstallCodeServer {
    fn name(&self) -> &'static str {
        "Install code-server"
    }

    async fn precondition(&self, cx: &StepContext) -> Result<StepDisposition, AppError> {
        if code_server_installed(cx).await {
            Ok(StepDisposition::Skip("code-server already installed".to_string()))
        } else {
            Ok(StepDisposition::Run)
        }
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        cx.system
            .runner
            .run_ok(&CommandSpec::shell(INSTALLER))
            .await?;
        Ok(())
    }

    async fn verify(&self, cx: &StepContext) -> Result<(), AppError> {
        if code_server_installed(cx).await {
            Ok(())
        } else {
            Err(AppError::Verification(
                "code-server binary not found after install".to_string(),
            ))
        }
    }
}

struct ReserveBackendPort;

#[async_trait]
impl Step for ReserveBackendPort {
    fn name(&self) -> &'static str {
        "Reserve IDE backend port"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        let lease = ports::allocate(cx.config.preferred_port)?;
        cx.record_port("ide", lease.port());
        cx.backend = Some(lease);
        Ok(())
    }
}

struct InstallIdeUnit;

#[async_trait]
impl Step for InstallIdeUnit {
    fn name(&self) -> &'static str {
        "Install IDE service unit"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        let port = cx.backend_port()?;
        let unit = ServiceUnit {
            description: "code-server web IDE".to_string(),
            user: cx.config.system_user.clone(),
            exec_start: format!("/usr/bin/code-server --bind-addr 127.0.0.1:{port} --auth none"),
            environment: vec![],
        };
        let path = cx.system.paths.systemd_dir.join(format!("{UNIT}.service"));
        cx.system
            .write_privileged(&path, &unit.render(), "0644", None)
            .await?;
        cx.system.svc.daemon_reload().await?;
        cx.record_artifact(path);
        Ok(())
    }
}

struct StartIdeService;

#[async_trait]
impl Step for StartIdeService {
    fn name(&self) -> &'static str {
        "Start IDE service"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        // Hand the reserved port over to the service.
        if let Some(lease) = cx.backend.as_mut() {
            lease.release();
        }
        cx.system.svc.enable_now(UNIT).await?;
        Ok(())
    }

    async fn verify(&self, cx: &StepContext) -> Result<(), AppError> {
        cx.system.svc.wait_active(UNIT, SERVICE_START_WAIT).await
    }
}

struct WriteProxyCredentials;

#[async_trait]
impl Step for WriteProxyCredentials {
    fn name(&self) -> &'static str {
        "Write proxy credentials"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        let domain = cx.config.domain()?.clone();
        let username = cx.config.username.clone();
        let password = cx.config.password()?.to_string();

        // Fixed salt keeps the file byte-stable across re-runs; the password
        // itself only ever crosses over stdin.
        let salt = render::digest_salt(domain.as_str(), &username);
        let out = cx
            .system
            .runner
            .run_ok(
                &CommandSpec::new("openssl", &["passwd", "-apr1", "-salt", &salt, "-stdin"])
                    .stdin(password),
            )
            .await?;
        let digest = first_token(&out.stdout)?;

        let path = cx.system.paths.nginx_auth_dir.join(AUTH_FILE);
        cx.system
            .write_privileged(
                &path,
                &render::render_htpasswd(&username, &digest),
                "0640",
                Some("www-data"),
            )
            .await?;
        cx.record_artifact(path);
        Ok(())
    }
}

struct PublishHttpRoute;

#[async_trait]
impl Step for PublishHttpRoute {
    fn name(&self) -> &'static str {
        "Publish HTTP proxy route"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        let domain = cx.config.domain()?.clone();
        cx.system
            .ensure_dir_privileged(&cx.system.paths.acme_webroot, "0755")
            .await?;
        let site = ProxySite {
            server_name: Some(domain.to_string()),
            backend_port: cx.backend_port()?,
            location: "/".to_string(),
            auth_file: Some(cx.system.paths.nginx_auth_dir.join(AUTH_FILE)),
            acme_webroot: Some(cx.system.paths.acme_webroot.clone()),
            tls: None,
        };
        cx.system.proxy.install_site(SITE, &site.render()).await?;
        cx.system.proxy.check_config().await?;
        cx.system.proxy.reload().await?;
        cx.record_artifact(cx.system.proxy.site_path(SITE));
        Ok(())
    }
}

struct ObtainCertificate;

#[async_trait]
impl Step for ObtainCertificate {
    fn name(&self) -> &'static str {
        "Obtain TLS certificate"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        let domain = cx.config.domain()?.clone();
        cx.system
            .certs
            .issue(&domain, &cx.system.paths.acme_webroot)
            .await?;
        cx.cert_issued = true;
        Ok(())
    }

    async fn verify(&self, cx: &StepContext) -> Result<(), AppError> {
        let domain = cx.config.domain()?;
        if cx.system.certs.ready(domain).await? {
            Ok(())
        } else {
            Err(AppError::Verification(format!(
                "no certificate files under {}",
                cx.system.certs.live_dir(domain).display()
            )))
        }
    }
}

struct PublishTlsRoute;

#[async_trait]
impl Step for PublishTlsRoute {
    fn name(&self) -> &'static str {
        "Publish TLS proxy route"
    }

    async fn precondition(&self, cx: &StepContext) -> Result<StepDisposition, AppError> {
        // Never serve a TLS config pointing at certificate files that were
        // not just confirmed.
        if cx.cert_issued {
            Ok(StepDisposition::Run)
        } else {
            Err(AppError::Precondition(
                "certificate issuance has not succeeded".to_string(),
            ))
        }
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        let domain = cx.config.domain()?.clone();
        let live = cx.system.certs.live_dir(&domain);
        let site = ProxySite {
            server_name: Some(domain.to_string()),
            backend_port: cx.backend_port()?,
            location: "/".to_string(),
            auth_file: Some(cx.system.paths.nginx_auth_dir.join(AUTH_FILE)),
            acme_webroot: Some(cx.system.paths.acme_webroot.clone()),
            tls: Some(TlsPaths {
                certificate: live.join("fullchain.pem"),
                certificate_key: live.join("privkey.pem"),
            }),
        };
        cx.system.proxy.install_site(SITE, &site.render()).await?;
        cx.system.proxy.check_config().await?;
        cx.system.proxy.reload().await?;
        Ok(())
    }
}

struct ScheduleRenewal;

#[async_trait]
impl Step for ScheduleRenewal {
    fn name(&self) -> &'static str {
        "Schedule certificate renewal"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        // Cron table mutation is best-effort: certbot's own packaging
        // usually ships a systemd timer that covers renewal anyway.
        let line = render::renewal_cron_line();
        let script = format!(
            "{{ crontab -l 2>/dev/null | grep -v '{marker}'; echo '{line}'; }} | crontab -",
            marker = render::CRON_MARKER,
        );
        best_effort(
            "renewal cron entry",
            cx.system
                .runner
                .run_ok(&CommandSpec::shell(&script).sudo())
                .await,
        );
        Ok(())
    }
}
