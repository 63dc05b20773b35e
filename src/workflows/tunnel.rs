use crate::checks::{self, CheckProfile, HostFacts};
use crate::config::{
    self, RunRecord, TunnelName, WorkflowConfig, AUTH_POLL, AUTH_WAIT, DEFAULT_BACKEND_PORT,
    SERVICE_START_WAIT,
};
use crate::error::AppError;
use crate::render::ServiceUnit;
use crate::steps::{Sequencer, Step, StepContext, StepDisposition};
use crate::system::vscode::{AuthOutcome, VsCodeCli};
use crate::system::System;
use crate::ui::{self, Confirmer};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

const UNIT: &str = "vscode-tunnel";
const DEFAULT_NAME: &str = "dev-tunnel";

pub struct TunnelArgs {
    pub name: Option<String>,
    pub assume_yes: bool,
}

pub async fn run(
    args: TunnelArgs,
    system: System,
    confirmer: &mut dyn Confirmer,
) -> Result<(), AppError> {
    let config = collect_config(&args)?;
    let facts = if system.dry_run {
        HostFacts::simulated()
    } else {
        let spinner = ui::spinner("Probing host state...");
        let facts = checks::gather(system.runner.as_ref(), None, None).await;
        spinner.finish_and_clear();
        facts
    };
    execute(config, facts, system, confirmer).await?;
    Ok(())
}

fn collect_config(args: &TunnelArgs) -> Result<WorkflowConfig, AppError> {
    let system_user = config::system_user();
    let name = match &args.name {
        Some(raw) => TunnelName::parse(raw)?,
        None if args.assume_yes => TunnelName::parse(DEFAULT_NAME)?,
        None => ui::prompt_tunnel_name(DEFAULT_NAME)?,
    };

    Ok(WorkflowConfig {
        domain: None,
        username: system_user.clone(),
        password: None,
        tunnel_name: Some(name),
        preferred_port: DEFAULT_BACKEND_PORT,
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
        domain: None,
        login_password_user: None,
        policy: None,
        password: None,
    };
    let report = checks::evaluate(&facts, &profile);
    let accepted = checks::enforce(&report, confirmer)?;

    let name = config.tunnel_name()?.to_string();

    let mut cx = StepContext::new(config, system, accepted);
    let steps = steps();
    Sequencer::new().run(&steps, &mut cx).await?;

    let record = build_record(&cx);
    let record_path = if cx.system.dry_run {
        None
    } else {
        Some(record.save(&cx.system.paths.records_dir())?)
    };
    ui::print_tunnel_summary(&name, record_path.as_deref());
    Ok(record)
}

fn steps() -> Vec<Box<dyn Step>> {
    vec![
        Box::new(InstallVsCodeCli),
        Box::new(AuthenticateTunnel),
        Box::new(InstallTunnelService),
    ]
}

fn build_record(cx: &StepContext) -> RunRecord {
    RunRecord {
        id: Uuid::new_v4().to_string(),
        workflow: "tunnel".to_string(),
        domain: None,
        tunnel: cx.config.tunnel_name.as_ref().map(|n| n.to_string()),
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

fn cli(cx: &StepContext) -> VsCodeCli {
    VsCodeCli::new(cx.system.runner.clone(), cx.system.paths.vscode_cli.clone())
}

struct InstallVsCodeCli;

#[async_trait]
impl Step for InstallVsCodeCli {
    fn name(&self) -> &'static str {
        "Install VS Code CLI"
    }

    async fn precondition(&self, cx: &StepContext) -> Result<StepDisposition, AppError> {
        if cli(cx).installed().await {
            Ok(StepDisposition::Skip("CLI already installed".to_string()))
        } else {
            Ok(StepDisposition::Run)
        }
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        let cli = cli(cx);
        cx.system.runner.run_ok(&cli.download_spec()).await?;
        cx.record_artifact(cli.cli_path().clone());
        Ok(())
    }

    async fn verify(&self, cx: &StepContext) -> Result<(), AppError> {
        if cli(cx).installed().await {
            Ok(())
        } else {
            Err(AppError::Verification(format!(
                "{} did not respond to --version",
                cx.system.paths.vscode_cli.display()
            )))
        }
    }
}

struct AuthenticateTunnel;

#[async_trait]
impl Step for AuthenticateTunnel {
    fn name(&self) -> &'static str {
        "Authenticate with tunnel account"
    }

    async fn precondition(&self, cx: &StepContext) -> Result<StepDisposition, AppError> {
        if cli(cx).logged_in().await? {
            Ok(StepDisposition::Skip("already signed in".to_string()))
        } else {
            Ok(StepDisposition::Run)
        }
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        if cx.system.dry_run {
            info!("would start device authentication and wait for sign-in");
            return Ok(());
        }
        match cli(cx).authenticate(AUTH_WAIT, AUTH_POLL).await? {
            AuthOutcome::AlreadyAuthenticated | AuthOutcome::Authenticated => {}
            AuthOutcome::TimedOut => {
                // Leave the final judgement to the verify phase; a late
                // sign-in may still have landed.
                warn!("sign-in deadline passed");
            }
        }
        Ok(())
    }

    async fn verify(&self, cx: &StepContext) -> Result<(), AppError> {
        if cli(cx).logged_in().await? {
            Ok(())
        } else {
            Err(AppError::Verification(
                "device sign-in was not completed".to_string(),
            ))
        }
    }
}

struct InstallTunnelService;

#[async_trait]
impl Step for InstallTunnelService {
    fn name(&self) -> &'static str {
        "Install tunnel service"
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError> {
        let name = cx.config.tunnel_name()?.clone();
        let unit = ServiceUnit {
            description: format!("VS Code tunnel '{name}'"),
            user: cx.config.system_user.clone(),
            exec_start: format!(
                "{} tunnel --name {} --accept-server-license-terms",
                cx.system.paths.vscode_cli.display(),
                name
            ),
            environment: vec![],
        };
        let path = cx.system.paths.systemd_dir.join(format!("{UNIT}.service"));
        cx.system
            .write_privileged(&path, &unit.render(), "0644", None)
            .await?;
        cx.system.svc.daemon_reload().await?;
        cx.system.svc.enable_now(UNIT).await?;
        cx.record_artifact(path);
        Ok(())
    }

    async fn verify(&self, cx: &StepContext) -> Result<(), AppError> {
        cx.system.svc.wait_active(UNIT, SERVICE_START_WAIT).await
    }
}
