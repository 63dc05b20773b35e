use crate::config::{DomainName, RunRecord};
use crate::error::AppError;
use crate::render;
use crate::runner::{best_effort, CommandSpec};
use crate::system::System;
use crate::ui::{self, Confirmer};
use async_trait::async_trait;
use console::style;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    CodeServer,
    Desktop,
    Tunnel,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::CodeServer, Target::Desktop, Target::Tunnel];

    pub fn workflow(self) -> &'static str {
        match self {
            Target::CodeServer => "code-server",
            Target::Desktop => "desktop",
            Target::Tunnel => "tunnel",
        }
    }
}

/// One reversible piece of an install. Detection is conservative: claim
/// presence only when removal would actually do something, so a re-run on a
/// clean host reports nothing instead of failing.
#[async_trait]
trait Removal: Send + Sync {
    fn label(&self) -> String;
    async fn detect(&self, system: &System) -> bool;
    async fn remove(&self, system: &System) -> Result<(), AppError>;
}

pub async fn run(
    targets: &[Target],
    system: System,
    confirmer: &mut dyn Confirmer,
) -> Result<(), AppError> {
    let mut planned: Vec<(Target, Box<dyn Removal>)> = Vec::new();
    for &target in targets {
        for removal in removals(target, &system) {
            planned.push((target, removal));
        }
    }

    let spinner = ui::spinner("Scanning for installed components...");
    let mut present: Vec<(Target, Box<dyn Removal>)> = Vec::new();
    for (target, removal) in planned {
        if removal.detect(&system).await {
            present.push((target, removal));
        }
    }
    spinner.finish_and_clear();

    if present.is_empty() {
        println!("Nothing to remove.");
        return Ok(());
    }

    println!("\nThe following will be removed:");
    for (target, removal) in &present {
        println!(
            "  {} [{}] {}",
            style("-").dim(),
            target.workflow(),
            removal.label()
        );
    }
    println!();

    if !confirmer.confirm("Proceed with removal?", false)? {
        return Err(AppError::Declined("uninstall".to_string()));
    }

    let total = present.len();
    let mut failures = 0usize;
    for (_, removal) in &present {
        info!("removing {}", removal.label());
        if let Err(err) = removal.remove(&system).await {
            warn!("could not remove {}: {err}", removal.label());
            failures += 1;
        }
    }

    if !system.dry_run {
        for &target in targets {
            let record = system
                .paths
                .records_dir()
                .join(format!("{}.json", target.workflow()));
            if record.exists() {
                let _ = std::fs::remove_file(&record);
            }
        }
    }

    if failures > 0 {
        return Err(AppError::StepFailed {
            step: "uninstall".to_string(),
            message: format!("{failures} of {total} removals failed"),
        });
    }
    println!("{} Removed {total} item(s).", style("✓").green());
    Ok(())
}

fn removals(target: Target, system: &System) -> Vec<Box<dyn Removal>> {
    let paths = &system.paths;
    match target {
        // Service first, shared infrastructure (nginx, certbot) stays
        // installed, user data goes last.
        Target::CodeServer => {
            let domain = recorded_domain(system, "code-server");
            vec![
                Box::new(UnitRemoval {
                    unit: "code-server",
                    file: paths.systemd_dir.join("code-server.service"),
                }),
                Box::new(PackageRemoval {
                    label: "code-server package",
                    packages: &["code-server"],
                }),
                Box::new(CronRemoval),
                Box::new(CertRemoval { domain }),
                Box::new(SiteRemoval { site: "code-server" }),
                Box::new(PrivilegedPathRemoval {
                    label: "proxy credentials".to_string(),
                    path: paths.nginx_auth_dir.join(".htpasswd-code-server"),
                }),
                Box::new(UserPathRemoval {
                    label: "IDE user data".to_string(),
                    path: paths.home.join(".local/share/code-server"),
                }),
                Box::new(UserPathRemoval {
                    label: "IDE user config".to_string(),
                    path: paths.home.join(".config/code-server"),
                }),
            ]
        }
        Target::Desktop => vec![
            Box::new(ComposeDown {
                file: paths.guacamole_dir.join("docker-compose.yml"),
            }),
            Box::new(SiteRemoval { site: "desktop" }),
            Box::new(PackageRemoval {
                label: "desktop packages",
                packages: &["xrdp", "xfce4", "xfce4-goodies"],
            }),
            Box::new(UserPathRemoval {
                label: "desktop session file".to_string(),
                path: paths.home.join(".xsession"),
            }),
            Box::new(PrivilegedPathRemoval {
                label: "gateway files".to_string(),
                path: paths.guacamole_dir.clone(),
            }),
        ],
        Target::Tunnel => vec![
            Box::new(UnitRemoval {
                unit: "vscode-tunnel",
                file: paths.systemd_dir.join("vscode-tunnel.service"),
            }),
            Box::new(CliRemoval {
                path: paths.vscode_cli.clone(),
            }),
            Box::new(UserPathRemoval {
                label: "tunnel CLI state".to_string(),
                path: paths.home.join(".vscode/cli"),
            }),
        ],
    }
}

fn recorded_domain(system: &System, workflow: &str) -> Option<DomainName> {
    let record = RunRecord::load(&system.paths.records_dir(), workflow)
        .ok()
        .flatten()?;
    DomainName::parse(&record.domain?).ok()
}

fn present_on_disk(path: &std::path::Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

struct UnitRemoval {
    unit: &'static str,
    file: PathBuf,
}

#[async_trait]
impl Removal for UnitRemoval {
    fn label(&self) -> String {
        format!("systemd unit '{}'", self.unit)
    }

    async fn detect(&self, _system: &System) -> bool {
        present_on_disk(&self.file)
    }

    async fn remove(&self, system: &System) -> Result<(), AppError> {
        best_effort("service stop", system.svc.stop(self.unit).await);
        best_effort("service disable", system.svc.disable(self.unit).await);
        system.remove_privileged(&self.file).await?;
        system.svc.daemon_reload().await?;
        Ok(())
    }
}

struct PackageRemoval {
    label: &'static str,
    packages: &'static [&'static str],
}

#[async_trait]
impl Removal for PackageRemoval {
    fn label(&self) -> String {
        format!("{} ({})", self.label, self.packages.join(", "))
    }

    async fn detect(&self, system: &System) -> bool {
        for package in self.packages {
            if system.pkg.installed(package).await.unwrap_or(false) {
                return true;
            }
        }
        false
    }

    async fn remove(&self, system: &System) -> Result<(), AppError> {
        system.pkg.remove(self.packages).await
    }
}

struct CronRemoval;

#[async_trait]
impl Removal for CronRemoval {
    fn label(&self) -> String {
        "certificate renewal cron entry".to_string()
    }

    async fn detect(&self, system: &System) -> bool {
        let spec = CommandSpec::shell(&format!(
            "crontab -l 2>/dev/null | grep -q '{}'",
            render::CRON_MARKER
        ))
        .sudo()
        .probe();
        system
            .runner
            .run(&spec)
            .await
            .map(|out| out.success())
            .unwrap_or(false)
    }

    async fn remove(&self, system: &System) -> Result<(), AppError> {
        let script = format!(
            "{{ crontab -l 2>/dev/null | grep -v '{}'; true; }} | crontab -",
            render::CRON_MARKER
        );
        system
            .runner
            .run_ok(&CommandSpec::shell(&script).sudo())
            .await?;
        Ok(())
    }
}

struct CertRemoval {
    domain: Option<DomainName>,
}

#[async_trait]
impl Removal for CertRemoval {
    fn label(&self) -> String {
        match &self.domain {
            Some(domain) => format!("TLS certificate for {domain}"),
            None => "TLS certificate".to_string(),
        }
    }

    async fn detect(&self, system: &System) -> bool {
        match &self.domain {
            Some(domain) => system.certs.ready(domain).await.unwrap_or(false),
            None => false,
        }
    }

    async fn remove(&self, system: &System) -> Result<(), AppError> {
        match &self.domain {
            Some(domain) => system.certs.delete(domain).await,
            None => Ok(()),
        }
    }
}

struct SiteRemoval {
    site: &'static str,
}

#[async_trait]
impl Removal for SiteRemoval {
    fn label(&self) -> String {
        format!("proxy site '{}'", self.site)
    }

    async fn detect(&self, system: &System) -> bool {
        present_on_disk(&system.proxy.site_path(self.site))
    }

    async fn remove(&self, system: &System) -> Result<(), AppError> {
        system.proxy.remove_site(self.site).await?;
        best_effort("proxy reload", system.proxy.reload().await);
        Ok(())
    }
}

struct ComposeDown {
    file: PathBuf,
}

#[async_trait]
impl Removal for ComposeDown {
    fn label(&self) -> String {
        "gateway containers".to_string()
    }

    async fn detect(&self, _system: &System) -> bool {
        present_on_disk(&self.file)
    }

    async fn remove(&self, system: &System) -> Result<(), AppError> {
        let file = self.file.display().to_string();
        system
            .runner
            .run_ok(&CommandSpec::new("docker", &["compose", "-f", &file, "down"]).sudo())
            .await?;
        Ok(())
    }
}

struct PrivilegedPathRemoval {
    label: String,
    path: PathBuf,
}

#[async_trait]
impl Removal for PrivilegedPathRemoval {
    fn label(&self) -> String {
        format!("{} ({})", self.label, self.path.display())
    }

    async fn detect(&self, _system: &System) -> bool {
        present_on_disk(&self.path)
    }

    async fn remove(&self, system: &System) -> Result<(), AppError> {
        system.remove_privileged(&self.path).await
    }
}

struct UserPathRemoval {
    label: String,
    path: PathBuf,
}

#[async_trait]
impl Removal for UserPathRemoval {
    fn label(&self) -> String {
        format!("{} ({})", self.label, self.path.display())
    }

    async fn detect(&self, _system: &System) -> bool {
        present_on_disk(&self.path)
    }

    async fn remove(&self, system: &System) -> Result<(), AppError> {
        system.remove_user_path(&self.path)
    }
}

struct CliRemoval {
    path: PathBuf,
}

#[async_trait]
impl Removal for CliRemoval {
    fn label(&self) -> String {
        format!("VS Code CLI ({})", self.path.display())
    }

    async fn detect(&self, _system: &System) -> bool {
        present_on_disk(&self.path)
    }

    async fn remove(&self, system: &System) -> Result<(), AppError> {
        let cli = self.path.display().to_string();
        best_effort(
            "tunnel unregister",
            system
                .runner
                .run_ok(&CommandSpec::new(&cli, &["tunnel", "unregister"]))
                .await,
        );
        system.remove_privileged(&self.path).await
    }
}
