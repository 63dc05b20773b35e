pub mod apt;
pub mod certbot;
pub mod nginx;
pub mod systemd;
pub mod vscode;

pub use apt::{Apt, PackageManager};
pub use certbot::{Certbot, CertificateAuthority};
pub use nginx::{Nginx, ProxyController};
pub use systemd::{ServiceManager, Systemctl};
pub use vscode::{AuthOutcome, VsCodeCli};

use crate::error::AppError;
use crate::runner::{CommandRunner, CommandSpec, DryRunRunner, HostRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Filesystem locations a workflow touches. Overridable so tests can point
/// everything at a sandbox directory.
#[derive(Debug, Clone)]
pub struct TargetPaths {
    pub systemd_dir: PathBuf,
    pub nginx_sites_available: PathBuf,
    pub nginx_sites_enabled: PathBuf,
    pub nginx_auth_dir: PathBuf,
    pub acme_webroot: PathBuf,
    pub letsencrypt_live: PathBuf,
    pub guacamole_dir: PathBuf,
    pub vscode_cli: PathBuf,
    pub home: PathBuf,
    pub state_dir: PathBuf,
}

impl TargetPaths {
    pub fn system() -> Result<Self, AppError> {
        let home = dirs::home_dir().ok_or(AppError::HomeDirNotFound)?;
        Ok(Self {
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            nginx_sites_available: PathBuf::from("/etc/nginx/sites-available"),
            nginx_sites_enabled: PathBuf::from("/etc/nginx/sites-enabled"),
            nginx_auth_dir: PathBuf::from("/etc/nginx"),
            acme_webroot: PathBuf::from("/var/www/letsencrypt"),
            letsencrypt_live: PathBuf::from("/etc/letsencrypt/live"),
            guacamole_dir: PathBuf::from("/opt/devserv/guacamole"),
            vscode_cli: PathBuf::from("/usr/local/bin/code"),
            state_dir: home.join(".devserv"),
            home,
        })
    }

    /// Everything under one root, for tests.
    pub fn under(root: &Path) -> Self {
        Self {
            systemd_dir: root.join("etc/systemd/system"),
            nginx_sites_available: root.join("etc/nginx/sites-available"),
            nginx_sites_enabled: root.join("etc/nginx/sites-enabled"),
            nginx_auth_dir: root.join("etc/nginx"),
            acme_webroot: root.join("var/www/letsencrypt"),
            letsencrypt_live: root.join("etc/letsencrypt/live"),
            guacamole_dir: root.join("opt/devserv/guacamole"),
            vscode_cli: root.join("usr/local/bin/code"),
            home: root.join("home"),
            state_dir: root.join("state"),
        }
    }

    pub fn records_dir(&self) -> PathBuf {
        self.state_dir.join("records")
    }
}

/// Write a root-owned file in one privileged command, content over stdin so
/// it never appears in argv or the process table.
pub(crate) async fn install_file(
    runner: &dyn CommandRunner,
    path: &Path,
    content: &str,
    mode: &str,
    group: Option<&str>,
) -> Result<(), AppError> {
    let path = path.display().to_string();
    let mut args = vec!["-D", "-m", mode];
    if let Some(group) = group {
        args.extend(["-g", group]);
    }
    args.extend(["/dev/stdin", path.as_str()]);
    runner
        .run_ok(&CommandSpec::new("install", &args).sudo().stdin(content))
        .await?;
    Ok(())
}

/// The machine, as workflows see it: one command runner plus the capability
/// interfaces built on top of it.
pub struct System {
    pub runner: Arc<dyn CommandRunner>,
    pub pkg: Box<dyn PackageManager>,
    pub svc: Box<dyn ServiceManager>,
    pub proxy: Box<dyn ProxyController>,
    pub certs: Box<dyn CertificateAuthority>,
    pub paths: TargetPaths,
    pub dry_run: bool,
}

impl System {
    pub fn host() -> Result<Self, AppError> {
        Ok(Self::with_runner(
            Arc::new(HostRunner),
            TargetPaths::system()?,
            false,
        ))
    }

    pub fn dry_run() -> Result<Self, AppError> {
        Ok(Self::with_runner(
            Arc::new(DryRunRunner),
            TargetPaths::system()?,
            true,
        ))
    }

    pub fn with_runner(
        runner: Arc<dyn CommandRunner>,
        paths: TargetPaths,
        dry_run: bool,
    ) -> Self {
        let pkg = Box::new(Apt::new(runner.clone()));
        let svc = Box::new(Systemctl::new(runner.clone()));
        let proxy = Box::new(Nginx::new(
            runner.clone(),
            paths.nginx_sites_available.clone(),
            paths.nginx_sites_enabled.clone(),
        ));
        let certs = Box::new(Certbot::new(runner.clone(), paths.letsencrypt_live.clone()));
        Self {
            runner,
            pkg,
            svc,
            proxy,
            certs,
            paths,
            dry_run,
        }
    }

    /// Write a root-owned file, creating parent directories.
    pub async fn write_privileged(
        &self,
        path: &Path,
        content: &str,
        mode: &str,
        group: Option<&str>,
    ) -> Result<(), AppError> {
        debug!("writing {} (mode {mode})", path.display());
        install_file(self.runner.as_ref(), path, content, mode, group).await
    }

    pub async fn remove_privileged(&self, path: &Path) -> Result<(), AppError> {
        let path = path.display().to_string();
        self.runner
            .run_ok(&CommandSpec::new("rm", &["-rf", &path]).sudo())
            .await?;
        Ok(())
    }

    pub async fn ensure_dir_privileged(&self, path: &Path, mode: &str) -> Result<(), AppError> {
        let path = path.display().to_string();
        self.runner
            .run_ok(&CommandSpec::new("install", &["-d", "-m", mode, &path]).sudo())
            .await?;
        Ok(())
    }

    /// Write a file the invoking user owns, e.g. ~/.xsession.
    pub fn write_user_file(&self, path: &Path, content: &str) -> Result<(), AppError> {
        if self.dry_run {
            info!("dry-run: would write {} ({} bytes)", path.display(), content.len());
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn remove_user_path(&self, path: &Path) -> Result<(), AppError> {
        if self.dry_run {
            info!("dry-run: would remove {}", path.display());
            return Ok(());
        }
        if path.is_dir() {
            std::fs::remove_dir_all(path)?;
        } else if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
