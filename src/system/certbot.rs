use crate::config::DomainName;
use crate::error::AppError;
use crate::runner::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Obtain (or keep, if still valid) a certificate via the webroot
    /// challenge. The HTTP site serving the webroot must be live first.
    async fn issue(&self, domain: &DomainName, webroot: &Path) -> Result<(), AppError>;
    async fn ready(&self, domain: &DomainName) -> Result<bool, AppError>;
    async fn delete(&self, domain: &DomainName) -> Result<(), AppError>;
    fn live_dir(&self, domain: &DomainName) -> PathBuf;
}

pub struct Certbot {
    runner: Arc<dyn CommandRunner>,
    live_root: PathBuf,
}

impl Certbot {
    pub fn new(runner: Arc<dyn CommandRunner>, live_root: PathBuf) -> Self {
        Self { runner, live_root }
    }
}

#[async_trait]
impl CertificateAuthority for Certbot {
    async fn issue(&self, domain: &DomainName, webroot: &Path) -> Result<(), AppError> {
        let webroot = webroot.display().to_string();
        self.runner
            .run_ok(
                &CommandSpec::new(
                    "certbot",
                    &[
                        "certonly",
                        "--non-interactive",
                        "--agree-tos",
                        "--register-unsafely-without-email",
                        "--keep-until-expiring",
                        "--webroot",
                        "-w",
                        &webroot,
                        "-d",
                        domain.as_str(),
                    ],
                )
                .sudo(),
            )
            .await?;
        Ok(())
    }

    /// The live directory is root-only, so even the existence probe needs sudo.
    async fn ready(&self, domain: &DomainName) -> Result<bool, AppError> {
        let fullchain = self
            .live_dir(domain)
            .join("fullchain.pem")
            .display()
            .to_string();
        let out = self
            .runner
            .run(&CommandSpec::new("test", &["-f", &fullchain]).sudo().probe())
            .await?;
        Ok(out.success())
    }

    async fn delete(&self, domain: &DomainName) -> Result<(), AppError> {
        self.runner
            .run_ok(
                &CommandSpec::new(
                    "certbot",
                    &["delete", "--non-interactive", "--cert-name", domain.as_str()],
                )
                .sudo(),
            )
            .await?;
        Ok(())
    }

    fn live_dir(&self, domain: &DomainName) -> PathBuf {
        self.live_root.join(domain.as_str())
    }
}
