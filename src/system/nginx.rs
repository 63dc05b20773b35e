use crate::error::AppError;
use crate::runner::{CommandRunner, CommandSpec};
use crate::system::install_file;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// The reverse proxy, which is the only public entry point for the
/// browser-facing services.
#[async_trait]
pub trait ProxyController: Send + Sync {
    /// Write the site into sites-available and link it into sites-enabled.
    /// Re-installing an existing site overwrites it.
    async fn install_site(&self, name: &str, content: &str) -> Result<(), AppError>;
    async fn remove_site(&self, name: &str) -> Result<(), AppError>;
    /// Unlink the distribution's default catch-all site so ours can take
    /// `default_server` on port 80.
    async fn disable_stock_site(&self) -> Result<(), AppError>;
    async fn check_config(&self) -> Result<(), AppError>;
    async fn reload(&self) -> Result<(), AppError>;
    fn site_path(&self, name: &str) -> PathBuf;
}

pub struct Nginx {
    runner: Arc<dyn CommandRunner>,
    sites_available: PathBuf,
    sites_enabled: PathBuf,
}

impl Nginx {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        sites_available: PathBuf,
        sites_enabled: PathBuf,
    ) -> Self {
        Self {
            runner,
            sites_available,
            sites_enabled,
        }
    }
}

#[async_trait]
impl ProxyController for Nginx {
    async fn install_site(&self, name: &str, content: &str) -> Result<(), AppError> {
        let available = self.sites_available.join(name);
        let enabled = self.sites_enabled.join(name);
        install_file(self.runner.as_ref(), &available, content, "0644", None).await?;
        let available = available.display().to_string();
        let enabled = enabled.display().to_string();
        self.runner
            .run_ok(&CommandSpec::new("ln", &["-sfn", &available, &enabled]).sudo())
            .await?;
        Ok(())
    }

    async fn remove_site(&self, name: &str) -> Result<(), AppError> {
        let enabled = self.sites_enabled.join(name).display().to_string();
        let available = self.sites_available.join(name).display().to_string();
        self.runner
            .run_ok(&CommandSpec::new("rm", &["-f", &enabled, &available]).sudo())
            .await?;
        Ok(())
    }

    async fn disable_stock_site(&self) -> Result<(), AppError> {
        let default = self.sites_enabled.join("default").display().to_string();
        self.runner
            .run_ok(&CommandSpec::new("rm", &["-f", &default]).sudo())
            .await?;
        Ok(())
    }

    async fn check_config(&self) -> Result<(), AppError> {
        self.runner
            .run_ok(&CommandSpec::new("nginx", &["-t"]).sudo())
            .await?;
        Ok(())
    }

    async fn reload(&self) -> Result<(), AppError> {
        self.runner
            .run_ok(&CommandSpec::new("systemctl", &["reload", "nginx"]).sudo())
            .await?;
        Ok(())
    }

    fn site_path(&self, name: &str) -> PathBuf {
        self.sites_available.join(name)
    }
}
