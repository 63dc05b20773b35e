use crate::config::SERVICE_POLL;
use crate::error::AppError;
use crate::runner::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn daemon_reload(&self) -> Result<(), AppError>;
    async fn enable_now(&self, unit: &str) -> Result<(), AppError>;
    async fn stop(&self, unit: &str) -> Result<(), AppError>;
    async fn disable(&self, unit: &str) -> Result<(), AppError>;
    async fn is_active(&self, unit: &str) -> Result<bool, AppError>;

    /// Poll until the unit reports active. Units that fork or retry take a
    /// moment to settle after `enable --now`, so start verification waits
    /// instead of sampling once.
    async fn wait_active(&self, unit: &str, timeout: Duration) -> Result<(), AppError> {
        let started = Instant::now();
        loop {
            if self.is_active(unit).await? {
                return Ok(());
            }
            if started.elapsed() > timeout {
                return Err(AppError::Timeout(format!("service '{unit}' to become active")));
            }
            tokio::time::sleep(SERVICE_POLL).await;
        }
    }
}

pub struct Systemctl {
    runner: Arc<dyn CommandRunner>,
}

impl Systemctl {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn systemctl(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new("systemctl", args).sudo()
    }
}

#[async_trait]
impl ServiceManager for Systemctl {
    async fn daemon_reload(&self) -> Result<(), AppError> {
        self.runner
            .run_ok(&self.systemctl(&["daemon-reload"]))
            .await?;
        Ok(())
    }

    async fn enable_now(&self, unit: &str) -> Result<(), AppError> {
        self.runner
            .run_ok(&self.systemctl(&["enable", "--now", unit]))
            .await?;
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<(), AppError> {
        self.runner.run_ok(&self.systemctl(&["stop", unit])).await?;
        Ok(())
    }

    async fn disable(&self, unit: &str) -> Result<(), AppError> {
        self.runner
            .run_ok(&self.systemctl(&["disable", unit]))
            .await?;
        Ok(())
    }

    /// `systemctl is-active` exits zero only for an active unit.
    async fn is_active(&self, unit: &str) -> Result<bool, AppError> {
        let out = self
            .runner
            .run(&CommandSpec::new("systemctl", &["is-active", "--quiet", unit]).probe())
            .await?;
        Ok(out.success())
    }
}
