use crate::error::AppError;
use crate::runner::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::sync::Arc;

/// Package installation and removal. Every method is idempotent from the
/// workflow's point of view: installing an installed package is a no-op.
#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn refresh(&self) -> Result<(), AppError>;
    async fn install(&self, packages: &[&str]) -> Result<(), AppError>;
    async fn remove(&self, packages: &[&str]) -> Result<(), AppError>;
    async fn installed(&self, package: &str) -> Result<bool, AppError>;
}

pub struct Apt {
    runner: Arc<dyn CommandRunner>,
}

impl Apt {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn apt_get(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new("apt-get", args)
            .sudo()
            .env("DEBIAN_FRONTEND", "noninteractive")
    }
}

#[async_trait]
impl PackageManager for Apt {
    async fn refresh(&self) -> Result<(), AppError> {
        self.runner.run_ok(&self.apt_get(&["update"])).await?;
        Ok(())
    }

    async fn install(&self, packages: &[&str]) -> Result<(), AppError> {
        let mut args = vec!["install", "-y"];
        args.extend_from_slice(packages);
        self.runner.run_ok(&self.apt_get(&args)).await?;
        Ok(())
    }

    async fn remove(&self, packages: &[&str]) -> Result<(), AppError> {
        let mut args = vec!["remove", "-y"];
        args.extend_from_slice(packages);
        self.runner.run_ok(&self.apt_get(&args)).await?;
        Ok(())
    }

    async fn installed(&self, package: &str) -> Result<bool, AppError> {
        let out = self
            .runner
            .run(&CommandSpec::new("dpkg", &["-s", package]).probe())
            .await?;
        Ok(out.success())
    }
}
