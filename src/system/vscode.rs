use crate::error::AppError;
use crate::runner::{CommandRunner, CommandSpec};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Release tarball with the standalone `code` binary.
const CLI_DOWNLOAD_URL: &str =
    "https://update.code.visualstudio.com/latest/cli-linux-x64/stable";

#[derive(Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    AlreadyAuthenticated,
    Authenticated,
    /// Deadline passed; the caller decides whether a late sign-in landed.
    TimedOut,
}

/// Wrapper around the VS Code CLI used for tunnels.
pub struct VsCodeCli {
    runner: Arc<dyn CommandRunner>,
    cli: PathBuf,
}

impl VsCodeCli {
    pub fn new(runner: Arc<dyn CommandRunner>, cli: PathBuf) -> Self {
        Self { runner, cli }
    }

    pub fn cli_path(&self) -> &PathBuf {
        &self.cli
    }

    fn cmd(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new(&self.cli.display().to_string(), args)
    }

    /// Fixed pipeline unpacking the CLI into its install directory.
    pub fn download_spec(&self) -> CommandSpec {
        let dir = self
            .cli
            .parent()
            .unwrap_or_else(|| std::path::Path::new("/usr/local/bin"))
            .display()
            .to_string();
        CommandSpec::shell(&format!(
            "curl -fsSL '{CLI_DOWNLOAD_URL}' | sudo tar -xz -C '{dir}' code"
        ))
    }

    pub async fn installed(&self) -> bool {
        self.runner
            .run(&self.cmd(&["--version"]).probe())
            .await
            .map(|out| out.success())
            .unwrap_or(false)
    }

    pub async fn logged_in(&self) -> Result<bool, AppError> {
        let out = self
            .runner
            .run(&self.cmd(&["tunnel", "user", "show"]).probe())
            .await?;
        Ok(out.success() && !out.stdout.to_lowercase().contains("not logged in"))
    }

    /// Interactive device-auth handshake. Launches `tunnel user login` with
    /// inherited stdio so the operator sees the device code, then polls the
    /// account status until it flips or the deadline passes. On deadline the
    /// login process is terminated and `TimedOut` returned; a final status
    /// check is the caller's call.
    pub async fn authenticate(
        &self,
        wait: Duration,
        poll: Duration,
    ) -> Result<AuthOutcome, AppError> {
        if self.logged_in().await? {
            return Ok(AuthOutcome::AlreadyAuthenticated);
        }

        info!("starting device authentication; follow the instructions below");
        let mut handle = self
            .runner
            .launch(&self.cmd(&["tunnel", "user", "login"]))
            .await?;

        let started = Instant::now();
        while started.elapsed() < wait {
            tokio::time::sleep(poll).await;
            if self.logged_in().await? {
                handle.terminate().await;
                return Ok(AuthOutcome::Authenticated);
            }
        }

        warn!(
            "device authentication did not complete within {}s",
            wait.as_secs()
        );
        handle.terminate().await;
        Ok(AuthOutcome::TimedOut)
    }
}

#[cfg(unix)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::HostRunner;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn fake_cli(dir: &std::path::Path, script: &str) -> PathBuf {
        let path = dir.join("code");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn authenticate_short_circuits_when_already_signed_in() {
        let dir = tempfile::tempdir().unwrap();
        let cli = fake_cli(dir.path(), "#!/bin/sh\necho 'github-user'\nexit 0\n");
        let vscode = VsCodeCli::new(Arc::new(HostRunner), cli);
        let outcome = vscode
            .authenticate(Duration::from_secs(1), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(outcome, AuthOutcome::AlreadyAuthenticated);
    }

    #[tokio::test]
    async fn authenticate_times_out_and_kills_the_login_process() {
        let dir = tempfile::tempdir().unwrap();
        // `tunnel user show` reports signed out, `tunnel user login` hangs.
        let cli = fake_cli(
            dir.path(),
            "#!/bin/sh\nif [ \"$3\" = \"show\" ]; then exit 1; fi\nsleep 30\n",
        );
        let vscode = VsCodeCli::new(Arc::new(HostRunner), cli);
        let started = Instant::now();
        let outcome = vscode
            .authenticate(Duration::from_millis(200), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(outcome, AuthOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn logged_in_rejects_signed_out_output() {
        let dir = tempfile::tempdir().unwrap();
        let cli = fake_cli(dir.path(), "#!/bin/sh\necho 'not logged in'\nexit 0\n");
        let vscode = VsCodeCli::new(Arc::new(HostRunner), cli);
        assert!(!vscode.logged_in().await.unwrap());
    }
}
