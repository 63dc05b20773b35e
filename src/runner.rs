use crate::error::AppError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One external command invocation. Operator-supplied values travel as
/// discrete argv entries or stdin bytes, never through shell interpolation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub sudo: bool,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
    /// Read-only state inspection. Probes report "absent" in dry-run mode
    /// and may fail without aborting a workflow.
    pub probe: bool,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            sudo: false,
            env: Vec::new(),
            stdin: None,
            timeout: None,
            probe: false,
        }
    }

    /// Run a script through `sh -c`. Only for fixed pipelines; anything
    /// operator-supplied must go through argv or stdin.
    pub fn shell(script: &str) -> Self {
        Self::new("sh", &["-c", script])
    }

    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    pub fn probe(mut self) -> Self {
        self.probe = true;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Human-readable form for logs and error messages.
    pub fn display(&self) -> String {
        let mut parts = Vec::new();
        if self.sudo {
            parts.push("sudo".to_string());
            for (key, value) in &self.env {
                parts.push(format!("{key}={value}"));
            }
        }
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Handle on a command launched without waiting, used for the interactive
/// device-auth flow. Terminated on drop if still running.
pub enum ActionHandle {
    Host(tokio::process::Child),
    Simulated,
}

impl ActionHandle {
    pub fn try_finished(&mut self) -> bool {
        match self {
            ActionHandle::Host(child) => matches!(child.try_wait(), Ok(Some(_))),
            ActionHandle::Simulated => true,
        }
    }

    pub async fn terminate(&mut self) {
        if let ActionHandle::Host(child) = self {
            if child.try_wait().ok().flatten().is_none() {
                child.start_kill().ok();
                child.wait().await.ok();
            }
        }
    }
}

/// Boundary between workflow logic and the machine. Everything that touches
/// host state goes through here, which is also what makes dry runs and
/// test doubles possible.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output. A non-zero exit is data, not an
    /// error: probes inspect it, actions escalate via [`CommandRunner::run_ok`].
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, AppError>;

    /// Spawn with inherited stdio and return without waiting.
    async fn launch(&self, spec: &CommandSpec) -> Result<ActionHandle, AppError>;

    /// Run and treat any non-zero exit as fatal, with captured stderr.
    async fn run_ok(&self, spec: &CommandSpec) -> Result<CommandOutput, AppError> {
        let output = self.run(spec).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(AppError::CommandFailed {
                command: spec.display(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs commands on the local host.
pub struct HostRunner;

fn build_command(spec: &CommandSpec) -> Command {
    let mut cmd = if spec.sudo {
        let mut cmd = Command::new("sudo");
        for (key, value) in &spec.env {
            cmd.arg(format!("{key}={value}"));
        }
        cmd.arg(&spec.program);
        cmd.args(&spec.args);
        cmd
    } else {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        cmd
    };
    cmd.kill_on_drop(true);
    cmd
}

#[async_trait]
impl CommandRunner for HostRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, AppError> {
        debug!("run: {}", spec.display());
        let mut cmd = build_command(spec);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|source| AppError::Spawn {
            command: spec.display(),
            source,
        })?;

        if let Some(data) = &spec.stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle.write_all(data.as_bytes()).await?;
            }
        }

        let wait = child.wait_with_output();
        let output = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| AppError::Timeout(spec.display()))??,
            None => wait.await?,
        };

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn launch(&self, spec: &CommandSpec) -> Result<ActionHandle, AppError> {
        debug!("launch: {}", spec.display());
        let mut cmd = build_command(spec);
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let child = cmd.spawn().map_err(|source| AppError::Spawn {
            command: spec.display(),
            source,
        })?;
        Ok(ActionHandle::Host(child))
    }
}

/// Logs what would run instead of running it. Probes report their target as
/// absent so every step's action still gets exercised.
pub struct DryRunRunner;

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, AppError> {
        if spec.probe {
            debug!("dry-run probe (reporting absent): {}", spec.display());
            Ok(CommandOutput {
                code: 1,
                stdout: String::new(),
                stderr: String::new(),
            })
        } else {
            info!("dry-run: {}", spec.display());
            Ok(CommandOutput {
                code: 0,
                stdout: "dry-run".to_string(),
                stderr: String::new(),
            })
        }
    }

    async fn launch(&self, spec: &CommandSpec) -> Result<ActionHandle, AppError> {
        info!("dry-run: {}", spec.display());
        Ok(ActionHandle::Simulated)
    }
}

/// Log-and-continue wrapper for cleanup work that must not abort a workflow.
pub fn best_effort<T>(what: &str, result: Result<T, AppError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("{what} failed (continuing): {err}");
            None
        }
    }
}

/// First whitespace-delimited token of a command's stdout, for tools like
/// `md5sum` that append a file name column.
pub fn first_token(stdout: &str) -> Result<String, AppError> {
    stdout
        .split_whitespace()
        .next()
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::Invalid {
            what: "command output",
            reason: "expected at least one token".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let out = HostRunner
            .run(&CommandSpec::new("echo", &["hello"]))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_data_for_run() {
        let out = HostRunner
            .run(&CommandSpec::shell("exit 3"))
            .await
            .unwrap();
        assert_eq!(out.code, 3);
    }

    #[tokio::test]
    async fn run_ok_escalates_nonzero_exit() {
        let err = HostRunner
            .run_ok(&CommandSpec::shell("echo boom >&2; exit 1"))
            .await
            .unwrap_err();
        match err {
            AppError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, 1);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn stdin_is_piped_through() {
        let out = HostRunner
            .run(&CommandSpec::new("cat", &[]).stdin("secret\n"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "secret\n");
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let err = HostRunner
            .run(&CommandSpec::shell("sleep 5").timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_binary_reports_spawn_error() {
        let err = HostRunner
            .run(&CommandSpec::new("definitely-not-a-real-binary", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Spawn { .. }));
    }

    #[tokio::test]
    async fn dry_run_probes_report_absent() {
        let probe = CommandSpec::new("dpkg", &["-s", "nginx"]).probe();
        let out = DryRunRunner.run(&probe).await.unwrap();
        assert!(!out.success());

        let action = CommandSpec::new("apt-get", &["install", "-y", "nginx"]);
        let out = DryRunRunner.run(&action).await.unwrap();
        assert!(out.success());
    }

    #[test]
    fn display_includes_sudo_and_env() {
        let spec = CommandSpec::new("apt-get", &["update"])
            .sudo()
            .env("DEBIAN_FRONTEND", "noninteractive");
        assert_eq!(spec.display(), "sudo DEBIAN_FRONTEND=noninteractive apt-get update");
    }

    #[test]
    fn first_token_takes_the_digest_column() {
        assert_eq!(first_token("d41d8cd98f00b204  -\n").unwrap(), "d41d8cd98f00b204");
        assert!(first_token("   \n").is_err());
    }
}
