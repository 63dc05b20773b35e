use crate::config::{PortBinding, WorkflowConfig};
use crate::error::AppError;
use crate::ports::PortLease;
use crate::system::System;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{error, info};

pub enum StepDisposition {
    Run,
    /// The external state this step establishes already exists.
    Skip(String),
}

/// One idempotent unit of provisioning work. The sequencer drives the three
/// phases in order; any error aborts the whole workflow.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decide whether the action is needed at all.
    async fn precondition(&self, cx: &StepContext) -> Result<StepDisposition, AppError> {
        let _ = cx;
        Ok(StepDisposition::Run)
    }

    async fn action(&self, cx: &mut StepContext) -> Result<(), AppError>;

    /// Confirm the action took effect. Skipped in dry-run mode, where
    /// nothing was actually done.
    async fn verify(&self, cx: &StepContext) -> Result<(), AppError> {
        let _ = cx;
        Ok(())
    }
}

/// Shared state steps read and extend while a workflow runs.
pub struct StepContext {
    pub config: WorkflowConfig,
    pub system: System,
    /// Held port reservation for the backend service, if one was made.
    pub backend: Option<PortLease>,
    /// Set once certificate issuance has succeeded; the TLS publish step
    /// refuses to run without it.
    pub cert_issued: bool,
    pub ports: Vec<PortBinding>,
    pub artifacts: Vec<PathBuf>,
    pub accepted_warnings: Vec<String>,
}

impl StepContext {
    pub fn new(config: WorkflowConfig, system: System, accepted_warnings: Vec<String>) -> Self {
        Self {
            config,
            system,
            backend: None,
            cert_issued: false,
            ports: Vec::new(),
            artifacts: Vec::new(),
            accepted_warnings,
        }
    }

    pub fn backend_port(&self) -> Result<u16, AppError> {
        self.backend
            .as_ref()
            .map(|lease| lease.port())
            .ok_or_else(|| AppError::MissingParam("reserved backend port".to_string()))
    }

    pub fn record_port(&mut self, name: &str, port: u16) {
        self.ports.push(PortBinding {
            name: name.to_string(),
            port,
        });
    }

    pub fn record_artifact(&mut self, path: PathBuf) {
        self.artifacts.push(path);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running { step: usize },
    Succeeded,
    Aborted { step: usize, reason: String },
}

/// Drives steps strictly in order and stops at the first failure. There are
/// no retries and no rollback: completed steps stay, and re-running the
/// workflow skips them through their preconditions.
pub struct Sequencer {
    state: RunState,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequencer {
    pub fn new() -> Self {
        Self {
            state: RunState::NotStarted,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub async fn run(
        &mut self,
        steps: &[Box<dyn Step>],
        cx: &mut StepContext,
    ) -> Result<(), AppError> {
        let total = steps.len();
        for (index, step) in steps.iter().enumerate() {
            self.state = RunState::Running { step: index };
            info!("[{}/{}] {}", index + 1, total, step.name());

            match step.precondition(cx).await {
                Ok(StepDisposition::Run) => {}
                Ok(StepDisposition::Skip(reason)) => {
                    info!("    skipped: {reason}");
                    continue;
                }
                Err(err) => return self.abort(index, step.name(), "precondition", err),
            }

            if let Err(err) = step.action(cx).await {
                return self.abort(index, step.name(), "action", err);
            }

            if cx.system.dry_run {
                continue;
            }
            if let Err(err) = step.verify(cx).await {
                return self.abort(index, step.name(), "verification", err);
            }
        }
        self.state = RunState::Succeeded;
        Ok(())
    }

    fn abort(
        &mut self,
        step: usize,
        name: &str,
        phase: &str,
        err: AppError,
    ) -> Result<(), AppError> {
        let reason = format!("{phase}: {err}");
        error!("step '{name}' aborted ({reason})");
        self.state = RunState::Aborted {
            step,
            reason: reason.clone(),
        };
        Err(AppError::StepFailed {
            step: name.to_string(),
            message: reason,
        })
    }
}
