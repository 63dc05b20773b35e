use async_trait::async_trait;
use devserv::config::WorkflowConfig;
use devserv::error::AppError;
use devserv::runner::{ActionHandle, CommandOutput, CommandRunner, CommandSpec};
use devserv::system::{System, TargetPaths};
use devserv::ui::Confirmer;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Command runner double: records every spec and answers from substring
/// rules, defaulting to success. The non-empty default stdout matters; some
/// callers parse a token out of it.
struct Rule {
    needle: String,
    output: CommandOutput,
    once: bool,
}

#[derive(Clone, Default)]
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<CommandSpec>>>,
    rules: Arc<Mutex<Vec<Rule>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_rule(&self, needle: &str, code: i32, stdout: &str, stderr: &str, once: bool) {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            output: CommandOutput {
                code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
            once,
        });
    }

    /// Later rules win over earlier ones.
    pub fn rule(&self, needle: &str, code: i32, stdout: &str) {
        self.push_rule(needle, code, stdout, "", false);
    }

    /// Like [`RecordingRunner::rule`] but consumed on first match, for
    /// probes whose answer changes after an install.
    pub fn rule_once(&self, needle: &str, code: i32, stdout: &str) {
        self.push_rule(needle, code, stdout, "", true);
    }

    pub fn fail_on(&self, needle: &str, stderr: &str) {
        self.push_rule(needle, 1, "", stderr, false);
    }

    pub fn displays(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.display()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Index of the first recorded command containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.displays().iter().position(|d| d.contains(needle))
    }

    pub fn stdin_of(&self, needle: &str) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.display().contains(needle))
            .and_then(|c| c.stdin.clone())
    }

    /// All recorded commands containing `needle`, as (index, stdin) pairs.
    pub fn matching(&self, needle: &str) -> Vec<(usize, Option<String>)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.display().contains(needle))
            .map(|(i, c)| (i, c.stdin.clone()))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, AppError> {
        self.calls.lock().unwrap().push(spec.clone());
        let display = spec.display();
        let mut rules = self.rules.lock().unwrap();
        let hit = rules
            .iter()
            .enumerate()
            .rev()
            .find(|(_, rule)| display.contains(rule.needle.as_str()))
            .map(|(i, rule)| (i, rule.output.clone(), rule.once));
        if let Some((i, output, once)) = hit {
            if once {
                rules.remove(i);
            }
            return Ok(output);
        }
        Ok(CommandOutput {
            code: 0,
            stdout: "ok".to_string(),
            stderr: String::new(),
        })
    }

    async fn launch(&self, spec: &CommandSpec) -> Result<ActionHandle, AppError> {
        self.calls.lock().unwrap().push(spec.clone());
        Ok(ActionHandle::Simulated)
    }
}

/// A [`System`] wired to a [`RecordingRunner`] with every target path under
/// `root`, so nothing escapes the test directory.
pub fn system_under(root: &Path, runner: RecordingRunner) -> System {
    System::with_runner(Arc::new(runner), TargetPaths::under(root), false)
}

pub fn config_for(domain: Option<&str>, username: &str, password: Option<&str>) -> WorkflowConfig {
    WorkflowConfig {
        domain: domain.map(|d| devserv::config::DomainName::parse(d).unwrap()),
        username: username.to_string(),
        password: password.map(|p| p.to_string()),
        tunnel_name: None,
        preferred_port: 0,
        system_user: "testuser".to_string(),
    }
}

/// Confirmer that always answers the same way and counts the prompts.
pub struct Scripted {
    pub answer: bool,
    pub asked: usize,
}

impl Scripted {
    pub fn yes() -> Self {
        Self {
            answer: true,
            asked: 0,
        }
    }

    pub fn no() -> Self {
        Self {
            answer: false,
            asked: 0,
        }
    }
}

impl Confirmer for Scripted {
    fn confirm(&mut self, _prompt: &str, _default: bool) -> Result<bool, AppError> {
        self.asked += 1;
        Ok(self.answer)
    }
}
