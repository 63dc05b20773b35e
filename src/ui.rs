use crate::config::{self, DomainName, PasswordPolicy, PortBinding, RunRecord, TunnelName};
use crate::error::AppError;
use console::style;
use dialoguer::{Confirm, Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Create a spinner with a message.
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
            .expect("valid template"),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Yes/no gate for anything risky: soft-check overrides, uninstalls.
/// A trait so non-interactive paths and tests can decide differently.
pub trait Confirmer {
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, AppError>;
}

pub struct TermConfirmer;

impl Confirmer for TermConfirmer {
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, AppError> {
        Ok(Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }
}

/// --assume-yes: accept every confirmation, loudly.
pub struct AssumeYes;

impl Confirmer for AssumeYes {
    fn confirm(&mut self, prompt: &str, _default: bool) -> Result<bool, AppError> {
        info!("{prompt} (assumed yes)");
        Ok(true)
    }
}

/// Prompt for the public domain, re-asking until it parses.
pub fn prompt_domain() -> Result<DomainName, AppError> {
    loop {
        let raw: String = Input::new()
            .with_prompt("Domain (e.g. code.example.com)")
            .interact_text()?;
        match DomainName::parse(&raw) {
            Ok(domain) => return Ok(domain),
            Err(err) => println!("{}", style(err).yellow()),
        }
    }
}

pub fn prompt_username(default: &str) -> Result<String, AppError> {
    loop {
        let raw: String = Input::new()
            .with_prompt("Sign-in username")
            .default(default.to_string())
            .interact_text()?;
        match config::validate_username(&raw) {
            Ok(name) => return Ok(name),
            Err(err) => println!("{}", style(err).yellow()),
        }
    }
}

/// Prompt for a password twice, re-asking until it satisfies the policy.
pub fn prompt_password(policy: &PasswordPolicy) -> Result<String, AppError> {
    loop {
        let password = Password::new()
            .with_prompt("Sign-in password")
            .with_confirmation("Confirm password", "Passwords do not match")
            .interact()?;
        match policy.check(&password) {
            Ok(()) => return Ok(password),
            Err(err) => println!("{}", style(err).yellow()),
        }
    }
}

pub fn prompt_tunnel_name(default: &str) -> Result<TunnelName, AppError> {
    loop {
        let raw: String = Input::new()
            .with_prompt("Tunnel name")
            .default(default.to_string())
            .interact_text()?;
        match TunnelName::parse(&raw) {
            Ok(name) => return Ok(name),
            Err(err) => println!("{}", style(err).yellow()),
        }
    }
}

fn port_line(ports: &[PortBinding], name: &str) -> Option<u16> {
    ports.iter().find(|p| p.name == name).map(|p| p.port)
}

/// Print the summary after a successful browser IDE install.
pub fn print_code_server_summary(record: &RunRecord, record_path: Option<&Path>) {
    let divider = "=".repeat(60);
    let domain = record.domain.as_deref().unwrap_or("<domain>");

    println!("\n{divider}");
    println!("  Code Server Ready");
    println!("{divider}");
    println!("  URL:               https://{domain}/");
    if let Some(port) = port_line(&record.ports, "ide") {
        println!("  Backend:           127.0.0.1:{port} (loopback only)");
    }
    println!("  TLS:               Let's Encrypt, renewed daily at 03:00");
    if let Some(path) = record_path {
        println!("  Run record:        {}", path.display());
    }
    println!();
    println!("  Next steps:");
    println!("    1. Open https://{domain}/ and sign in with your basic-auth credentials");
    println!("    2. systemctl status code-server");
    println!("    3. journalctl -u code-server -f");
    println!("{divider}\n");
}

/// Print the summary after a successful remote desktop install.
pub fn print_desktop_summary(
    record: &RunRecord,
    username: &str,
    host: &str,
    record_path: Option<&Path>,
) {
    let divider = "=".repeat(60);

    println!("\n{divider}");
    println!("  Remote Desktop Ready");
    println!("{divider}");
    println!("  Browser access:    http://{host}/guacamole/");
    println!("  Web sign-in:       {username} (the gateway password you chose)");
    println!("  Desktop sign-in:   your system user's login password");
    if let Some(port) = port_line(&record.ports, "gateway") {
        println!("  Gateway:           127.0.0.1:{port} (loopback only)");
    }
    println!("  Direct RDP:        port {}", config::RDP_PORT);
    if let Some(path) = record_path {
        println!("  Run record:        {}", path.display());
    }
    println!();
    println!("  Next steps:");
    println!("    1. Open http://{host}/guacamole/ and sign in as '{username}'");
    println!("    2. Pick the 'Desktop' connection and enter your system password");
    println!("    3. sudo docker compose -f /opt/devserv/guacamole/docker-compose.yml ps");
    println!("{divider}\n");
}

/// Print the summary after a successful tunnel install.
pub fn print_tunnel_summary(tunnel_name: &str, record_path: Option<&Path>) {
    let divider = "=".repeat(60);

    println!("\n{divider}");
    println!("  VS Code Tunnel Ready");
    println!("{divider}");
    println!("  Tunnel name:       {tunnel_name}");
    println!("  Open in browser:   https://vscode.dev/tunnel/{tunnel_name}");
    println!("  Or from VS Code:   Remote Explorer > Tunnels > {tunnel_name}");
    if let Some(path) = record_path {
        println!("  Run record:        {}", path.display());
    }
    println!();
    println!("  Next steps:");
    println!("    1. code tunnel status");
    println!("    2. systemctl status vscode-tunnel");
    println!("{divider}\n");
}

/// Printed when a workflow aborts: where to look, and what to do next.
pub fn print_failure_help(log_file: &Path, hints: &[(&str, &str)]) {
    let divider = "-".repeat(60);
    println!("\n{divider}");
    println!(
        "{}",
        style("  The workflow stopped before completion. Finished steps were").red()
    );
    println!(
        "{}",
        style("  left in place; fix the cause and re-run to continue.").red()
    );
    println!();
    println!("  Troubleshooting:");
    println!("    Log file:   {}", log_file.display());
    for (label, command) in hints {
        println!("    {label:<11} {command}");
    }
    println!("{divider}\n");
}
