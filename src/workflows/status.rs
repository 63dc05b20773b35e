use crate::config::{self, RunRecord};
use crate::error::AppError;
use crate::system::System;
use crate::ui;
use console::style;

struct Row {
    name: &'static str,
    installed: bool,
    active: Option<bool>,
    details: Vec<String>,
}

/// Report what is installed and whether it is running. Read-only; safe to
/// run at any time.
pub async fn run(system: System) -> Result<(), AppError> {
    let spinner = ui::spinner("Probing component state...");
    let rows = vec![
        code_server_row(&system).await,
        desktop_row(&system).await,
        tunnel_row(&system).await,
    ];
    spinner.finish_and_clear();

    println!();
    println!(
        "  {}",
        style(format!(
            "{:<14}{:<12}{:<11}{}",
            "COMPONENT", "INSTALLED", "ACTIVE", "DETAILS"
        ))
        .dim()
    );
    for row in &rows {
        print_row(row);
    }
    if let Ok(dir) = config::logs_dir() {
        println!();
        println!("  Logs: {}", dir.join("devserv.log").display());
    }
    println!();
    Ok(())
}

fn print_row(row: &Row) {
    let installed = if row.installed {
        style(format!("{:<12}", "yes")).green()
    } else {
        style(format!("{:<12}", "no")).dim()
    };
    let active = match row.active {
        Some(true) => style(format!("{:<11}", "active")).green(),
        Some(false) => style(format!("{:<11}", "inactive")).yellow(),
        None => style(format!("{:<11}", "-")).dim(),
    };
    println!(
        "  {:<14}{}{}{}",
        row.name,
        installed,
        active,
        row.details.join(", ")
    );
}

fn load_record(system: &System, workflow: &str) -> Option<RunRecord> {
    RunRecord::load(&system.paths.records_dir(), workflow)
        .ok()
        .flatten()
}

fn present(path: &std::path::Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

async fn code_server_row(system: &System) -> Row {
    let installed = present(&system.paths.systemd_dir.join("code-server.service"));
    let active = if installed {
        Some(system.svc.is_active("code-server").await.unwrap_or(false))
    } else {
        None
    };
    let mut details = Vec::new();
    if let Some(record) = load_record(system, "code-server") {
        if let Some(domain) = &record.domain {
            details.push(format!("https://{domain}/"));
        }
        for binding in &record.ports {
            details.push(format!("{} port {}", binding.name, binding.port));
        }
        details.push(format!("provisioned {}", record.created_at.format("%Y-%m-%d")));
    }
    Row {
        name: "code-server",
        installed,
        active,
        details,
    }
}

async fn desktop_row(system: &System) -> Row {
    let installed = present(&system.paths.guacamole_dir.join("docker-compose.yml"));
    let active = if installed {
        Some(system.svc.is_active("xrdp").await.unwrap_or(false))
    } else {
        None
    };
    let mut details = Vec::new();
    if let Some(record) = load_record(system, "desktop") {
        let host = record.domain.as_deref().unwrap_or("<server-ip>");
        details.push(format!("http://{host}/guacamole/"));
        for binding in &record.ports {
            details.push(format!("{} port {}", binding.name, binding.port));
        }
        details.push(format!("provisioned {}", record.created_at.format("%Y-%m-%d")));
    }
    Row {
        name: "desktop",
        installed,
        active,
        details,
    }
}

async fn tunnel_row(system: &System) -> Row {
    let installed = present(&system.paths.systemd_dir.join("vscode-tunnel.service"));
    let active = if installed {
        Some(system.svc.is_active("vscode-tunnel").await.unwrap_or(false))
    } else {
        None
    };
    let mut details = Vec::new();
    if let Some(record) = load_record(system, "tunnel") {
        if let Some(name) = &record.tunnel {
            details.push(format!("https://vscode.dev/tunnel/{name}"));
        }
        details.push(format!("provisioned {}", record.created_at.format("%Y-%m-%d")));
    }
    Row {
        name: "tunnel",
        installed,
        active,
        details,
    }
}
