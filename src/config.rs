use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const EXPECTED_OS_ID: &str = "ubuntu";
pub const EXPECTED_OS_VERSION: &str = "24.04";
pub const MIN_FREE_DISK_BYTES: u64 = 2 * 1024 * 1024 * 1024;
pub const PORT_SEARCH_WINDOW: u16 = 100;
pub const DEFAULT_BACKEND_PORT: u16 = 8080;
pub const RDP_PORT: u16 = 3389;
pub const PUBLIC_IP_ENDPOINT: &str = "https://api.ipify.org";

pub const AUTH_WAIT: Duration = Duration::from_secs(300);
pub const AUTH_POLL: Duration = Duration::from_secs(5);
pub const SERVICE_START_WAIT: Duration = Duration::from_secs(60);
pub const SERVICE_POLL: Duration = Duration::from_secs(2);
pub const STACK_START_WAIT: Duration = Duration::from_secs(120);

/// Resolve the app data directory: ~/.devserv/
pub fn app_dir() -> Result<PathBuf, AppError> {
    let home = dirs::home_dir().ok_or(AppError::HomeDirNotFound)?;
    Ok(home.join(".devserv"))
}

/// ~/.devserv/logs/
pub fn logs_dir() -> Result<PathBuf, AppError> {
    Ok(app_dir()?.join("logs"))
}

/// ~/.devserv/records/
pub fn records_dir() -> Result<PathBuf, AppError> {
    Ok(app_dir()?.join("records"))
}

/// Ensure all app directories exist
pub fn ensure_dirs() -> Result<(), AppError> {
    std::fs::create_dir_all(logs_dir()?)?;
    std::fs::create_dir_all(records_dir()?)?;
    Ok(())
}

/// Name of the invoking login user, used for service units and RDP sessions.
pub fn system_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "ubuntu".to_string())
}

/// A validated, lowercased fully qualified domain name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainName(String);

impl DomainName {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let name = raw.trim().trim_end_matches('.').to_ascii_lowercase();
        let invalid = |reason: &str| AppError::Invalid {
            what: "domain",
            reason: format!("'{}': {}", raw.trim(), reason),
        };
        if name.is_empty() {
            return Err(invalid("empty name"));
        }
        if name.len() > 253 {
            return Err(invalid("longer than 253 characters"));
        }
        if !name.contains('.') {
            return Err(invalid("expected a fully qualified name like code.example.com"));
        }
        for label in name.split('.') {
            if label.is_empty() || label.len() > 63 {
                return Err(invalid("labels must be 1-63 characters"));
            }
            if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(invalid("only letters, digits, dots and hyphens are allowed"));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(invalid("labels must not start or end with a hyphen"));
            }
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated tunnel name. The tunnel service caps names at 20 characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelName(String);

impl TunnelName {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let name = raw.trim().to_string();
        let invalid = |reason: &str| AppError::Invalid {
            what: "tunnel name",
            reason: format!("'{}': {}", raw.trim(), reason),
        };
        if name.is_empty() || name.len() > 20 {
            return Err(invalid("must be 1-20 characters"));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid("only letters, digits and hyphens are allowed"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TunnelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Login names end up in htpasswd lines and XML attributes, so keep the
/// accepted alphabet narrow.
pub fn validate_username(raw: &str) -> Result<String, AppError> {
    let name = raw.trim().to_string();
    let invalid = |reason: &str| AppError::Invalid {
        what: "username",
        reason: format!("'{}': {}", raw.trim(), reason),
    };
    if name.is_empty() || name.len() > 32 {
        return Err(invalid("must be 1-32 characters"));
    }
    let first = name.chars().next().unwrap_or(' ');
    if !first.is_ascii_alphanumeric() {
        return Err(invalid("must start with a letter or digit"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid("only letters, digits, '.', '_' and '-' are allowed"));
    }
    Ok(name)
}

#[derive(Debug, Clone, Copy)]
pub struct PasswordPolicy {
    pub min_len: usize,
}

pub const CODE_SERVER_POLICY: PasswordPolicy = PasswordPolicy { min_len: 12 };
pub const DESKTOP_POLICY: PasswordPolicy = PasswordPolicy { min_len: 8 };

impl PasswordPolicy {
    pub fn check(&self, password: &str) -> Result<(), AppError> {
        let mut missing = Vec::new();
        if password.chars().count() < self.min_len {
            missing.push(format!("at least {} characters", self.min_len));
        }
        if !password.chars().any(|c| c.is_ascii_lowercase()) {
            missing.push("a lowercase letter".to_string());
        }
        if !password.chars().any(|c| c.is_ascii_uppercase()) {
            missing.push("an uppercase letter".to_string());
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            missing.push("a digit".to_string());
        }
        if !password
            .chars()
            .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
        {
            missing.push("a symbol".to_string());
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Policy(format!("needs {}", missing.join(", "))))
        }
    }
}

/// Everything a workflow needs from the operator, collected once up front.
/// Steps only ever read this.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub domain: Option<DomainName>,
    pub username: String,
    pub password: Option<String>,
    pub tunnel_name: Option<TunnelName>,
    pub preferred_port: u16,
    pub system_user: String,
}

impl WorkflowConfig {
    pub fn domain(&self) -> Result<&DomainName, AppError> {
        self.domain
            .as_ref()
            .ok_or_else(|| AppError::MissingParam("domain".to_string()))
    }

    pub fn password(&self) -> Result<&str, AppError> {
        self.password
            .as_deref()
            .ok_or_else(|| AppError::MissingParam("password".to_string()))
    }

    pub fn tunnel_name(&self) -> Result<&TunnelName, AppError> {
        self.tunnel_name
            .as_ref()
            .ok_or_else(|| AppError::MissingParam("tunnel name".to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortBinding {
    pub name: String,
    pub port: u16,
}

/// Persisted outcome of a completed workflow, one file per workflow kind.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub workflow: String,
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<String>,
    pub ports: Vec<PortBinding>,
    pub artifacts: Vec<String>,
    pub accepted_warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn save(&self, records_dir: &Path) -> Result<PathBuf, AppError> {
        std::fs::create_dir_all(records_dir)?;
        let path = records_dir.join(format!("{}.json", self.workflow));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load(records_dir: &Path, workflow: &str) -> Result<Option<RunRecord>, AppError> {
        let path = records_dir.join(format!("{}.json", workflow));
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}
