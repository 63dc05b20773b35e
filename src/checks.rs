use crate::config::{
    DomainName, PasswordPolicy, EXPECTED_OS_ID, EXPECTED_OS_VERSION, MIN_FREE_DISK_BYTES,
    PUBLIC_IP_ENDPOINT,
};
use crate::error::AppError;
use crate::runner::{CommandRunner, CommandSpec};
use crate::ui::Confirmer;
use console::style;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything the precondition checks need to know about the host,
/// probed once before any step runs.
#[derive(Debug, Clone)]
pub struct HostFacts {
    pub effective_uid: u32,
    pub sudo_ok: bool,
    pub os_id: Option<String>,
    pub os_version: Option<String>,
    pub free_disk_bytes: Option<u64>,
    pub network_ok: bool,
    pub public_ip: Option<IpAddr>,
    pub domain_ip: Option<IpAddr>,
    pub login_password_set: Option<bool>,
}

impl HostFacts {
    /// A healthy host, used when --dry-run skips the real probes.
    pub fn simulated() -> Self {
        let ip = IpAddr::from([203, 0, 113, 10]);
        Self {
            effective_uid: 1000,
            sudo_ok: true,
            os_id: Some(EXPECTED_OS_ID.to_string()),
            os_version: Some(EXPECTED_OS_VERSION.to_string()),
            free_disk_bytes: Some(8 * 1024 * 1024 * 1024),
            network_ok: true,
            public_ip: Some(ip),
            domain_ip: Some(ip),
            login_password_set: Some(true),
        }
    }
}

#[cfg(unix)]
fn effective_uid() -> u32 {
    unsafe { libc::geteuid() }
}

#[cfg(not(unix))]
fn effective_uid() -> u32 {
    u32::MAX
}

/// Probe the host. Individual probe failures become absent facts rather
/// than errors; the checks decide how severe an unknown is.
pub async fn gather(
    runner: &dyn CommandRunner,
    domain: Option<&DomainName>,
    login_user: Option<&str>,
) -> HostFacts {
    let sudo_ok = runner
        .run(&CommandSpec::shell("sudo -n true").probe())
        .await
        .map(|out| out.success())
        .unwrap_or(false);

    let (os_id, os_version) = match std::fs::read_to_string("/etc/os-release") {
        Ok(contents) => parse_os_release(&contents),
        Err(err) => {
            debug!("could not read /etc/os-release: {err}");
            (None, None)
        }
    };

    let free_disk_bytes = match runner
        .run(&CommandSpec::new("df", &["-Pk", "/"]).probe())
        .await
    {
        Ok(out) if out.success() => parse_df_available_kb(&out.stdout).map(|kb| kb * 1024),
        _ => None,
    };

    let (network_ok, public_ip) = lookup_public_ip().await;

    let domain_ip = match domain {
        Some(domain) => resolve(domain).await,
        None => None,
    };

    let login_password_set = match login_user {
        Some(user) => match runner
            .run(&CommandSpec::new("passwd", &["-S", user]).sudo().probe())
            .await
        {
            Ok(out) if out.success() => parse_passwd_status(&out.stdout),
            _ => None,
        },
        None => None,
    };

    HostFacts {
        effective_uid: effective_uid(),
        sudo_ok,
        os_id,
        os_version,
        free_disk_bytes,
        network_ok,
        public_ip,
        domain_ip,
        login_password_set,
    }
}

async fn lookup_public_ip() -> (bool, Option<IpAddr>) {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            debug!("could not build http client: {err}");
            return (false, None);
        }
    };
    match client.get(PUBLIC_IP_ENDPOINT).send().await {
        Ok(response) => match response.text().await {
            Ok(body) => (true, body.trim().parse().ok()),
            Err(err) => {
                debug!("public address body unreadable: {err}");
                (true, None)
            }
        },
        Err(err) => {
            debug!("public address lookup failed: {err}");
            (false, None)
        }
    }
}

async fn resolve(domain: &DomainName) -> Option<IpAddr> {
    match tokio::net::lookup_host((domain.as_str(), 443)).await {
        Ok(addrs) => {
            let addrs: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
            addrs
                .iter()
                .find(|ip| ip.is_ipv4())
                .or_else(|| addrs.first())
                .copied()
        }
        Err(err) => {
            debug!("{domain} did not resolve: {err}");
            None
        }
    }
}

pub fn parse_os_release(contents: &str) -> (Option<String>, Option<String>) {
    let mut id = None;
    let mut version = None;
    for line in contents.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "ID" => id = Some(value),
                "VERSION_ID" => version = Some(value),
                _ => {}
            }
        }
    }
    (id, version)
}

/// Available kilobytes for `/` from `df -Pk /` output.
pub fn parse_df_available_kb(stdout: &str) -> Option<u64> {
    let line = stdout.lines().nth(1)?;
    line.split_whitespace().nth(3)?.parse().ok()
}

/// `passwd -S` status field: "P" means a usable password is set.
pub fn parse_passwd_status(stdout: &str) -> Option<bool> {
    let status = stdout.split_whitespace().nth(1)?;
    Some(status == "P")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// Overridable with operator confirmation.
    Warn(String),
    /// Aborts the workflow.
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
}

impl CheckResult {
    fn pass(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Pass,
        }
    }

    fn warn(name: &'static str, message: String) -> Self {
        Self {
            name,
            status: CheckStatus::Warn(message),
        }
    }

    fn fail(name: &'static str, message: String) -> Self {
        Self {
            name,
            status: CheckStatus::Fail(message),
        }
    }
}

/// Which optional checks a workflow wants on top of the core set.
pub struct CheckProfile<'a> {
    pub domain: Option<&'a DomainName>,
    pub login_password_user: Option<&'a str>,
    pub policy: Option<&'a PasswordPolicy>,
    pub password: Option<&'a str>,
}

pub fn evaluate(facts: &HostFacts, profile: &CheckProfile<'_>) -> Vec<CheckResult> {
    let mut report = Vec::new();

    report.push(if facts.effective_uid == 0 {
        CheckResult::fail(
            "not running as root",
            "run as a regular user with sudo privileges".to_string(),
        )
    } else {
        CheckResult::pass("not running as root")
    });

    report.push(if facts.sudo_ok {
        CheckResult::pass("sudo access")
    } else {
        CheckResult::fail(
            "sudo access",
            "run `sudo -v` to cache credentials, then retry".to_string(),
        )
    });

    report.push(if facts.network_ok {
        CheckResult::pass("network reachability")
    } else {
        CheckResult::fail(
            "network reachability",
            "cannot reach the public internet".to_string(),
        )
    });

    report.push(match facts.free_disk_bytes {
        Some(free) if free >= MIN_FREE_DISK_BYTES => CheckResult::pass("free disk space"),
        Some(free) => CheckResult::fail(
            "free disk space",
            format!(
                "need at least {:.1} GiB free on /, found {:.1} GiB",
                MIN_FREE_DISK_BYTES as f64 / (1024.0 * 1024.0 * 1024.0),
                free as f64 / (1024.0 * 1024.0 * 1024.0)
            ),
        ),
        None => CheckResult::fail(
            "free disk space",
            "could not determine free space on /".to_string(),
        ),
    });

    if let (Some(policy), Some(password)) = (profile.policy, profile.password) {
        report.push(match policy.check(password) {
            Ok(()) => CheckResult::pass("password strength"),
            Err(err) => CheckResult::fail("password strength", err.to_string()),
        });
    }

    report.push(
        match (facts.os_id.as_deref(), facts.os_version.as_deref()) {
            (Some(EXPECTED_OS_ID), Some(EXPECTED_OS_VERSION)) => {
                CheckResult::pass("operating system")
            }
            (Some(id), Some(version)) => CheckResult::warn(
                "operating system",
                format!("detected {id} {version}, workflows are tested on Ubuntu 24.04"),
            ),
            _ => CheckResult::warn(
                "operating system",
                "could not identify the operating system".to_string(),
            ),
        },
    );

    if let Some(user) = profile.login_password_user {
        report.push(match facts.login_password_set {
            Some(true) => CheckResult::pass("login password"),
            Some(false) => CheckResult::warn(
                "login password",
                format!("user '{user}' has no login password; desktop sign-in will fail until one is set"),
            ),
            None => CheckResult::warn(
                "login password",
                format!("could not read the password status of '{user}'"),
            ),
        });
    }

    if let Some(domain) = profile.domain {
        report.push(match (facts.domain_ip, facts.public_ip) {
            (Some(domain_ip), Some(public_ip)) if domain_ip == public_ip => {
                CheckResult::pass("domain DNS")
            }
            (Some(domain_ip), Some(public_ip)) => CheckResult::warn(
                "domain DNS",
                format!("{domain} resolves to {domain_ip}, but this host's public address is {public_ip}; certificate issuance will fail if traffic lands elsewhere"),
            ),
            (None, _) => CheckResult::warn(
                "domain DNS",
                format!("{domain} does not resolve yet"),
            ),
            (_, None) => CheckResult::warn(
                "domain DNS",
                "could not determine this host's public address".to_string(),
            ),
        });
    }

    report
}

/// Print the report, abort on any hard failure, and walk the operator
/// through each soft warning. Returns the warnings they chose to accept.
pub fn enforce(
    report: &[CheckResult],
    confirmer: &mut dyn Confirmer,
) -> Result<Vec<String>, AppError> {
    let mut failures = Vec::new();
    let mut warnings = Vec::new();

    println!("\nPreflight checks:");
    for result in report {
        match &result.status {
            CheckStatus::Pass => {
                println!("  {} {}", style("✓").green(), result.name);
            }
            CheckStatus::Warn(message) => {
                println!("  {} {}: {}", style("!").yellow(), result.name, message);
                warnings.push((result.name, message.clone()));
            }
            CheckStatus::Fail(message) => {
                println!("  {} {}: {}", style("✗").red(), result.name, message);
                failures.push(format!("{}: {}", result.name, message));
            }
        }
    }
    println!();

    if !failures.is_empty() {
        return Err(AppError::Precondition(failures.join("; ")));
    }

    let mut accepted = Vec::new();
    for (name, message) in warnings {
        let prompt = format!("{message}. Continue anyway?");
        if confirmer.confirm(&prompt, false)? {
            warn!("continuing past failed check '{name}': {message}");
            accepted.push(format!("{name}: {message}"));
        } else {
            return Err(AppError::Declined(format!(
                "stopped at failed check '{name}'"
            )));
        }
    }
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CODE_SERVER_POLICY;

    struct Always(bool);

    impl Confirmer for Always {
        fn confirm(&mut self, _prompt: &str, _default: bool) -> Result<bool, AppError> {
            Ok(self.0)
        }
    }

    fn profile_with_domain(domain: &DomainName) -> CheckProfile<'_> {
        CheckProfile {
            domain: Some(domain),
            login_password_user: None,
            policy: None,
            password: None,
        }
    }

    fn empty_profile() -> CheckProfile<'static> {
        CheckProfile {
            domain: None,
            login_password_user: None,
            policy: None,
            password: None,
        }
    }

    #[test]
    fn healthy_host_passes_everything() {
        let facts = HostFacts::simulated();
        let report = evaluate(&facts, &empty_profile());
        assert!(report.iter().all(|r| r.status == CheckStatus::Pass));
    }

    #[test]
    fn running_as_root_is_fatal() {
        let facts = HostFacts {
            effective_uid: 0,
            ..HostFacts::simulated()
        };
        let report = evaluate(&facts, &empty_profile());
        let status = &report.iter().find(|r| r.name == "not running as root").unwrap().status;
        assert!(matches!(status, CheckStatus::Fail(_)));
    }

    #[test]
    fn low_disk_is_fatal() {
        let facts = HostFacts {
            free_disk_bytes: Some(1024 * 1024 * 1024),
            ..HostFacts::simulated()
        };
        let report = evaluate(&facts, &empty_profile());
        let status = &report.iter().find(|r| r.name == "free disk space").unwrap().status;
        assert!(matches!(status, CheckStatus::Fail(_)));
    }

    #[test]
    fn weak_password_is_fatal() {
        let facts = HostFacts::simulated();
        let profile = CheckProfile {
            domain: None,
            login_password_user: None,
            policy: Some(&CODE_SERVER_POLICY),
            password: Some("abc12345"),
        };
        let report = evaluate(&facts, &profile);
        let status = &report.iter().find(|r| r.name == "password strength").unwrap().status;
        assert!(matches!(status, CheckStatus::Fail(_)));
    }

    #[test]
    fn wrong_os_only_warns() {
        let facts = HostFacts {
            os_id: Some("debian".to_string()),
            os_version: Some("12".to_string()),
            ..HostFacts::simulated()
        };
        let report = evaluate(&facts, &empty_profile());
        let status = &report.iter().find(|r| r.name == "operating system").unwrap().status;
        assert!(matches!(status, CheckStatus::Warn(_)));
    }

    #[test]
    fn dns_mismatch_only_warns() {
        let domain = DomainName::parse("code.example.com").unwrap();
        let facts = HostFacts {
            domain_ip: Some("198.51.100.9".parse().unwrap()),
            ..HostFacts::simulated()
        };
        let report = evaluate(&facts, &profile_with_domain(&domain));
        let status = &report.iter().find(|r| r.name == "domain DNS").unwrap().status;
        assert!(matches!(status, CheckStatus::Warn(_)));
    }

    #[test]
    fn enforce_aborts_on_failure_even_with_agreeable_operator() {
        let facts = HostFacts {
            effective_uid: 0,
            ..HostFacts::simulated()
        };
        let report = evaluate(&facts, &empty_profile());
        let err = enforce(&report, &mut Always(true)).unwrap_err();
        assert!(matches!(err, AppError::Precondition(_)));
    }

    #[test]
    fn enforce_accepts_warning_with_consent() {
        let facts = HostFacts {
            os_id: Some("debian".to_string()),
            os_version: Some("12".to_string()),
            ..HostFacts::simulated()
        };
        let report = evaluate(&facts, &empty_profile());
        let accepted = enforce(&report, &mut Always(true)).unwrap();
        assert_eq!(accepted.len(), 1);
        assert!(accepted[0].starts_with("operating system:"));
    }

    #[test]
    fn enforce_aborts_when_warning_is_declined() {
        let facts = HostFacts {
            os_id: Some("debian".to_string()),
            os_version: Some("12".to_string()),
            ..HostFacts::simulated()
        };
        let report = evaluate(&facts, &empty_profile());
        let err = enforce(&report, &mut Always(false)).unwrap_err();
        assert!(matches!(err, AppError::Declined(_)));
    }

    #[test]
    fn os_release_parser_reads_quoted_fields() {
        let contents = "PRETTY_NAME=\"Ubuntu 24.04.1 LTS\"\nID=ubuntu\nVERSION_ID=\"24.04\"\n";
        let (id, version) = parse_os_release(contents);
        assert_eq!(id.as_deref(), Some("ubuntu"));
        assert_eq!(version.as_deref(), Some("24.04"));
    }

    #[test]
    fn df_parser_reads_available_column() {
        let stdout = "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                      /dev/root   40581564 9213232  31351948      23% /\n";
        assert_eq!(parse_df_available_kb(stdout), Some(31_351_948));
    }

    #[test]
    fn passwd_status_parser() {
        assert_eq!(parse_passwd_status("alice P 01/15/2026 0 99999 7 -1\n"), Some(true));
        assert_eq!(parse_passwd_status("alice L 01/15/2026 0 99999 7 -1\n"), Some(false));
        assert_eq!(parse_passwd_status(""), None);
    }
}
