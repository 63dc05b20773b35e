use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Xfce session file for the RDP login path.
pub const XSESSION: &str = "xfce4-session\n";

/// Marker comment appended to our crontab line so installs and removals can
/// find it without disturbing the rest of the table.
pub const CRON_MARKER: &str = "devserv-renew";

pub fn renewal_cron_line() -> String {
    format!(
        r#"0 3 * * * certbot renew --quiet --deploy-hook "systemctl reload nginx" # {CRON_MARKER}"#
    )
}

/// Deterministic salt for the basic-auth digest, so re-running a workflow
/// with unchanged inputs rewrites the credentials file byte-identically.
pub fn digest_salt(domain: &str, username: &str) -> String {
    let hash = Sha256::digest(format!("{domain}:{username}").as_bytes());
    hex::encode(hash)[..8].to_string()
}

pub fn render_htpasswd(username: &str, digest: &str) -> String {
    format!("{username}:{digest}\n")
}

pub fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Systemd service unit running as a login user.
pub struct ServiceUnit {
    pub description: String,
    pub user: String,
    pub exec_start: String,
    pub environment: Vec<(String, String)>,
}

impl ServiceUnit {
    pub fn render(&self) -> String {
        let environment: String = self
            .environment
            .iter()
            .map(|(key, value)| format!("Environment=\"{key}={value}\"\n"))
            .collect();
        format!(
            r#"[Unit]
Description={description}
After=network.target

[Service]
Type=simple
User={user}
{environment}ExecStart={exec_start}
Restart=always
RestartSec=10

[Install]
WantedBy=multi-user.target
"#,
            description = self.description,
            user = self.user,
            environment = environment,
            exec_start = self.exec_start,
        )
    }
}

pub struct TlsPaths {
    pub certificate: PathBuf,
    pub certificate_key: PathBuf,
}

/// One nginx site. Rendered twice for TLS-fronted services: first without
/// `tls` so the ACME challenge can be served over plain HTTP, then again
/// with `tls` once the certificate exists.
pub struct ProxySite {
    /// None publishes a catch-all default server.
    pub server_name: Option<String>,
    pub backend_port: u16,
    /// Path prefix proxied to the backend, e.g. "/" or "/guacamole/".
    pub location: String,
    pub auth_file: Option<PathBuf>,
    pub acme_webroot: Option<PathBuf>,
    pub tls: Option<TlsPaths>,
}

impl ProxySite {
    pub fn render(&self) -> String {
        let (listen, server_name) = match &self.server_name {
            Some(name) => ("listen 80;".to_string(), name.clone()),
            None => ("listen 80 default_server;".to_string(), "_".to_string()),
        };

        let acme_location = match &self.acme_webroot {
            Some(webroot) => format!(
                r#"
    location /.well-known/acme-challenge/ {{
        root {};
    }}
"#,
                webroot.display()
            ),
            None => String::new(),
        };

        let auth_lines = match &self.auth_file {
            Some(file) => format!(
                "        auth_basic \"Restricted\";\n        auth_basic_user_file {};\n\n",
                file.display()
            ),
            None => String::new(),
        };

        let proxy_location = format!(
            r#"    location {location} {{
{auth_lines}        proxy_pass http://127.0.0.1:{port}{location};
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection upgrade;
        proxy_buffering off;
    }}
"#,
            location = self.location,
            auth_lines = auth_lines,
            port = self.backend_port,
        );

        match &self.tls {
            None => format!(
                r#"server {{
    {listen}
    server_name {server_name};
{acme_location}
{proxy_location}}}
"#,
            ),
            Some(tls) => format!(
                r#"server {{
    {listen}
    server_name {server_name};
{acme_location}
    location / {{
        return 301 https://$host$request_uri;
    }}
}}

server {{
    listen 443 ssl;
    server_name {server_name};

    ssl_certificate {certificate};
    ssl_certificate_key {certificate_key};

{proxy_location}}}
"#,
                certificate = tls.certificate.display(),
                certificate_key = tls.certificate_key.display(),
            ),
        }
    }
}

/// Compose file for the browser RDP gateway. The web container binds
/// loopback only; nginx is the sole public entry point.
pub struct GuacamoleStack {
    pub http_port: u16,
    pub home_mount: PathBuf,
}

impl GuacamoleStack {
    pub fn render(&self) -> String {
        format!(
            r#"services:
  guacd:
    image: guacamole/guacd:1.5.5
    container_name: devserv-guacd
    restart: unless-stopped

  guacamole:
    image: guacamole/guacamole:1.5.5
    container_name: devserv-guacamole
    restart: unless-stopped
    depends_on:
      - guacd
    environment:
      GUACD_HOSTNAME: guacd
      GUACAMOLE_HOME: /etc/guacamole
    volumes:
      - {home_mount}:/etc/guacamole:ro
    ports:
      - "127.0.0.1:{http_port}:8080"
"#,
            home_mount = self.home_mount.display(),
            http_port = self.http_port,
        )
    }
}

/// Guacamole file-based auth plus one RDP connection back to the host.
/// The RDP password is left out; the desktop greeter asks for the
/// system password itself.
pub struct UserMapping {
    pub username: String,
    pub password_md5: String,
    pub rdp_host: String,
    pub rdp_port: u16,
    pub rdp_username: String,
}

impl UserMapping {
    pub fn render(&self) -> String {
        format!(
            r#"<user-mapping>
    <authorize username="{username}" password="{password_md5}" encoding="md5">
        <connection name="Desktop">
            <protocol>rdp</protocol>
            <param name="hostname">{rdp_host}</param>
            <param name="port">{rdp_port}</param>
            <param name="username">{rdp_username}</param>
            <param name="ignore-cert">true</param>
        </connection>
    </authorize>
</user-mapping>
"#,
            username = xml_escape(&self.username),
            password_md5 = xml_escape(&self.password_md5),
            rdp_host = xml_escape(&self.rdp_host),
            rdp_port = self.rdp_port,
            rdp_username = xml_escape(&self.rdp_username),
        )
    }
}
