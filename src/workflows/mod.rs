pub mod code_server;
pub mod desktop;
pub mod status;
pub mod tunnel;
pub mod uninstall;

/// The workflows this tool knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    CodeServer,
    Desktop,
    Tunnel,
    Uninstall,
}

impl Workflow {
    pub fn name(&self) -> &'static str {
        match self {
            Workflow::CodeServer => "code-server",
            Workflow::Desktop => "desktop",
            Workflow::Tunnel => "tunnel",
            Workflow::Uninstall => "uninstall",
        }
    }

    /// Where to look when this workflow aborts.
    pub fn failure_hints(&self) -> Vec<(&'static str, &'static str)> {
        match self {
            Workflow::CodeServer => vec![
                ("Service:", "systemctl status code-server && journalctl -u code-server -e"),
                ("Proxy:", "sudo nginx -t && journalctl -u nginx -e"),
                ("TLS:", "sudo certbot certificates"),
            ],
            Workflow::Desktop => vec![
                ("Desktop:", "systemctl status xrdp && journalctl -u xrdp -e"),
                ("Gateway:", "sudo docker compose -f /opt/devserv/guacamole/docker-compose.yml logs"),
                ("Proxy:", "sudo nginx -t && journalctl -u nginx -e"),
            ],
            Workflow::Tunnel => vec![
                ("Account:", "code tunnel user show"),
                ("Service:", "systemctl status vscode-tunnel && journalctl -u vscode-tunnel -e"),
            ],
            Workflow::Uninstall => vec![
                ("Leftovers:", "devserv status"),
                ("Packages:", "sudo apt-get -f install && sudo dpkg --configure -a"),
            ],
        }
    }
}
