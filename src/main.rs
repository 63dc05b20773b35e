use clap::{Parser, Subcommand, ValueEnum};
use devserv::config;
use devserv::error::AppError;
use devserv::logging;
use devserv::system::System;
use devserv::ui::{self, AssumeYes, Confirmer, TermConfirmer};
use devserv::workflows::code_server::{self, CodeServerArgs};
use devserv::workflows::desktop::{self, DesktopArgs};
use devserv::workflows::tunnel::{self, TunnelArgs};
use devserv::workflows::uninstall::{self, Target};
use devserv::workflows::{status, Workflow};
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "devserv",
    version,
    about = "Provision a cloud dev server: web IDE, remote desktop, VS Code tunnel"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug detail to the console
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run every check, print every step, change nothing
    #[arg(long, global = true)]
    dry_run: bool,

    /// Never prompt; answer yes to confirmations and fail on missing parameters
    #[arg(short = 'y', long, global = true)]
    assume_yes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install code-server behind nginx with HTTPS and basic auth
    CodeServer {
        /// Public domain pointing at this host
        #[arg(long)]
        domain: Option<String>,

        /// Basic-auth login name
        #[arg(long)]
        username: Option<String>,

        /// Basic-auth password
        #[arg(long, env = "DEVSERV_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// First backend port to try
        #[arg(long, default_value_t = config::DEFAULT_BACKEND_PORT)]
        port: u16,
    },

    /// Install an XFCE desktop reachable via browser (Guacamole) or RDP
    Desktop {
        /// Serve the gateway on this domain instead of as the catch-all site
        #[arg(long)]
        domain: Option<String>,

        /// Gateway login name
        #[arg(long)]
        username: Option<String>,

        /// Gateway password
        #[arg(long, env = "DEVSERV_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// First gateway port to try
        #[arg(long, default_value_t = config::DEFAULT_BACKEND_PORT)]
        port: u16,
    },

    /// Install a VS Code tunnel running as a systemd service
    Tunnel {
        /// Tunnel name shown on vscode.dev and in the Remote Explorer
        #[arg(long)]
        name: Option<String>,
    },

    /// Remove installed components
    Uninstall {
        /// Which component to remove
        #[arg(value_enum)]
        component: Component,
    },

    /// Show what is installed and whether it is running
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Component {
    CodeServer,
    Desktop,
    Tunnel,
    All,
}

impl Component {
    fn targets(self) -> Vec<Target> {
        match self {
            Component::CodeServer => vec![Target::CodeServer],
            Component::Desktop => vec![Target::Desktop],
            Component::Tunnel => vec![Target::Tunnel],
            Component::All => Target::ALL.to_vec(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    config::ensure_dirs()?;
    logging::init(cli.verbose)?;

    let system = if cli.dry_run {
        info!("dry run: commands are logged, nothing is changed");
        System::dry_run()?
    } else {
        System::host()?
    };
    let mut confirmer: Box<dyn Confirmer> = if cli.assume_yes {
        Box::new(AssumeYes)
    } else {
        Box::new(TermConfirmer)
    };

    match cli.command {
        Commands::CodeServer {
            domain,
            username,
            password,
            port,
        } => {
            let args = CodeServerArgs {
                domain,
                username,
                password,
                port,
                assume_yes: cli.assume_yes,
            };
            finish(
                Workflow::CodeServer,
                code_server::run(args, system, confirmer.as_mut()).await,
            )
        }
        Commands::Desktop {
            domain,
            username,
            password,
            port,
        } => {
            let args = DesktopArgs {
                domain,
                username,
                password,
                port,
                assume_yes: cli.assume_yes,
            };
            finish(
                Workflow::Desktop,
                desktop::run(args, system, confirmer.as_mut()).await,
            )
        }
        Commands::Tunnel { name } => {
            let args = TunnelArgs {
                name,
                assume_yes: cli.assume_yes,
            };
            finish(
                Workflow::Tunnel,
                tunnel::run(args, system, confirmer.as_mut()).await,
            )
        }
        Commands::Uninstall { component } => finish(
            Workflow::Uninstall,
            uninstall::run(&component.targets(), system, confirmer.as_mut()).await,
        ),
        Commands::Status => {
            status::run(system).await?;
            Ok(())
        }
    }
}

fn finish(workflow: Workflow, result: Result<(), AppError>) -> anyhow::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(AppError::Declined(what)) => {
            info!("cancelled: {what}");
            Err(AppError::Declined(what).into())
        }
        Err(err) => {
            error!("{} workflow aborted: {err}", workflow.name());
            if matches!(err, AppError::StepFailed { .. }) {
                if let Ok(log) = logging::log_file_path() {
                    ui::print_failure_help(&log, &workflow.failure_hints());
                }
            }
            Err(err.into())
        }
    }
}
