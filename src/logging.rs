use crate::config;
use crate::error::AppError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Set up the two log sinks: concise console output plus a persistent file
/// under ~/.devserv/logs/ that `devserv` points operators at after a failure.
pub fn init(verbose: bool) -> Result<(), AppError> {
    let log_dir = config::logs_dir()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(&log_dir, "devserv.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep the writer alive for the lifetime of the program
    std::mem::forget(_guard);

    // Base filter suppresses noisy libraries, RUST_LOG layers on top (can override if explicit)
    let base = "hyper=warn,reqwest=warn,rustls=warn";
    let level = if verbose { "debug" } else { "info" };
    let filter = match std::env::var("RUST_LOG") {
        Ok(env) => EnvFilter::new(format!("{base},{env}")),
        Err(_) => EnvFilter::new(format!("{base},devserv={level}")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).without_time()) // console
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(non_blocking),
        ) // file
        .init();

    Ok(())
}

/// Where the file layer writes; printed in failure guidance.
pub fn log_file_path() -> Result<std::path::PathBuf, AppError> {
    Ok(config::logs_dir()?.join("devserv.log"))
}
