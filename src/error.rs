use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Cancelled: {0}")]
    Declined(String),

    #[error("Missing required parameter: {0}")]
    MissingParam(String),

    #[error("Invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },

    #[error("Password rejected: {0}")]
    Policy(String),

    #[error("No free port between {start} and {end}")]
    NoFreePort { start: u16, end: u16 },

    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
