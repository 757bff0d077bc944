use std::path::PathBuf;
use thiserror::Error;

/// Calibration error types
#[derive(Error, Debug)]
pub enum CalibError {
    #[error("Operation cancelled by operator")]
    Cancelled,

    #[error("Teleop process already running")]
    AlreadyRunning,

    #[error("Failed to launch teleop: {0}")]
    Launch(String),

    #[error("Robot error: {0}")]
    Robot(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No test_ executables found in {0}")]
    NoExecutables(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CalibError>;

impl CalibError {
    /// True for operator interrupts, which end a session without being a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CalibError::Cancelled)
    }
}

impl From<serde_json::Error> for CalibError {
    fn from(err: serde_json::Error) -> Self {
        CalibError::Config(err.to_string())
    }
}
