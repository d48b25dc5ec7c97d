use crate::chat::ChatError;
use crate::config::ConfigError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TurnError>;

#[derive(Error, Debug)]
pub enum TurnError {
    /// A platform capability (recognition, synthesis, capture) does not exist.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Generation failed: {0}")]
    Chat(#[from] ChatError),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Turn controller is no longer running")]
    ControllerClosed,
}
