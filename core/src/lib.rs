// TARS Core Library
// Errors, configuration and character persona shared by the voice crates

pub mod config;
pub mod persona;
pub mod utils;

// Export core types
pub use config::{CharConfig, PlaybackSettings, TarsConfig, TtsSettings};
pub use persona::{substitute_placeholders, PersonaRecord, PersonaStore};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TarsError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Remote service error: {0}")]
    RemoteServiceError(String),

    #[error("Local execution error: {0}")]
    LocalExecutionError(String),

    #[error("Playback error: {0}")]
    PlaybackError(String),

    #[error("Persona error: {0}")]
    PersonaError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl TarsError {
    /// Short, stable label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            TarsError::ConfigurationError(_) => "configuration",
            TarsError::RemoteServiceError(_) => "remote_service",
            TarsError::LocalExecutionError(_) => "local_execution",
            TarsError::PlaybackError(_) => "playback",
            TarsError::PersonaError(_) => "persona",
            TarsError::IoError(_) => "io",
            TarsError::SerializationError(_) => "serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, TarsError>;
