//! Error types for Chorale

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChoraleError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("Resampling error: {0}")]
    Resampling(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, ChoraleError>;
