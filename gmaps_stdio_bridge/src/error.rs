//! Error types for the stdio bridge.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server process error: {0}")]
    ServerProcess(String),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Server did not become ready within {0}s")]
    StartupTimeout(u64),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
