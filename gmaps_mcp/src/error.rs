//! Error types for the MCP server.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Maps API error: {0}")]
    MapsApi(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("No Google Maps API key available for this request")]
    MissingApiKey,

    #[error("Startup error: {0}")]
    Startup(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
