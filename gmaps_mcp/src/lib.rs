//! Session-aware MCP server for the Google Maps web services.
//!
//! The server speaks the MCP Streamable HTTP transport on a single `/mcp`
//! route (POST requests, GET event stream, DELETE termination), with
//! per-session credential overrides resolved into a request-scoped context
//! before any tool runs. A `--stdio` mode serves the same protocol over
//! stdin/stdout for clients that cannot speak HTTP.

pub mod context;
pub mod credentials;
pub mod error;
pub mod server;
pub mod service;
pub mod session;
pub mod stdio;
pub mod tools;

pub use error::{Result, ServerError};
pub use server::{AppState, HttpServer, ServerConfig, build_router, start_all};
