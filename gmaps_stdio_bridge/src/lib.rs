//! stdio bridge for the Google Maps MCP server.
//!
//! Lets stdio-only MCP clients talk to the Streamable HTTP server: the
//! bridge spawns the server as a child process, discovers its port from
//! the readiness marker, and forwards newline-delimited JSON-RPC lines as
//! HTTP POSTs, unwrapping the SSE-framed responses back into lines.

pub mod bridge;
pub mod error;
pub mod sse;

pub use bridge::{BridgeConfig, Forwarder, run_bridge};
pub use error::{BridgeError, Result};
