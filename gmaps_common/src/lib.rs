//! Shared building blocks for the gmaps-mcp workspace.
//!
//! Deliberately small: JSON-RPC helpers used by both the HTTP server and
//! the stdio bridge, and the observable lifecycle state machine the bridge
//! drives while waiting for the spawned server to become ready.

pub mod jsonrpc;
pub mod phase;

/// Machine-readable readiness marker the server prints to stderr once an
/// HTTP listener is bound. The stdio bridge scans the child's stderr for
/// this prefix; the remainder of the line is the bound port.
pub const READY_MARKER: &str = "GMAPS_MCP_READY=";

/// Session affinity header for the MCP Streamable HTTP transport.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Dedicated per-request credential header, checked before the standard
/// `authorization` bearer header.
pub const API_KEY_HEADER: &str = "x-google-maps-api-key";
