//! Protocol method dispatch, independent of any transport.
//!
//! [`McpService::handle`] maps one JSON-RPC message to at most one response
//! value. The transport layers (HTTP endpoint and stdio loop) own session
//! bookkeeping and context scoping; by the time a message reaches this
//! layer the request-scoped context is already established.

use crate::tools::ToolRegistry;
use gmaps_common::jsonrpc;
use serde_json::{Value, json};
use tracing::{debug, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct McpService {
    name: String,
    tools: ToolRegistry,
}

impl McpService {
    pub fn new(name: impl Into<String>, tools: ToolRegistry) -> Self {
        Self {
            name: name.into(),
            tools,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle one JSON-RPC message. `None` means nothing goes back on the
    /// wire (notifications, and responses the client sent us).
    pub async fn handle(&self, message: &Value) -> Option<Value> {
        let method = match message.get("method").and_then(Value::as_str) {
            Some(method) => method,
            None => {
                // Either a client-side response (ignored) or not a request
                // at all.
                let id = jsonrpc::request_id(message)?;
                if message.get("result").is_some() || message.get("error").is_some() {
                    return None;
                }
                return Some(jsonrpc::error_object(
                    jsonrpc::INVALID_REQUEST,
                    "Invalid Request",
                    id,
                ));
            }
        };

        if jsonrpc::is_notification(message) {
            debug!(method, "Notification received");
            return None;
        }
        let id = jsonrpc::request_id(message)?;

        debug!(method, "Dispatching request");
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        let response = match method {
            "initialize" => jsonrpc::result_object(self.initialize_result(&params), id),
            "ping" => jsonrpc::result_object(json!({}), id),
            "tools/list" => {
                jsonrpc::result_object(json!({ "tools": self.tools.descriptors() }), id)
            }
            "tools/call" => self.tools_call(&params, id).await,
            _ => {
                warn!(method, "Unknown method");
                jsonrpc::error_object(
                    jsonrpc::METHOD_NOT_FOUND,
                    &format!("Method not found: {method}"),
                    id,
                )
            }
        };
        Some(response)
    }

    /// Echo the client's protocol version when it offers one; otherwise
    /// answer with ours.
    fn initialize_result(&self, params: &Value) -> Value {
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);
        json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": {},
                "logging": {},
            },
            "serverInfo": {
                "name": self.name,
                "version": SERVER_VERSION,
            },
        })
    }

    async fn tools_call(&self, params: &Value, id: Value) -> Value {
        let name = match params.get("name").and_then(Value::as_str) {
            Some(name) => name,
            None => {
                return jsonrpc::error_object(
                    jsonrpc::INVALID_PARAMS,
                    "tools/call requires a string \"name\" parameter",
                    id,
                );
            }
        };
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        match self.tools.call(name, arguments).await {
            Ok(value) => {
                let text = serde_json::to_string_pretty(&value)
                    .unwrap_or_else(|_| value.to_string());
                jsonrpc::result_object(
                    json!({ "content": [{ "type": "text", "text": text }] }),
                    id,
                )
            }
            // Tool failures are reported in-band as isError results, not
            // as protocol errors; the request itself was well-formed.
            Err(err) => {
                warn!(tool = name, error = %err, "Tool call failed");
                jsonrpc::result_object(
                    json!({
                        "content": [{ "type": "text", "text": err.to_string() }],
                        "isError": true,
                    }),
                    id,
                )
            }
        }
    }
}
