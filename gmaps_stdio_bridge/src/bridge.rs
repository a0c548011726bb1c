//! stdio ⇄ Streamable HTTP bridge.
//!
//! Spawns the HTTP server as a child process, waits for its readiness
//! marker on stderr, then forwards newline-delimited JSON-RPC between
//! stdin/stdout and the server's `/mcp` endpoint. Forwarding is strictly
//! sequential: the next stdin line is not posted until the previous
//! response has been fully parsed and written out, which preserves
//! request/response ordering for clients that interleave neither.

use crate::error::{BridgeError, Result};
use crate::sse;
use gmaps_common::phase::{Phase, PhaseMachine};
use gmaps_common::{API_KEY_HEADER, MCP_SESSION_ID_HEADER, READY_MARKER, jsonrpc};
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 30;

/// Configuration for one bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Command to run the HTTP server child.
    pub server_command: String,

    /// Arguments for the child. Should ask for an ephemeral port; the
    /// bound port is read back from the readiness marker either way.
    pub server_args: Vec<String>,

    /// API key attached to every forwarded request, if configured.
    pub api_key: Option<String>,

    /// Seconds to wait for the child's readiness marker.
    pub startup_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_command: "gmaps_mcp".to_string(),
            server_args: vec!["--port".to_string(), "0".to_string()],
            api_key: None,
            startup_timeout_secs: DEFAULT_STARTUP_TIMEOUT_SECS,
        }
    }
}

/// Posts JSON-RPC messages to the server and turns each response into
/// zero or more stdout payloads. Holds the single logical session: the id
/// is captured from the first response that carries one and echoed on
/// every request after that.
pub struct Forwarder {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    session_id: Option<String>,
}

impl Forwarder {
    pub fn new(endpoint: Url, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key,
            session_id: None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Forward one message. An HTTP 202 (notification accepted) yields no
    /// payloads; SSE-framed responses yield one payload per `message`
    /// block; plain JSON bodies pass through as-is.
    pub async fn forward(&mut self, message: &Value) -> Result<Vec<Value>> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream")
            .json(message);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        if let Some(session_id) = &self.session_id {
            request = request.header(MCP_SESSION_ID_HEADER, session_id);
        }

        let response = request.send().await?;

        if self.session_id.is_none()
            && let Some(session_id) = response
                .headers()
                .get(MCP_SESSION_ID_HEADER)
                .and_then(|v| v.to_str().ok())
        {
            info!(session_id, "Captured session id");
            self.session_id = Some(session_id.to_string());
        }

        let status = response.status();
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(Vec::new());
        }

        let is_sse = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response.text().await?;

        if is_sse {
            return Ok(sse::message_payloads(&body));
        }
        // Error responses and plain-JSON servers: hand the body through
        // unchanged so the client sees the structured error object.
        match serde_json::from_str(&body) {
            Ok(value) => Ok(vec![value]),
            Err(e) => Err(BridgeError::Communication(format!(
                "unparseable response body (HTTP {status}): {e}"
            ))),
        }
    }
}

/// Run the bridge to completion. The returned value is the process exit
/// code: 0 after clean stdin EOF, the child's own code if it dies first.
pub async fn run_bridge(config: BridgeConfig) -> Result<i32> {
    let phase = PhaseMachine::new();

    info!(command = %config.server_command, "Spawning MCP server child");
    let mut child = Command::new(&config.server_command)
        .args(&config.server_args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            phase.advance(Phase::Closed);
            BridgeError::ServerProcess(format!("failed to spawn {}: {e}", config.server_command))
        })?;
    phase.advance(Phase::WaitingReady);

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BridgeError::ServerProcess("child stderr was not piped".to_string()))?;
    let mut stderr_lines = BufReader::new(stderr).lines();

    let port = match tokio::time::timeout(
        Duration::from_secs(config.startup_timeout_secs),
        scan_for_ready(&mut stderr_lines),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            let _ = child.kill().await;
            phase.advance(Phase::Closed);
            return Err(BridgeError::StartupTimeout(config.startup_timeout_secs));
        }
    };
    phase.advance(Phase::Ready);

    // Keep draining the child's diagnostics so its stderr pipe never
    // fills up.
    tokio::spawn(async move {
        while let Ok(Some(line)) = stderr_lines.next_line().await {
            eprintln!("{line}");
        }
    });

    let endpoint = Url::parse(&format!("http://127.0.0.1:{port}/mcp"))
        .map_err(|e| BridgeError::Communication(format!("invalid endpoint URL: {e}")))?;
    info!(%endpoint, "Server ready, forwarding stdio");

    let forwarder = Forwarder::new(endpoint, config.api_key.clone());
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    forward_loop(forwarder, &mut child, &phase, &mut stdin_lines).await
}

/// Scan child stderr for the readiness marker, forwarding every line so
/// the child's logs stay visible.
async fn scan_for_ready(
    lines: &mut tokio::io::Lines<BufReader<ChildStderr>>,
) -> Result<u16> {
    while let Some(line) = lines.next_line().await? {
        if let Some(port) = line.strip_prefix(READY_MARKER) {
            return port.trim().parse().map_err(|_| {
                BridgeError::ServerProcess(format!("unparseable readiness marker: {line:?}"))
            });
        }
        eprintln!("{line}");
    }
    Err(BridgeError::ServerProcess(
        "server exited before announcing readiness".to_string(),
    ))
}

/// Forward client lines until the lifecycle closes. Entry is gated on the
/// `Ready` phase; a lifecycle that terminated during startup never
/// forwards anything.
async fn forward_loop<R>(
    mut forwarder: Forwarder,
    child: &mut Child,
    phase: &PhaseMachine,
    lines: &mut Lines<R>,
) -> Result<i32>
where
    R: AsyncBufRead + Unpin,
{
    if !phase.wait_for_ready().await {
        return Err(BridgeError::ServerProcess(
            "bridge closed before reaching steady state".to_string(),
        ));
    }
    let mut stdout = tokio::io::stdout();
    let mut exit_code = 0;

    while !phase.is_closed() {
        tokio::select! {
            status = child.wait() => {
                let status = status?;
                exit_code = status.code().unwrap_or(1);
                error!(code = exit_code, "Server child exited unexpectedly");
                phase.advance(Phase::Closed);
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    for payload in handle_line(&mut forwarder, &line).await {
                        write_line(&mut stdout, &payload).await?;
                    }
                }
                None => {
                    info!("stdin closed, shutting down server child");
                    let _ = child.kill().await;
                    phase.advance(Phase::Closed);
                }
            }
        }
    }
    Ok(exit_code)
}

/// One stdin line → the payloads to emit on stdout. Never fails: parse
/// and transport problems become JSON-RPC error objects.
async fn handle_line(forwarder: &mut Forwarder, line: &str) -> Vec<Value> {
    let message: Value = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            debug!("Unparseable stdin line: {e}");
            return vec![jsonrpc::error_object(
                jsonrpc::PARSE_ERROR,
                &format!("Parse error: {e}"),
                Value::Null,
            )];
        }
    };

    match forwarder.forward(&message).await {
        Ok(payloads) => payloads,
        Err(e) => {
            warn!("Forwarding failed: {e}");
            match jsonrpc::request_id(&message) {
                // The client is waiting on this id; answer it.
                Some(id) => vec![jsonrpc::error_object(
                    jsonrpc::INTERNAL_ERROR,
                    &format!("Failed to communicate with server: {e}"),
                    id,
                )],
                None => Vec::new(),
            }
        }
    }
}

async fn write_line(stdout: &mut tokio::io::Stdout, payload: &Value) -> Result<()> {
    let mut bytes = serde_json::to_vec(payload)?;
    bytes.push(b'\n');
    stdout.write_all(&bytes).await?;
    stdout.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_an_ephemeral_port() {
        let config = BridgeConfig::default();
        assert_eq!(config.server_command, "gmaps_mcp");
        assert_eq!(config.server_args, vec!["--port", "0"]);
        assert_eq!(config.startup_timeout_secs, DEFAULT_STARTUP_TIMEOUT_SECS);
    }

    #[tokio::test]
    async fn unparseable_stdin_line_becomes_a_parse_error_object() {
        let endpoint = Url::parse("http://127.0.0.1:1/mcp").unwrap();
        let mut forwarder = Forwarder::new(endpoint, None);

        let payloads = handle_line(&mut forwarder, "{not json").await;
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["error"]["code"], -32700);
        assert!(payloads[0]["id"].is_null());
    }

    #[tokio::test]
    async fn transport_failure_answers_the_request_id() {
        // Port 1 is never listening; the POST fails immediately.
        let endpoint = Url::parse("http://127.0.0.1:1/mcp").unwrap();
        let mut forwarder = Forwarder::new(endpoint, None);

        let payloads = handle_line(
            &mut forwarder,
            r#"{"jsonrpc":"2.0","id":42,"method":"ping"}"#,
        )
        .await;
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["error"]["code"], -32603);
        assert_eq!(payloads[0]["id"], 42);
    }

    fn dead_forwarder() -> Forwarder {
        Forwarder::new(Url::parse("http://127.0.0.1:1/mcp").unwrap(), None)
    }

    #[tokio::test]
    async fn stdin_eof_closes_the_lifecycle_and_exits_cleanly() {
        let phase = PhaseMachine::new();
        phase.advance(Phase::Ready);
        let mut child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut lines = BufReader::new(&b""[..]).lines();

        let code = forward_loop(dead_forwarder(), &mut child, &phase, &mut lines)
            .await
            .unwrap();
        assert_eq!(code, 0);
        assert!(phase.is_closed());
    }

    #[tokio::test]
    async fn child_exit_code_is_propagated() {
        let phase = PhaseMachine::new();
        phase.advance(Phase::Ready);
        let mut child = Command::new("sh").arg("-c").arg("exit 7").spawn().unwrap();
        // A reader that stays pending, so only the child branch can fire.
        let (reader, _writer) = tokio::io::simplex(64);
        let mut lines = BufReader::new(reader).lines();

        let code = forward_loop(dead_forwarder(), &mut child, &phase, &mut lines)
            .await
            .unwrap();
        assert_eq!(code, 7);
        assert!(phase.is_closed());
    }

    #[tokio::test]
    async fn a_lifecycle_closed_during_startup_never_forwards() {
        let phase = PhaseMachine::new();
        phase.advance(Phase::Closed);
        let mut child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut lines = BufReader::new(&b""[..]).lines();

        let err = forward_loop(dead_forwarder(), &mut child, &phase, &mut lines)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("closed before reaching steady state"));
        let _ = child.kill().await;
    }

    #[tokio::test]
    async fn transport_failure_for_a_notification_emits_nothing() {
        let endpoint = Url::parse("http://127.0.0.1:1/mcp").unwrap();
        let mut forwarder = Forwarder::new(endpoint, None);

        let payloads = handle_line(
            &mut forwarder,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .await;
        assert!(payloads.is_empty());
    }
}
