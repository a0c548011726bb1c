//! Direct stdio serving mode.
//!
//! One implicit session over stdin/stdout: each input line is one JSON-RPC
//! message, each response is one output line. Only the process default
//! credential applies. stdout carries protocol traffic exclusively, so all
//! diagnostics must go to stderr (the tracing setup in `main` does that).

use crate::context::{self, RequestContext};
use crate::error::Result;
use crate::service::McpService;
use gmaps_common::jsonrpc;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

pub async fn run(service: McpService, default_api_key: Option<String>) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    info!("Serving MCP over stdio");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Value>(&line) {
            Ok(message) => {
                let ctx = RequestContext {
                    api_key: default_api_key.clone(),
                    session_id: None,
                };
                context::run_scoped(ctx, service.handle(&message)).await
            }
            Err(e) => {
                debug!("Unparseable stdin line: {e}");
                Some(jsonrpc::error_object(
                    jsonrpc::PARSE_ERROR,
                    &format!("Parse error: {e}"),
                    Value::Null,
                ))
            }
        };

        if let Some(reply) = reply {
            let mut bytes = serde_json::to_vec(&reply)?;
            bytes.push(b'\n');
            stdout.write_all(&bytes).await?;
            stdout.flush().await?;
        }
    }

    info!("stdin closed, stdio server exiting");
    Ok(())
}
