use clap::Parser;
use gmaps_stdio_bridge::{BridgeConfig, bridge::DEFAULT_STARTUP_TIMEOUT_SECS, run_bridge};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// stdio-to-HTTP bridge for the Google Maps MCP server.
///
/// Spawns the HTTP server as a subprocess and forwards newline-delimited
/// JSON-RPC between stdin/stdout and its /mcp endpoint.
#[derive(Parser, Debug)]
#[command(name = "gmaps_stdio_bridge")]
#[command(version, about)]
struct Args {
    /// Command to run the MCP server subprocess. If not specified,
    /// auto-detects a local debug binary or uses 'gmaps_mcp'.
    #[arg(long)]
    server_command: Option<String>,

    /// Additional arguments to pass to the server subprocess.
    #[arg(long)]
    server_args: Vec<String>,

    /// API key attached to every forwarded request. Falls back to
    /// GOOGLE_MAPS_API_KEY.
    #[arg(long = "apikey")]
    api_key: Option<String>,

    /// Seconds to wait for the server's readiness marker.
    #[arg(long, default_value_t = DEFAULT_STARTUP_TIMEOUT_SECS)]
    startup_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout belongs to the protocol; logs go to stderr only.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let cwd = std::env::current_dir()?;
    let server_command = args.server_command.unwrap_or_else(|| {
        detect_local_debug_binary(&cwd).unwrap_or_else(|| "gmaps_mcp".to_string())
    });

    let mut server_args = vec!["--port".to_string(), "0".to_string()];
    server_args.extend(args.server_args);

    let config = BridgeConfig {
        server_command,
        server_args,
        api_key: args
            .api_key
            .or_else(|| std::env::var("GOOGLE_MAPS_API_KEY").ok()),
        startup_timeout_secs: args.startup_timeout_secs,
    };

    tracing::info!("Starting stdio bridge, proxying to: {}", config.server_command);
    let exit_code = run_bridge(config).await?;
    std::process::exit(exit_code);
}

fn detect_local_debug_binary(base_dir: &Path) -> Option<String> {
    let candidate: PathBuf = base_dir.join("target").join("debug").join("gmaps_mcp");
    if candidate.exists() {
        Some(candidate.to_string_lossy().into())
    } else {
        None
    }
}
