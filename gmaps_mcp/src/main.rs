use clap::Parser;
use gmaps_mcp::service::McpService;
use gmaps_mcp::tools::{ToolRegistry, maps::MapsClient};
use gmaps_mcp::{ServerConfig, start_all, stdio};
use std::net::{IpAddr, SocketAddr};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVER_NAME: &str = "gmaps-mcp";
const DEFAULT_PORT: u16 = 3000;

/// MCP server exposing the Google Maps web services as tools.
///
/// Serves the Streamable HTTP transport by default; pass several ports to
/// run isolated instances in one process, or --stdio to speak JSON-RPC on
/// stdin/stdout instead.
#[derive(Parser, Debug)]
#[command(name = "gmaps_mcp")]
#[command(version, about)]
struct Args {
    /// Ports to serve on (repeatable). Falls back to MCP_SERVER_PORT,
    /// then 3000.
    #[arg(long = "port")]
    ports: Vec<u16>,

    /// Host address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Default Google Maps API key. Falls back to GOOGLE_MAPS_API_KEY.
    /// Requests may still override it per call or per session.
    #[arg(long = "apikey")]
    api_key: Option<String>,

    /// Serve JSON-RPC over stdin/stdout instead of HTTP.
    #[arg(long)]
    stdio: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // All diagnostics go to stderr: in stdio mode stdout is the protocol
    // channel.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let api_key = args
        .api_key
        .or_else(|| std::env::var("GOOGLE_MAPS_API_KEY").ok());
    if api_key.is_none() {
        tracing::warn!(
            "No default API key configured; requests must supply one via header"
        );
    }

    if args.stdio {
        let service = McpService::new(SERVER_NAME, ToolRegistry::new(MapsClient::new()));
        stdio::run(service, api_key).await?;
        return Ok(());
    }

    let ports = resolve_ports(&args.ports, std::env::var("MCP_SERVER_PORT").ok());
    let configs: Vec<ServerConfig> = ports
        .into_iter()
        .map(|port| ServerConfig {
            name: SERVER_NAME.to_string(),
            bind_addr: SocketAddr::new(args.host, port),
            default_api_key: api_key.clone(),
        })
        .collect();

    start_all(configs).await?;
    Ok(())
}

/// Explicit --port flags win; otherwise MCP_SERVER_PORT (comma-separated),
/// otherwise the default port.
fn resolve_ports(cli_ports: &[u16], env_ports: Option<String>) -> Vec<u16> {
    if !cli_ports.is_empty() {
        return cli_ports.to_vec();
    }
    if let Some(raw) = env_ports {
        let parsed: Vec<u16> = raw
            .split(',')
            .filter_map(|p| p.trim().parse().ok())
            .collect();
        if !parsed.is_empty() {
            return parsed;
        }
    }
    vec![DEFAULT_PORT]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_ports_take_priority() {
        assert_eq!(
            resolve_ports(&[8080, 8081], Some("9000".into())),
            vec![8080, 8081]
        );
    }

    #[test]
    fn env_ports_are_comma_separated() {
        assert_eq!(
            resolve_ports(&[], Some("9000, 9001".into())),
            vec![9000, 9001]
        );
    }

    #[test]
    fn unusable_env_falls_back_to_default() {
        assert_eq!(resolve_ports(&[], Some("not-a-port".into())), vec![3000]);
        assert_eq!(resolve_ports(&[], None), vec![3000]);
    }
}
