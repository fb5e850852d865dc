//! SAP OData MCP Server
//!
//! Entry point for the MCP server binary.
//! Serves the tool surface over stdio (default) or HTTP/SSE.

use sap_odata_mcp::config::{Config, Transport};
use sap_odata_mcp::mcp::GatewayMcpServer;
use sap_odata_mcp::odata::ODataClient;
use sap_odata_mcp::transport;
use std::io;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging to stderr (stdout carries the protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    tracing::info!("Starting SAP OData MCP Server...");

    let config = Config::load_default()?;
    let runtime = config.to_runtime()?;

    let client = Arc::new(ODataClient::new());

    // A preconfigured connection is a convenience, not a requirement; the
    // connect tool can establish or replace the session at any time.
    if let Some(connection) = runtime.connection.clone() {
        let base_url = connection.base_url.clone();
        match client.connect(connection).await {
            Ok(()) => tracing::info!("attached to configured endpoint {}", base_url),
            Err(e) => tracing::warn!("configured connection to {} failed: {}", base_url, e),
        }
    }

    let server = GatewayMcpServer::new(client);

    match runtime.transport {
        Transport::Stdio => {
            tracing::info!("MCP Server ready, listening on stdio...");
            transport::stdio::run(server).await
        }
        Transport::Http => transport::http::run(server, &runtime.http_bind).await,
    }
}
