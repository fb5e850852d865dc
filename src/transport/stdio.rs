//! stdio transport
//!
//! Newline-delimited JSON-RPC on stdin/stdout. Logs go to stderr; stdout is
//! reserved for the protocol.

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::mcp::{GatewayMcpServer, JsonRpcRequest, JsonRpcResponse};
use crate::transport::handle_request;

pub async fn run(server: GatewayMcpServer) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = FramedRead::new(stdin, LinesCodec::new());

    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        tracing::debug!("received: {}", line);

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let response = JsonRpcResponse::error(None, -32700, &format!("Parse error: {}", e));
                write_response(&mut stdout, &response).await?;
                continue;
            }
        };

        if let Some(response) = handle_request(&server, request).await {
            write_response(&mut stdout, &response).await?;
        }
    }

    Ok(())
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    response: &JsonRpcResponse,
) -> anyhow::Result<()> {
    let json = serde_json::to_string(response)?;
    tracing::debug!("sending: {}", json);
    stdout.write_all(json.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
