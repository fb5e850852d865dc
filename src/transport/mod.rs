//! Transport front-ends
//!
//! Interchangeable entry points: each accepts JSON-RPC requests from its
//! wire, forwards them through the same dispatch, and writes the responses
//! back. The tool layer never learns which transport carried the call.

pub mod http;
pub mod stdio;

use crate::mcp::{
    CallToolParams, CallToolResult, GatewayMcpServer, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, ServerCapabilities, ServerInfo, ToolsCapability,
};

/// Handle one protocol request. Notifications produce no response.
pub async fn handle_request(
    server: &GatewayMcpServer,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    let id = request.id.clone();

    let response = match request.method.as_str() {
        "initialize" => {
            let result = InitializeResult {
                protocol_version: "2024-11-05".to_string(),
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability {
                        list_changed: Some(false),
                    }),
                },
                server_info: ServerInfo {
                    name: "sap-odata-mcp".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            };
            JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
        }

        "initialized" | "notifications/initialized" => return None,

        "tools/list" => {
            let tools = server.get_tools();
            let result = ListToolsResult { tools };
            JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
        }

        "tools/call" => {
            let params: CallToolParams = match request.params {
                Some(p) => match serde_json::from_value(p) {
                    Ok(params) => params,
                    Err(e) => {
                        return Some(JsonRpcResponse::error(
                            id,
                            -32602,
                            &format!("Invalid params: {}", e),
                        ));
                    }
                },
                None => {
                    return Some(JsonRpcResponse::error(id, -32602, "Missing params"));
                }
            };

            let args = params.arguments.unwrap_or_default();
            let result: CallToolResult = server.call_tool(&params.name, &args).await;
            JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
        }

        "ping" => JsonRpcResponse::success(id, serde_json::json!({})),

        _ => JsonRpcResponse::error(
            id,
            -32601,
            &format!("Method not found: {}", request.method),
        ),
    };

    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odata::ODataClient;
    use serde_json::json;
    use std::sync::Arc;

    fn server() -> GatewayMcpServer {
        GatewayMcpServer::new(Arc::new(ODataClient::new()))
    }

    fn request(method: &str, params: Option<serde_json::Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_initialize() {
        let response = handle_request(&server(), request("initialize", None))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "sap-odata-mcp");
        assert_eq!(result["protocolVersion"], "2024-11-05");
    }

    #[tokio::test]
    async fn test_initialized_notification_has_no_response() {
        assert!(handle_request(&server(), request("initialized", None))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_tools_list() {
        let response = handle_request(&server(), request("tools/list", None))
            .await
            .unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 11);
    }

    #[tokio::test]
    async fn test_tools_call_without_params() {
        let response = handle_request(&server(), request("tools/call", None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_tools_call_dispatches() {
        let response = handle_request(
            &server(),
            request("tools/call", Some(json!({"name": "connection_status"}))),
        )
        .await
        .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["structuredContent"]["connected"], false);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = handle_request(&server(), request("resources/list", None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }
}
