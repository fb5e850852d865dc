//! MCP Server implementation for SAP Gateway OData
//!
//! Exposes tools for connecting to a Gateway host and querying its services

use crate::mcp::protocol::*;
use crate::odata::{ConnectionConfig, ODataClient, QueryOptions, RecordSet};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// MCP Server for SAP Gateway OData
pub struct GatewayMcpServer {
    client: Arc<ODataClient>,
}

impl GatewayMcpServer {
    /// Create a new MCP server instance
    pub fn new(client: Arc<ODataClient>) -> Self {
        Self { client }
    }

    /// Get list of available tools
    pub fn get_tools(&self) -> Vec<Tool> {
        Self::get_tools_static()
    }

    /// Get list of available tools (static version for unconfigured server)
    pub fn get_tools_static() -> Vec<Tool> {
        vec![
            Tool {
                name: "connect".to_string(),
                description: "Connect to an SAP Gateway OData endpoint with basic authentication. Tears down any existing session first.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("baseUrl", "string", "Service root URL, e.g. 'https://host:44300/sap/opu/odata/sap'", true),
                    ("username", "string", "Logon user", true),
                    ("password", "string", "Logon password", true),
                    ("client", "string", "SAP client code, e.g. '100' (sent as sap-client header)", false),
                    ("timeout", "number", "Request timeout in milliseconds (default: 30000)", false),
                    ("validateSSL", "boolean", "Verify TLS certificates (default: true)", false),
                    ("enableCSRF", "boolean", "Fetch a CSRF token on connect (default: true)", false),
                ]),
            },
            Tool {
                name: "get_services".to_string(),
                description: "Discover OData services on the connected host: catalog service first, well-known service names as fallback. The result reports which strategy produced it.".to_string(),
                input_schema: create_tool_schema(vec![]),
            },
            Tool {
                name: "get_service_metadata".to_string(),
                description: "Fetch $metadata for a service and list its entity types, properties and function imports.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("serviceName", "string", "Technical service name, e.g. 'ZORDER_SRV'", true),
                ]),
            },
            Tool {
                name: "query_entity_set".to_string(),
                description: "Query an entity set with OData options. Filter/orderby expressions are passed through verbatim.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("serviceName", "string", "Technical service name", true),
                    ("entitySet", "string", "Entity set name, e.g. 'Orders'", true),
                    ("select", "string", "Comma-separated fields to select", false),
                    ("filter", "string", "OData filter expression, e.g. \"Price gt 10\"", false),
                    ("orderby", "string", "Sort order, e.g. 'CreatedAt desc'", false),
                    ("top", "number", "Maximum records to return", false),
                    ("skip", "number", "Records to skip (for pagination)", false),
                    ("expand", "string", "Comma-separated navigation properties to expand", false),
                ]),
            },
            Tool {
                name: "get_entity".to_string(),
                description: "Read a single entity by key values.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("serviceName", "string", "Technical service name", true),
                    ("entitySet", "string", "Entity set name", true),
                    ("keyValues", "object", "Key fields as an object, e.g. {\"ID\": \"42\"}", true),
                ]),
            },
            Tool {
                name: "create_entity".to_string(),
                description: "Create an entity in an entity set.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("serviceName", "string", "Technical service name", true),
                    ("entitySet", "string", "Entity set name", true),
                    ("data", "object", "Entity payload", true),
                ]),
            },
            Tool {
                name: "update_entity".to_string(),
                description: "Replace an entity identified by key values (PUT).".to_string(),
                input_schema: create_tool_schema(vec![
                    ("serviceName", "string", "Technical service name", true),
                    ("entitySet", "string", "Entity set name", true),
                    ("keyValues", "object", "Key fields as an object", true),
                    ("data", "object", "Full entity payload", true),
                ]),
            },
            Tool {
                name: "delete_entity".to_string(),
                description: "Delete an entity identified by key values.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("serviceName", "string", "Technical service name", true),
                    ("entitySet", "string", "Entity set name", true),
                    ("keyValues", "object", "Key fields as an object", true),
                ]),
            },
            Tool {
                name: "call_function".to_string(),
                description: "Invoke a function import with query-string parameters.".to_string(),
                input_schema: create_tool_schema(vec![
                    ("serviceName", "string", "Technical service name", true),
                    ("functionName", "string", "Function import name", true),
                    ("parameters", "object", "Function parameters (values are stringified)", false),
                ]),
            },
            Tool {
                name: "connection_status".to_string(),
                description: "Report the session state, including a live connectivity probe.".to_string(),
                input_schema: create_tool_schema(vec![]),
            },
            Tool {
                name: "disconnect".to_string(),
                description: "Tear down the session and clear CSRF token and cookies. Safe to call when not connected.".to_string(),
                input_schema: create_tool_schema(vec![]),
            },
        ]
    }

    /// Handle a tool call
    pub async fn call_tool(&self, name: &str, args: &HashMap<String, Value>) -> CallToolResult {
        match name {
            "connect" => self.connect(args).await,
            "get_services" => self.get_services().await,
            "get_service_metadata" => self.get_service_metadata(args).await,
            "query_entity_set" => self.query_entity_set(args).await,
            "get_entity" => self.get_entity(args).await,
            "create_entity" => self.create_entity(args).await,
            "update_entity" => self.update_entity(args).await,
            "delete_entity" => self.delete_entity(args).await,
            "call_function" => self.call_function(args).await,
            "connection_status" => self.connection_status().await,
            "disconnect" => self.disconnect().await,
            _ => CallToolResult::error(format!("Unknown tool: {}", name)),
        }
    }

    async fn connect(&self, args: &HashMap<String, Value>) -> CallToolResult {
        let raw = Value::Object(args.clone().into_iter().collect::<Map<_, _>>());
        let config: ConnectionConfig = match serde_json::from_value(raw) {
            Ok(c) => c,
            Err(e) => return CallToolResult::error(format!("Invalid connect arguments: {}", e)),
        };

        let base_url = config.base_url.clone();
        match self.client.connect(config).await {
            Ok(()) => CallToolResult::text(format!("Connected to {}", base_url)),
            Err(e) => CallToolResult::error(format!("Connection failed: {}", e)),
        }
    }

    async fn get_services(&self) -> CallToolResult {
        match self.client.get_services().await {
            Ok(result) => {
                let mut text = format!(
                    "Found {} service(s) via {} strategy\n",
                    result.services.len(),
                    result.source.as_str()
                );
                for service in &result.services {
                    text.push_str(&format!("- {} ({})", service.id, service.title));
                    if let Some(ref version) = service.version {
                        text.push_str(&format!(" v{}", version));
                    }
                    text.push('\n');
                }
                if let Some(ref hint) = result.hint {
                    text.push_str(hint);
                    text.push('\n');
                }
                let raw = serde_json::to_value(&result).unwrap_or_default();
                CallToolResult::with_data(text, raw)
            }
            Err(e) => CallToolResult::error(format!("Service discovery failed: {}", e)),
        }
    }

    async fn get_service_metadata(&self, args: &HashMap<String, Value>) -> CallToolResult {
        let Some(service) = str_arg(args, "serviceName") else {
            return missing("serviceName");
        };

        match self.client.get_service_metadata(service).await {
            Ok(model) => {
                let mut text = format!("## Service: {}\n\n", service);

                if model.is_empty() {
                    text.push_str(
                        "No entity types or function imports could be extracted; \
                         the raw document is attached.\n",
                    );
                } else {
                    text.push_str(&format!("### Entity Types ({})\n", model.entity_types.len()));
                    for entity in &model.entity_types {
                        text.push_str(&format!("- {}\n", entity.name));
                        for prop in &entity.properties {
                            text.push_str(&format!(
                                "    {}: {}{}\n",
                                prop.name,
                                prop.edm_type,
                                if prop.nullable { "" } else { " (not null)" }
                            ));
                        }
                    }
                    if !model.function_imports.is_empty() {
                        text.push_str(&format!(
                            "\n### Function Imports ({})\n",
                            model.function_imports.len()
                        ));
                        for function in &model.function_imports {
                            match &function.return_type {
                                Some(rt) => {
                                    text.push_str(&format!("- {} -> {}\n", function.name, rt))
                                }
                                None => text.push_str(&format!("- {}\n", function.name)),
                            }
                        }
                    }
                }

                let raw = serde_json::to_value(&model).unwrap_or_default();
                CallToolResult::with_data(text, raw)
            }
            Err(e) => CallToolResult::error(format!("Error fetching metadata for {}: {}", service, e)),
        }
    }

    async fn query_entity_set(&self, args: &HashMap<String, Value>) -> CallToolResult {
        let Some(service) = str_arg(args, "serviceName") else {
            return missing("serviceName");
        };
        let Some(entity_set) = str_arg(args, "entitySet") else {
            return missing("entitySet");
        };

        let options = QueryOptions {
            select: list_arg(args, "select"),
            filter: str_arg(args, "filter").map(String::from),
            orderby: str_arg(args, "orderby").map(String::from),
            top: number_arg(args, "top"),
            skip: number_arg(args, "skip"),
            expand: list_arg(args, "expand"),
        };

        match self.client.query_entity_set(service, entity_set, &options).await {
            Ok(body) => {
                let text = match RecordSet::from_body(&body) {
                    set @ (RecordSet::Results(_) | RecordSet::Value(_)) => {
                        let records = set.records().unwrap_or_default();
                        format!(
                            "Retrieved {} record(s) from {}/{} ({} envelope):\n\n{}",
                            records.len(),
                            service,
                            entity_set,
                            set.envelope(),
                            serde_json::to_string_pretty(records).unwrap_or_default()
                        )
                    }
                    RecordSet::Other(value) => format!(
                        "Response from {}/{}:\n\n{}",
                        service,
                        entity_set,
                        serde_json::to_string_pretty(&value).unwrap_or_default()
                    ),
                };
                CallToolResult::with_data(text, body)
            }
            Err(e) => CallToolResult::error(format!("Error querying {}/{}: {}", service, entity_set, e)),
        }
    }

    async fn get_entity(&self, args: &HashMap<String, Value>) -> CallToolResult {
        let Some(service) = str_arg(args, "serviceName") else {
            return missing("serviceName");
        };
        let Some(entity_set) = str_arg(args, "entitySet") else {
            return missing("entitySet");
        };
        let Some(keys) = object_arg(args, "keyValues") else {
            return missing("keyValues");
        };

        match self.client.get_entity(service, entity_set, keys).await {
            Ok(body) => {
                let text = format!(
                    "Entity from {}/{}:\n\n{}",
                    service,
                    entity_set,
                    serde_json::to_string_pretty(&body).unwrap_or_default()
                );
                CallToolResult::with_data(text, body)
            }
            Err(e) => CallToolResult::error(format!("Error reading entity: {}", e)),
        }
    }

    async fn create_entity(&self, args: &HashMap<String, Value>) -> CallToolResult {
        let Some(service) = str_arg(args, "serviceName") else {
            return missing("serviceName");
        };
        let Some(entity_set) = str_arg(args, "entitySet") else {
            return missing("entitySet");
        };
        let Some(data) = args.get("data").filter(|v| v.is_object()) else {
            return missing("data");
        };

        match self.client.create_entity(service, entity_set, data).await {
            Ok(body) => {
                let text = format!(
                    "Created entity in {}/{}:\n\n{}",
                    service,
                    entity_set,
                    serde_json::to_string_pretty(&body).unwrap_or_default()
                );
                CallToolResult::with_data(text, body)
            }
            Err(e) => CallToolResult::error(format!("Error creating entity: {}", e)),
        }
    }

    async fn update_entity(&self, args: &HashMap<String, Value>) -> CallToolResult {
        let Some(service) = str_arg(args, "serviceName") else {
            return missing("serviceName");
        };
        let Some(entity_set) = str_arg(args, "entitySet") else {
            return missing("entitySet");
        };
        let Some(keys) = object_arg(args, "keyValues") else {
            return missing("keyValues");
        };
        let Some(data) = args.get("data").filter(|v| v.is_object()) else {
            return missing("data");
        };

        match self.client.update_entity(service, entity_set, keys, data).await {
            Ok(body) => {
                let text = format!("Updated entity in {}/{}", service, entity_set);
                CallToolResult::with_data(text, body)
            }
            Err(e) => CallToolResult::error(format!("Error updating entity: {}", e)),
        }
    }

    async fn delete_entity(&self, args: &HashMap<String, Value>) -> CallToolResult {
        let Some(service) = str_arg(args, "serviceName") else {
            return missing("serviceName");
        };
        let Some(entity_set) = str_arg(args, "entitySet") else {
            return missing("entitySet");
        };
        let Some(keys) = object_arg(args, "keyValues") else {
            return missing("keyValues");
        };

        match self.client.delete_entity(service, entity_set, keys).await {
            Ok(()) => CallToolResult::text(format!(
                "Deleted entity from {}/{} ({})",
                service,
                entity_set,
                crate::odata::key_predicate(keys)
            )),
            Err(e) => CallToolResult::error(format!("Error deleting entity: {}", e)),
        }
    }

    async fn call_function(&self, args: &HashMap<String, Value>) -> CallToolResult {
        let Some(service) = str_arg(args, "serviceName") else {
            return missing("serviceName");
        };
        let Some(function) = str_arg(args, "functionName") else {
            return missing("functionName");
        };
        let empty = Map::new();
        let parameters = object_arg(args, "parameters").unwrap_or(&empty);

        match self.client.call_function(service, function, parameters).await {
            Ok(body) => {
                let text = format!(
                    "Result of {}/{}:\n\n{}",
                    service,
                    function,
                    serde_json::to_string_pretty(&body).unwrap_or_default()
                );
                CallToolResult::with_data(text, body)
            }
            Err(e) => CallToolResult::error(format!("Error calling {}/{}: {}", service, function, e)),
        }
    }

    async fn connection_status(&self) -> CallToolResult {
        let status = self.client.status().await;
        let text = if status.connected {
            format!(
                "Connected to {}{}\nCSRF token cached: {}\nCookies held: {}",
                status.base_url.as_deref().unwrap_or("(unknown)"),
                status
                    .client
                    .as_deref()
                    .map(|c| format!(" (client {})", c))
                    .unwrap_or_default(),
                if status.csrf_token_cached { "yes" } else { "no" },
                status.cookies
            )
        } else {
            "Not connected".to_string()
        };
        let raw = serde_json::to_value(&status).unwrap_or_default();
        CallToolResult::with_data(text, raw)
    }

    async fn disconnect(&self) -> CallToolResult {
        self.client.disconnect().await;
        CallToolResult::text("Disconnected; session state cleared".to_string())
    }
}

fn missing(name: &str) -> CallToolResult {
    CallToolResult::error(format!("Missing required parameter: {}", name))
}

fn str_arg<'a>(args: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// Parse a number argument from JSON (handles both string and number types)
fn number_arg(args: &HashMap<String, Value>, key: &str) -> Option<usize> {
    args.get(key).and_then(|v| {
        v.as_u64()
            .map(|n| n as usize)
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    })
}

/// Comma-separated list argument, trimmed.
fn list_arg(args: &HashMap<String, Value>, key: &str) -> Option<Vec<String>> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.split(',').map(|f| f.trim().to_string()).collect())
}

fn object_arg<'a>(args: &'a HashMap<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    args.get(key).and_then(|v| v.as_object())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server() -> GatewayMcpServer {
        GatewayMcpServer::new(Arc::new(ODataClient::new()))
    }

    fn args(value: Value) -> HashMap<String, Value> {
        value.as_object().unwrap().clone().into_iter().collect()
    }

    #[test]
    fn test_tool_table_complete() {
        let tools = GatewayMcpServer::get_tools_static();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "connect",
                "get_services",
                "get_service_metadata",
                "query_entity_set",
                "get_entity",
                "create_entity",
                "update_entity",
                "delete_entity",
                "call_function",
                "connection_status",
                "disconnect",
            ]
        );
        for tool in &tools {
            assert!(!tool.description.is_empty());
            assert!(tool.input_schema["properties"].is_object());
        }
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let result = server().call_tool("no_such_tool", &HashMap::new()).await;
        assert_eq!(result.is_error, Some(true));
        assert!(result.content[0].text.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_missing_required_parameter() {
        let result = server()
            .call_tool("query_entity_set", &args(json!({"serviceName": "ZSRV"})))
            .await;
        assert_eq!(result.is_error, Some(true));
        assert!(result.content[0].text.contains("entitySet"));
    }

    #[tokio::test]
    async fn test_get_entity_requires_key_object() {
        let result = server()
            .call_tool(
                "get_entity",
                &args(json!({
                    "serviceName": "ZSRV",
                    "entitySet": "Orders",
                    "keyValues": "42"
                })),
            )
            .await;
        assert_eq!(result.is_error, Some(true));
        assert!(result.content[0].text.contains("keyValues"));
    }

    #[tokio::test]
    async fn test_operation_without_session_is_tool_error() {
        let result = server()
            .call_tool(
                "query_entity_set",
                &args(json!({"serviceName": "ZSRV", "entitySet": "Orders"})),
            )
            .await;
        assert_eq!(result.is_error, Some(true));
        assert!(result.content[0].text.contains("not connected"));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_arguments() {
        let result = server()
            .call_tool("connect", &args(json!({"username": "x"})))
            .await;
        assert_eq!(result.is_error, Some(true));
        assert!(result.content[0].text.contains("Invalid connect arguments"));
    }

    #[tokio::test]
    async fn test_disconnect_always_succeeds() {
        let srv = server();
        let first = srv.call_tool("disconnect", &HashMap::new()).await;
        let second = srv.call_tool("disconnect", &HashMap::new()).await;
        assert!(first.is_error.is_none());
        assert!(second.is_error.is_none());
    }

    #[tokio::test]
    async fn test_connection_status_when_disconnected() {
        let result = server().call_tool("connection_status", &HashMap::new()).await;
        assert!(result.is_error.is_none());
        assert!(result.content[0].text.contains("Not connected"));
        let raw = result.structured_content.unwrap();
        assert_eq!(raw["connected"], false);
    }
}
