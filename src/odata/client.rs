//! OData Client module
//!
//! HTTP client for SAP Gateway OData services: connection lifecycle,
//! service discovery, metadata retrieval and the entity CRUD/query/function
//! operations.

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::odata::discovery::{self, DiscoveryResult};
use crate::odata::metadata::{self, MetadataModel};
use crate::odata::session::{ConnectionConfig, Session, CSRF_FETCH, CSRF_HEADER};

/// Shorter deadline for liveness/discovery probes so fallback chains stay
/// responsive even when the session timeout is generous.
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// OData client errors
#[derive(Error, Debug)]
pub enum ODataError {
    #[error("authentication failed (401): check username and password")]
    AuthenticationFailed,

    #[error("authorization failed (403): user is not permitted to access this resource")]
    AuthorizationFailed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no response received: {0}")]
    Network(String),

    #[error("unexpected payload: {0}")]
    Protocol(String),

    #[error("not connected: call the connect tool first")]
    NotConnected,

    #[error("HTTP {status} {reason}: {detail}")]
    Http {
        status: u16,
        reason: String,
        detail: String,
    },

    #[error("connection failed: {0}")]
    ConnectionFailed(String),
}

/// Query options for OData requests, passed through verbatim.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub select: Option<Vec<String>>,
    pub filter: Option<String>,
    pub orderby: Option<String>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub expand: Option<Vec<String>>,
}

impl QueryOptions {
    /// Build the query string. Expression values are percent-encoded;
    /// field lists are plain identifier lists and go out as-is.
    pub fn to_query_string(&self) -> String {
        let mut params = Vec::new();

        if let Some(ref select) = self.select {
            params.push(format!("$select={}", select.join(",")));
        }

        if let Some(top) = self.top {
            params.push(format!("$top={top}"));
        }

        if let Some(skip) = self.skip {
            params.push(format!("$skip={skip}"));
        }

        if let Some(ref filter) = self.filter {
            params.push(format!("$filter={}", urlencoding::encode(filter)));
        }

        if let Some(ref orderby) = self.orderby {
            params.push(format!("$orderby={}", urlencoding::encode(orderby)));
        }

        if let Some(ref expand) = self.expand {
            params.push(format!("$expand={}", expand.join(",")));
        }

        if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        }
    }
}

/// Record envelope conventions observed across Gateway releases.
///
/// Downstream code branches on this discriminant instead of duck-typing the
/// payload shape.
#[derive(Debug)]
pub enum RecordSet {
    /// Version 2 envelope: `{"d": {"results": [...]}}`.
    Results(Vec<Value>),
    /// Version 4 envelope: `{"value": [...]}`.
    Value(Vec<Value>),
    /// Single entity or anything else.
    Other(Value),
}

impl RecordSet {
    pub fn from_body(body: &Value) -> RecordSet {
        if let Some(results) = body
            .get("d")
            .and_then(|d| d.get("results"))
            .and_then(Value::as_array)
        {
            return RecordSet::Results(results.clone());
        }
        if let Some(value) = body.get("value").and_then(Value::as_array) {
            return RecordSet::Value(value.clone());
        }
        RecordSet::Other(body.clone())
    }

    pub fn records(&self) -> Option<&[Value]> {
        match self {
            RecordSet::Results(r) | RecordSet::Value(r) => Some(r),
            RecordSet::Other(_) => None,
        }
    }

    pub fn envelope(&self) -> &'static str {
        match self {
            RecordSet::Results(_) => "results",
            RecordSet::Value(_) => "value",
            RecordSet::Other(_) => "other",
        }
    }
}

/// Snapshot of the session reported by the `connection_status` tool.
#[derive(Debug, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub csrf_token_cached: bool,
    pub cookies: usize,
}

/// OData client owning at most one active Gateway session.
///
/// Hosts that want several concurrent sessions construct several clients;
/// the session state is never ambient.
#[derive(Debug, Default)]
pub struct ODataClient {
    session: RwLock<Option<Session>>,
}

impl ODataClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish a session: optional CSRF handshake, then a connectivity
    /// probe with catalog-first fallback.
    ///
    /// Any previously active session is torn down first.
    pub async fn connect(&self, config: ConnectionConfig) -> Result<(), ODataError> {
        let mut guard = self.session.write().await;
        *guard = None;

        let mut session = Session::new(config)?;

        if session.config().enable_csrf {
            // Some backends never issue a token; failure here is not fatal.
            if let Err(e) = fetch_csrf_token(&mut session).await {
                tracing::debug!("CSRF token prefetch failed, continuing without: {e}");
            }
        }

        if let Err(catalog_err) = probe_catalog(&mut session).await {
            tracing::debug!("catalog probe failed ({catalog_err}), probing base path");
            probe_base_path(&mut session).await?;
        }

        session.state.connected = true;
        tracing::info!("connected to {}", session.base_url());
        *guard = Some(session);
        Ok(())
    }

    /// Liveness check with a network round-trip, not a cached flag.
    pub async fn is_connected(&self) -> bool {
        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut() else {
            return false;
        };
        if !session.state.connected {
            return false;
        }

        let url = format!("{}/", session.base_url());
        let request = session.request(Method::GET, &url).timeout(PROBE_TIMEOUT);
        match request.send().await {
            Ok(response) => {
                session.absorb(&response);
                let status = response.status();
                if status.is_success() || status == StatusCode::NOT_FOUND {
                    true
                } else {
                    session.state.clear();
                    false
                }
            }
            Err(_) => {
                session.state.clear();
                false
            }
        }
    }

    /// Idempotent teardown; never fails.
    pub async fn disconnect(&self) {
        let mut guard = self.session.write().await;
        if let Some(session) = guard.as_mut() {
            session.state.clear();
        }
        *guard = None;
    }

    /// Live probe plus a snapshot of the held session state.
    pub async fn status(&self) -> ConnectionStatus {
        let connected = self.is_connected().await;
        let guard = self.session.read().await;
        match guard.as_ref() {
            Some(session) => ConnectionStatus {
                connected,
                base_url: Some(session.base_url().to_string()),
                client: session.config().client.clone(),
                csrf_token_cached: session.state.csrf_token.is_some(),
                cookies: session.state.cookies.len(),
            },
            None => ConnectionStatus {
                connected: false,
                base_url: None,
                client: None,
                csrf_token_cached: false,
                cookies: 0,
            },
        }
    }

    /// Best-effort service discovery; see the discovery module for the
    /// strategy order.
    pub async fn get_services(&self) -> Result<DiscoveryResult, ODataError> {
        let mut guard = self.session.write().await;
        let session = require_session(&mut guard)?;
        discovery::discover(session, PROBE_TIMEOUT).await
    }

    /// Fetch and extract `$metadata` for a service. Extraction is
    /// best-effort; only the HTTP fetch itself can fail.
    pub async fn get_service_metadata(&self, service: &str) -> Result<MetadataModel, ODataError> {
        let mut guard = self.session.write().await;
        let session = require_session(&mut guard)?;

        let url = format!("{}/{}/$metadata", session.base_url(), service);
        let request = session
            .request(Method::GET, &url)
            .header("Accept", "application/xml");
        let response = send(session, request).await?;

        if !response.status().is_success() {
            return Err(fail_from_response(response, &format!("metadata for {service}")).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ODataError::Protocol(format!("reading metadata body: {e}")))?;
        Ok(metadata::extract(&String::from_utf8_lossy(&bytes)))
    }

    /// GET an entity set with query options applied.
    pub async fn query_entity_set(
        &self,
        service: &str,
        entity_set: &str,
        options: &QueryOptions,
    ) -> Result<Value, ODataError> {
        let mut guard = self.session.write().await;
        let session = require_session(&mut guard)?;

        let url = format!(
            "{}/{}/{}{}",
            session.base_url(),
            service,
            entity_set,
            options.to_query_string()
        );
        tracing::debug!("querying {url}");

        let request = session.request(Method::GET, &url);
        let response = send(session, request).await?;
        json_body(response, &format!("{service}/{entity_set}")).await
    }

    /// Point read by key predicate.
    pub async fn get_entity(
        &self,
        service: &str,
        entity_set: &str,
        key_values: &Map<String, Value>,
    ) -> Result<Value, ODataError> {
        let mut guard = self.session.write().await;
        let session = require_session(&mut guard)?;

        let url = keyed_url(session.base_url(), service, entity_set, key_values);
        let request = session.request(Method::GET, &url);
        let response = send(session, request).await?;
        json_body(response, &format!("{service}/{entity_set}")).await
    }

    pub async fn create_entity(
        &self,
        service: &str,
        entity_set: &str,
        data: &Value,
    ) -> Result<Value, ODataError> {
        let mut guard = self.session.write().await;
        let session = require_session(&mut guard)?;

        let url = format!("{}/{}/{}", session.base_url(), service, entity_set);
        let request = session.request(Method::POST, &url).json(data);
        let response = send(session, request).await?;
        json_body_or_empty(response, &format!("create in {service}/{entity_set}")).await
    }

    pub async fn update_entity(
        &self,
        service: &str,
        entity_set: &str,
        key_values: &Map<String, Value>,
        data: &Value,
    ) -> Result<Value, ODataError> {
        let mut guard = self.session.write().await;
        let session = require_session(&mut guard)?;

        let url = keyed_url(session.base_url(), service, entity_set, key_values);
        let request = session.request(Method::PUT, &url).json(data);
        let response = send(session, request).await?;
        json_body_or_empty(response, &format!("update in {service}/{entity_set}")).await
    }

    pub async fn delete_entity(
        &self,
        service: &str,
        entity_set: &str,
        key_values: &Map<String, Value>,
    ) -> Result<(), ODataError> {
        let mut guard = self.session.write().await;
        let session = require_session(&mut guard)?;

        let url = keyed_url(session.base_url(), service, entity_set, key_values);
        let request = session.request(Method::DELETE, &url);
        let response = send(session, request).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(fail_from_response(response, &format!("delete in {service}/{entity_set}")).await)
        }
    }

    /// Invoke a function import with stringified query parameters.
    pub async fn call_function(
        &self,
        service: &str,
        function: &str,
        parameters: &Map<String, Value>,
    ) -> Result<Value, ODataError> {
        let mut guard = self.session.write().await;
        let session = require_session(&mut guard)?;

        let mut url = format!("{}/{}/{}", session.base_url(), service, function);
        if !parameters.is_empty() {
            let query: Vec<String> = parameters
                .iter()
                .map(|(name, value)| format!("{}={}", name, urlencoding::encode(&stringify(value))))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }

        let request = session.request(Method::GET, &url);
        let response = send(session, request).await?;
        json_body(response, &format!("{service}/{function}")).await
    }
}

/// Comma-joined `Key='encoded'` predicate in parens appended to the set path.
fn keyed_url(
    base: &str,
    service: &str,
    entity_set: &str,
    key_values: &Map<String, Value>,
) -> String {
    format!("{base}/{service}/{entity_set}({})", key_predicate(key_values))
}

/// Serialize key values into an OData key predicate. Member order of the
/// incoming object is preserved.
pub fn key_predicate(key_values: &Map<String, Value>) -> String {
    key_values
        .iter()
        .map(|(name, value)| format!("{}='{}'", name, urlencoding::encode(&stringify(value))))
        .collect::<Vec<_>>()
        .join(",")
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn require_session(guard: &mut Option<Session>) -> Result<&mut Session, ODataError> {
    match guard {
        Some(session) if session.state.connected => Ok(session),
        _ => Err(ODataError::NotConnected),
    }
}

/// Dispatch a request through the session interceptor: absorb response
/// headers, drop the session state on a 401.
pub(crate) async fn send(
    session: &mut Session,
    request: RequestBuilder,
) -> Result<Response, ODataError> {
    let response = request
        .send()
        .await
        .map_err(|e| ODataError::Network(e.to_string()))?;
    session.absorb(&response);
    session.invalidate_if_unauthorized(response.status());
    Ok(response)
}

async fn json_body(response: Response, context: &str) -> Result<Value, ODataError> {
    if !response.status().is_success() {
        return Err(fail_from_response(response, context).await);
    }
    response
        .json()
        .await
        .map_err(|e| ODataError::Protocol(format!("{context}: {e}")))
}

/// Mutations may come back 204 with no body; map that to JSON null.
async fn json_body_or_empty(response: Response, context: &str) -> Result<Value, ODataError> {
    if !response.status().is_success() {
        return Err(fail_from_response(response, context).await);
    }
    let text = response
        .text()
        .await
        .map_err(|e| ODataError::Protocol(format!("{context}: {e}")))?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| ODataError::Protocol(format!("{context}: {e}")))
}

pub(crate) async fn fail_from_response(response: Response, context: &str) -> ODataError {
    let status = response.status();
    let reason = status.canonical_reason().unwrap_or("").to_string();
    let body = response.text().await.unwrap_or_default();

    match status {
        StatusCode::UNAUTHORIZED => ODataError::AuthenticationFailed,
        StatusCode::FORBIDDEN => ODataError::AuthorizationFailed,
        StatusCode::NOT_FOUND => ODataError::NotFound(format!("{context}: {}", excerpt(&body))),
        _ => ODataError::Http {
            status: status.as_u16(),
            reason,
            detail: format!("{context}: {}", excerpt(&body)),
        },
    }
}

fn excerpt(body: &str) -> &str {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "(empty body)";
    }
    let mut end = trimmed.len().min(300);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    &trimmed[..end]
}

/// GET-with-special-header handshake; the token and session cookies arrive
/// via response headers and are absorbed into the session.
async fn fetch_csrf_token(session: &mut Session) -> Result<(), ODataError> {
    let url = format!("{}/", session.base_url());
    let request = session
        .request(Method::GET, &url)
        .header(CSRF_HEADER, CSRF_FETCH)
        .timeout(PROBE_TIMEOUT);
    let response = send(session, request).await?;
    let status = response.status();

    if session.state.csrf_token.is_some() {
        tracing::debug!("CSRF token obtained");
        Ok(())
    } else {
        Err(ODataError::Protocol(format!(
            "no token header in {status} response"
        )))
    }
}

/// First connectivity probe: the catalog service document. Any non-2xx is an
/// error so the caller can fall back to the base-path classification.
async fn probe_catalog(session: &mut Session) -> Result<(), ODataError> {
    let url = discovery::primary_catalog_url(&session.origin());
    let request = session.request(Method::GET, &url).timeout(PROBE_TIMEOUT);
    let response = send(session, request).await?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(fail_from_response(response, "catalog probe").await)
    }
}

/// Fallback probe against the bare base path.
///
/// A 404 here counts as success: this class of backend serves no document at
/// the service root, so reaching its 404 handler proves the credentials were
/// accepted. Backend-specific behavior, not an OData contract.
async fn probe_base_path(session: &mut Session) -> Result<(), ODataError> {
    let url = format!("{}/", session.base_url());
    let request = session.request(Method::GET, &url).timeout(PROBE_TIMEOUT);
    let response = send(session, request).await?;

    match response.status() {
        status if status.is_success() => Ok(()),
        StatusCode::NOT_FOUND => Ok(()),
        StatusCode::UNAUTHORIZED => Err(ODataError::AuthenticationFailed),
        StatusCode::FORBIDDEN => Err(ODataError::AuthorizationFailed),
        status => Err(ODataError::ConnectionFailed(format!(
            "unexpected status {status} from base path"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_options_empty() {
        let options = QueryOptions::default();
        assert_eq!(options.to_query_string(), "");
    }

    #[test]
    fn test_query_options_full() {
        let options = QueryOptions {
            select: Some(vec!["Name".to_string(), "Price".to_string()]),
            filter: Some("Status eq 'active'".to_string()),
            orderby: Some("Name asc".to_string()),
            top: Some(10),
            skip: Some(20),
            expand: Some(vec!["ToItems".to_string()]),
        };

        let query = options.to_query_string();
        assert!(query.starts_with('?'));
        assert!(query.contains("$select=Name,Price"));
        assert!(query.contains("$filter=Status%20eq%20%27active%27"));
        assert!(query.contains("$orderby=Name%20asc"));
        assert!(query.contains("$top=10"));
        assert!(query.contains("$skip=20"));
        assert!(query.contains("$expand=ToItems"));
    }

    #[test]
    fn test_query_options_top_filter_contract() {
        let options = QueryOptions {
            filter: Some("Price gt 10".to_string()),
            top: Some(5),
            ..Default::default()
        };
        assert!(options
            .to_query_string()
            .contains("$top=5&$filter=Price%20gt%2010"));
    }

    #[test]
    fn test_key_predicate_single() {
        let keys = json!({"ID": "42"});
        assert_eq!(key_predicate(keys.as_object().unwrap()), "ID='42'");
    }

    #[test]
    fn test_key_predicate_encodes_and_joins() {
        let keys = json!({"OrderID": "5 0", "ItemNo": 10});
        assert_eq!(
            key_predicate(keys.as_object().unwrap()),
            "OrderID='5%200',ItemNo='10'"
        );
    }

    #[test]
    fn test_keyed_url_same_predicate_for_all_operations() {
        let keys = json!({"ID": "42"});
        let url = keyed_url(
            "https://gw.example.com/sap/opu/odata/sap",
            "ZSRV",
            "Orders",
            keys.as_object().unwrap(),
        );
        assert_eq!(
            url,
            "https://gw.example.com/sap/opu/odata/sap/ZSRV/Orders(ID='42')"
        );
    }

    #[test]
    fn test_record_set_results_envelope() {
        let body = json!({"d": {"results": [{"a": 1}, {"a": 2}]}});
        let set = RecordSet::from_body(&body);
        assert_eq!(set.envelope(), "results");
        assert_eq!(set.records().unwrap().len(), 2);
    }

    #[test]
    fn test_record_set_value_envelope() {
        let body = json!({"value": [{"a": 1}]});
        let set = RecordSet::from_body(&body);
        assert_eq!(set.envelope(), "value");
        assert_eq!(set.records().unwrap().len(), 1);
    }

    #[test]
    fn test_record_set_single_entity() {
        let body = json!({"d": {"ID": "42"}});
        let set = RecordSet::from_body(&body);
        assert_eq!(set.envelope(), "other");
        assert!(set.records().is_none());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let client = ODataClient::new();
        let err = client
            .query_entity_set("ZSRV", "Orders", &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ODataError::NotConnected));

        let err = client.get_services().await.unwrap_err();
        assert!(matches!(err, ODataError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_idempotent_on_fresh_client() {
        let client = ODataClient::new();
        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_status_without_session() {
        let client = ODataClient::new();
        let status = client.status().await;
        assert!(!status.connected);
        assert!(status.base_url.is_none());
        assert_eq!(status.cookies, 0);
    }
}
