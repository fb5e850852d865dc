//! Session and transport layer
//!
//! Owns the outbound HTTP connection configuration and the ephemeral
//! per-session state (CSRF token, cookies) replayed on later requests.

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;

use crate::odata::ODataError;

/// Header carrying the anti-forgery token on both directions.
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Request value asking the backend to issue a token.
pub const CSRF_FETCH: &str = "Fetch";
/// Placeholder the backend echoes when a token is demanded but absent.
pub const CSRF_REQUIRED: &str = "Required";

/// Connection parameters for one Gateway session.
///
/// Deserializes from both the TOML config file (snake_case) and the
/// `connect` tool arguments (camelCase), hence the aliases.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(alias = "baseUrl")]
    pub base_url: String,

    pub username: String,
    pub password: String,

    /// SAP client code, sent as the `sap-client` header when present.
    #[serde(default)]
    pub client: Option<String>,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms", alias = "timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_true", alias = "validateSSL")]
    pub validate_ssl: bool,

    #[serde(default = "default_true", alias = "enableCSRF")]
    pub enable_csrf: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

/// Ephemeral session state, mutated only by the client.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub connected: bool,
    pub csrf_token: Option<String>,
    /// Ordered `name=value` pairs, attribute suffixes already discarded.
    pub cookies: Vec<String>,
}

impl SessionState {
    pub fn clear(&mut self) {
        self.connected = false;
        self.csrf_token = None;
        self.cookies.clear();
    }
}

/// One authenticated HTTP session against a Gateway host.
#[derive(Debug)]
pub struct Session {
    config: ConnectionConfig,
    http: Client,
    pub state: SessionState,
}

impl Session {
    /// Build the HTTP client for this connection's timeout/SSL settings.
    pub fn new(mut config: ConnectionConfig) -> Result<Self, ODataError> {
        while config.base_url.ends_with('/') {
            config.base_url.pop();
        }

        let mut builder = Client::builder().timeout(Duration::from_millis(config.timeout_ms));
        if !config.validate_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| ODataError::ConnectionFailed(format!("http client setup: {e}")))?;

        Ok(Self {
            config,
            http,
            state: SessionState::default(),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Service root, no trailing slash.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// `scheme://host[:port]` of the base URL, for host-rooted paths such as
    /// the catalog service.
    pub fn origin(&self) -> String {
        match reqwest::Url::parse(&self.config.base_url) {
            Ok(url) => {
                let mut origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or(""));
                if let Some(port) = url.port() {
                    origin.push_str(&format!(":{port}"));
                }
                origin
            }
            Err(_) => self
                .config
                .base_url
                .split('/')
                .take(3)
                .collect::<Vec<_>>()
                .join("/"),
        }
    }

    /// Build a request with auth and session headers applied.
    ///
    /// The CSRF token rides only on state-changing methods; the backend
    /// rejects it on reads from some releases.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let is_read = method == Method::GET || method == Method::HEAD;

        let mut builder = self
            .http
            .request(method, url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header("Accept", "application/json");

        if let Some(ref client) = self.config.client {
            builder = builder.header("sap-client", client.as_str());
        }

        if !is_read {
            if let Some(ref token) = self.state.csrf_token {
                builder = builder.header(CSRF_HEADER, token.as_str());
            }
        }

        if !self.state.cookies.is_empty() {
            builder = builder.header("Cookie", self.state.cookies.join("; "));
        }

        builder
    }

    /// Capture the CSRF token and cookies a response hands back.
    pub fn absorb(&mut self, response: &Response) {
        if let Some(token) = response
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if !token.eq_ignore_ascii_case(CSRF_REQUIRED) {
                self.state.csrf_token = Some(token.to_string());
            }
        }

        for value in response.headers().get_all("set-cookie") {
            if let Some(pair) = value.to_str().ok().and_then(cookie_pair) {
                // Re-issued cookies replace the prior value.
                let name = pair.split('=').next().unwrap_or_default().to_string();
                self.state
                    .cookies
                    .retain(|c| c.split('=').next().unwrap_or_default() != name);
                self.state.cookies.push(pair);
            }
        }
    }

    /// Stale credentials are worse than none: a 401 empties the session so
    /// the next operation fails fast as "not connected".
    pub fn invalidate_if_unauthorized(&mut self, status: reqwest::StatusCode) {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.state.clear();
        }
    }
}

/// `name=value` prefix of a Set-Cookie header, attributes discarded.
fn cookie_pair(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    if pair.contains('=') {
        Some(pair.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> ConnectionConfig {
        ConnectionConfig {
            base_url: base_url.to_string(),
            username: "user".to_string(),
            password: "secret".to_string(),
            client: None,
            timeout_ms: 30_000,
            validate_ssl: true,
            enable_csrf: true,
        }
    }

    #[test]
    fn test_base_url_normalized() {
        let session = Session::new(config("https://gw.example.com:44300/sap/opu/odata/sap/")).unwrap();
        assert_eq!(session.base_url(), "https://gw.example.com:44300/sap/opu/odata/sap");
    }

    #[test]
    fn test_origin_keeps_port() {
        let session = Session::new(config("https://gw.example.com:44300/sap/opu/odata/sap")).unwrap();
        assert_eq!(session.origin(), "https://gw.example.com:44300");
    }

    #[test]
    fn test_origin_without_port() {
        let session = Session::new(config("https://gw.example.com/sap/opu/odata/sap")).unwrap();
        assert_eq!(session.origin(), "https://gw.example.com");
    }

    #[test]
    fn test_cookie_pair_strips_attributes() {
        assert_eq!(
            cookie_pair("SAP_SESSIONID=abc123; path=/; HttpOnly").as_deref(),
            Some("SAP_SESSIONID=abc123")
        );
        assert_eq!(cookie_pair("malformed"), None);
    }

    #[test]
    fn test_connect_args_deserialize_camel_case() {
        let args: ConnectionConfig = serde_json::from_value(serde_json::json!({
            "baseUrl": "https://gw.example.com/sap/opu/odata/sap",
            "username": "DEVELOPER",
            "password": "pw",
            "client": "100",
            "timeout": 5000,
            "validateSSL": false
        }))
        .unwrap();
        assert_eq!(args.client.as_deref(), Some("100"));
        assert_eq!(args.timeout_ms, 5000);
        assert!(!args.validate_ssl);
        assert!(args.enable_csrf);
    }

    #[test]
    fn test_state_clear() {
        let mut state = SessionState {
            connected: true,
            csrf_token: Some("tok".to_string()),
            cookies: vec!["a=1".to_string()],
        };
        state.clear();
        assert!(!state.connected);
        assert!(state.csrf_token.is_none());
        assert!(state.cookies.is_empty());
    }
}
