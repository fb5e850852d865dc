//! Configuration module
//!
//! TOML file plus environment overrides. The connection section is optional:
//! most sessions are established at runtime through the `connect` tool, but a
//! preconfigured connection lets the server attach to a known host on
//! startup.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::odata::ConnectionConfig;

/// Environment variable naming a config file path.
pub const CONFIG_PATH_ENV: &str = "SAP_ODATA_MCP_CONFIG";
/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "sap-odata-mcp.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("incomplete connection settings: {0}")]
    Incomplete(String),
}

/// Which front-end carries the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
    Http,
}

/// Raw configuration as read from the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub connection: Option<ConnectionSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub transport: Transport,
    #[serde(default = "default_http_bind")]
    pub http_bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            http_bind: default_http_bind(),
        }
    }
}

fn default_http_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// Partial connection settings; the environment may supply the rest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionSection {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client: Option<String>,
    pub timeout_ms: Option<u64>,
    pub validate_ssl: Option<bool>,
    pub enable_csrf: Option<bool>,
}

/// Resolved configuration used by the binary.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub transport: Transport,
    pub http_bind: String,
    pub connection: Option<ConnectionConfig>,
}

impl Config {
    /// Load from `SAP_ODATA_MCP_CONFIG`, else `sap-odata-mcp.toml` if present,
    /// else defaults.
    pub fn load_default() -> Result<Config, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::load(Path::new(&path));
        }
        let default = Path::new(DEFAULT_CONFIG_FILE);
        if default.exists() {
            return Self::load(default);
        }
        Ok(Config::default())
    }

    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply environment overrides and resolve into runtime settings.
    pub fn to_runtime(self) -> Result<RuntimeConfig, ConfigError> {
        let mut section = self.connection.unwrap_or_default();
        apply_env(&mut section);

        Ok(RuntimeConfig {
            transport: self.server.transport,
            http_bind: self.server.http_bind,
            connection: assemble_connection(section)?,
        })
    }
}

fn apply_env(section: &mut ConnectionSection) {
    if let Ok(v) = std::env::var("SAP_BASE_URL") {
        section.base_url = Some(v);
    }
    if let Ok(v) = std::env::var("SAP_USERNAME") {
        section.username = Some(v);
    }
    if let Ok(v) = std::env::var("SAP_PASSWORD") {
        section.password = Some(v);
    }
    if let Ok(v) = std::env::var("SAP_CLIENT") {
        section.client = Some(v);
    }
}

/// A connection is either fully absent or carries all three required fields;
/// anything in between is a configuration mistake worth failing loudly on.
fn assemble_connection(
    section: ConnectionSection,
) -> Result<Option<ConnectionConfig>, ConfigError> {
    let given = [
        section.base_url.is_some(),
        section.username.is_some(),
        section.password.is_some(),
    ];
    if given.iter().all(|g| !g) {
        return Ok(None);
    }
    if !given.iter().all(|g| *g) {
        let mut missing = Vec::new();
        if section.base_url.is_none() {
            missing.push("base_url");
        }
        if section.username.is_none() {
            missing.push("username");
        }
        if section.password.is_none() {
            missing.push("password");
        }
        return Err(ConfigError::Incomplete(missing.join(", ")));
    }

    Ok(Some(ConnectionConfig {
        base_url: section.base_url.unwrap_or_default(),
        username: section.username.unwrap_or_default(),
        password: section.password.unwrap_or_default(),
        client: section.client,
        timeout_ms: section.timeout_ms.unwrap_or(30_000),
        validate_ssl: section.validate_ssl.unwrap_or(true),
        enable_csrf: section.enable_csrf.unwrap_or(true),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.transport, Transport::Stdio);
        assert_eq!(config.server.http_bind, "127.0.0.1:8080");
        assert!(config.connection.is_none());
    }

    #[test]
    fn test_parse_full_file() {
        let config = Config::parse(
            r#"
            [server]
            transport = "http"
            http_bind = "0.0.0.0:9000"

            [connection]
            base_url = "https://gw.example.com:44300/sap/opu/odata/sap"
            username = "DEVELOPER"
            password = "secret"
            client = "100"
            timeout_ms = 10000
            validate_ssl = false
            "#,
        )
        .unwrap();

        assert_eq!(config.server.transport, Transport::Http);
        assert_eq!(config.server.http_bind, "0.0.0.0:9000");
        let section = config.connection.unwrap();
        assert_eq!(section.client.as_deref(), Some("100"));
        assert_eq!(section.validate_ssl, Some(false));
    }

    #[test]
    fn test_assemble_absent_connection() {
        assert!(assemble_connection(ConnectionSection::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_assemble_complete_connection_defaults() {
        let connection = assemble_connection(ConnectionSection {
            base_url: Some("https://gw.example.com/sap/opu/odata/sap".to_string()),
            username: Some("DEVELOPER".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        })
        .unwrap()
        .unwrap();
        assert_eq!(connection.timeout_ms, 30_000);
        assert!(connection.validate_ssl);
        assert!(connection.enable_csrf);
    }

    #[test]
    fn test_assemble_partial_connection_fails() {
        let err = assemble_connection(ConnectionSection {
            base_url: Some("https://gw.example.com".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("username"));
        assert!(message.contains("password"));
    }
}
