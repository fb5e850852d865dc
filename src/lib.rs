//! SAP OData MCP Library
//!
//! Model Context Protocol server for SAP Gateway OData services.
//! Connects with basic authentication, discovers services through the
//! catalog with probing fallbacks, and exposes CRUD/query/function tools.

pub mod config;
pub mod mcp;
pub mod odata;
pub mod transport;

pub use config::{Config, RuntimeConfig, Transport};
pub use odata::{ConnectionConfig, ODataClient, ODataError, QueryOptions};
