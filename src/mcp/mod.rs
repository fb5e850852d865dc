//! MCP Server implementation for SAP Gateway OData
//!
//! Exposes tools for connecting to a Gateway host and querying its services

pub mod protocol;
mod server;

pub use protocol::*;
pub use server::GatewayMcpServer;
