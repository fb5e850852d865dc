//! OData module
//!
//! Session handling, service discovery, metadata extraction and the HTTP
//! client for SAP Gateway OData services.

pub mod client;
pub mod discovery;
pub mod metadata;
pub mod session;

pub use client::{key_predicate, ConnectionStatus, ODataClient, ODataError, QueryOptions, RecordSet};
pub use discovery::{DiscoveryResult, DiscoverySource, ServiceDescriptor};
pub use metadata::{EntityType, FunctionImport, MetadataModel, Property};
pub use session::{ConnectionConfig, Session, SessionState};
