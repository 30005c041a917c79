//! # sqlgate-mcp
//!
//! The MCP side of the gateway: message framing, request dispatch,
//! per-backend connection pooling and vendor-aware query execution.
//!
//! Transports:
//! - stdio ([`run_stdio`]), with per-connection auto-detected framing
//! - HTTP ([`HttpServer`]), one JSON-RPC message per `POST /mcp`

pub mod error;
pub mod executor;
pub mod framer;
pub mod http_transport;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod signal;
pub mod sql;
pub mod stdio;
pub mod validate;
pub mod vendor;

pub use error::GatewayError;
pub use executor::QueryExecutor;
pub use framer::{Framer, Framing};
pub use http_transport::{HttpServer, create_router};
pub use pool::{ConnectionHandle, ConnectionPool};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, ToolResult};
pub use server::McpServer;
pub use signal::shutdown_signal;
pub use stdio::{run_stdio, serve_stream};
