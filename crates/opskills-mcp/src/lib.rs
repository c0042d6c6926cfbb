//! # opskills-mcp
//!
//! MCP (Model Context Protocol) plumbing for OpsSkills.
//!
//! This crate provides:
//! - JSON-RPC 2.0 envelopes and the line-delimited codec
//! - stdio and in-memory stream transports
//! - A correlating client and per-server connections
//! - A lazily connecting manager for external servers
//! - A request dispatcher and the skill capability server

pub mod adapter;
pub mod client;
pub mod connection;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod server;
pub mod skill_server;
pub mod transport;

pub use adapter::{ResourceKind, SkillUri};
pub use client::{McpClient, RequestContext};
pub use connection::{ConnectionState, McpConnection};
pub use error::{CodecError, McpError, TransportError};
pub use manager::ExternalServerManager;
pub use protocol::{
    CallToolResult, ClientInfo, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpToolDefinition,
    RequestId, Resource, ServerCapabilities, ToolContent,
};
pub use server::{Handler, HandlerContext, InvalidParams, McpServer};
pub use skill_server::SkillServer;
pub use transport::{InboundSink, StdioTransport, StreamTransport, Transport};
