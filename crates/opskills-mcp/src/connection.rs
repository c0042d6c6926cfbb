//! A live session with one external MCP server.
//!
//! Lifecycle: `Spawned -> Started -> Initialized -> Stopped`. Transitions
//! are checked; anything else is an [`McpError::InvalidState`]. A
//! connection that fails to initialize stops itself.

use std::sync::Arc;
use std::time::Duration;

use opskills_core::McpServerConfig;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{McpClient, RequestContext};
use crate::error::McpError;
use crate::protocol::{
    CallToolResult, ClientInfo, InitializeResult, McpToolDefinition, ReadResourceResult, Resource,
    ServerCapabilities,
};
use crate::transport::{StdioTransport, Transport};

/// Connection state for an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport exists, read loop not running.
    Spawned,
    /// Read loop running, handshake not done.
    Started,
    /// Handshake complete; ready for calls.
    Initialized,
    /// Torn down.
    Stopped,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawned => write!(f, "spawned"),
            Self::Started => write!(f, "started"),
            Self::Initialized => write!(f, "initialized"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// A connection to a single MCP server.
pub struct McpConnection {
    /// Server name.
    name: String,
    /// Correlating client bound to the transport.
    client: McpClient,
    /// Current connection state.
    state: Mutex<ConnectionState>,
    /// Handshake result.
    server: Mutex<Option<InitializeResult>>,
    /// Scope of the read loop.
    cancel: CancellationToken,
}

impl McpConnection {
    /// Create a connection over an existing transport.
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            client: McpClient::new(transport),
            state: Mutex::new(ConnectionState::Spawned),
            server: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the server process described by `config`.
    ///
    /// `grace` is how long the process gets to exit on SIGTERM when stopped.
    pub fn spawn(
        name: impl Into<String>,
        config: &McpServerConfig,
        grace: Duration,
    ) -> Result<Self, McpError> {
        let name = name.into();
        info!(server = %name, command = %config.command, "Spawning MCP server");
        let transport = StdioTransport::from_config(config)?.with_grace(grace);
        Ok(Self::new(name, Arc::new(transport)))
    }

    /// Start and initialize in one step, stopping on any failure.
    pub async fn open(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        client_info: ClientInfo,
        ctx: &RequestContext,
    ) -> Result<Self, McpError> {
        let connection = Self::new(name, transport);
        if let Err(e) = connection.start().await {
            connection.stop().await;
            return Err(e);
        }
        connection.initialize(client_info, ctx).await?;
        Ok(connection)
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Initialized and the read loop is still running.
    pub fn is_alive(&self) -> bool {
        self.state() == ConnectionState::Initialized && self.client.is_connected()
    }

    /// Get the server capabilities.
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.server.lock().as_ref().map(|s| s.capabilities.clone())
    }

    /// Handshake result, once initialized.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server.lock().clone()
    }

    /// The underlying client.
    pub fn client(&self) -> &McpClient {
        &self.client
    }

    fn expect_state(&self, expected: ConnectionState) -> Result<(), McpError> {
        let state = self.state();
        if state != expected {
            return Err(McpError::invalid_state(expected.to_string(), state.to_string()));
        }
        Ok(())
    }

    /// Launch the read loop.
    pub async fn start(&self) -> Result<(), McpError> {
        self.expect_state(ConnectionState::Spawned)?;
        self.client.start(self.cancel.clone()).await?;

        let mut state = self.state.lock();
        if *state != ConnectionState::Spawned {
            return Err(McpError::invalid_state("spawned", state.to_string()));
        }
        *state = ConnectionState::Started;
        debug!(server = %self.name, "MCP connection started");
        Ok(())
    }

    /// Perform the handshake. On failure the connection is stopped.
    pub async fn initialize(
        &self,
        client_info: ClientInfo,
        ctx: &RequestContext,
    ) -> Result<InitializeResult, McpError> {
        self.expect_state(ConnectionState::Started)?;
        debug!(server = %self.name, "Initializing MCP connection");

        let result = match self.client.initialize(client_info, ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(server = %self.name, error = %e, "MCP initialization failed");
                self.stop().await;
                return Err(McpError::init_failed(format!("{}: {}", self.name, e)));
            }
        };

        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Started {
                return Err(McpError::invalid_state("started", state.to_string()));
            }
            *state = ConnectionState::Initialized;
        }
        *self.server.lock() = Some(result.clone());

        info!(
            server = %self.name,
            server_name = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "MCP connection initialized"
        );
        Ok(result)
    }

    /// Tear the connection down. Safe to call more than once.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Stopped {
                return;
            }
            *state = ConnectionState::Stopped;
        }

        debug!(server = %self.name, "Stopping MCP connection");
        self.cancel.cancel();
        if let Err(e) = self.client.stop().await {
            warn!(server = %self.name, error = %e, "Error stopping MCP server");
        }
        info!(server = %self.name, "MCP connection stopped");
    }

    /// List available tools from the server.
    pub async fn list_tools(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<McpToolDefinition>, McpError> {
        self.expect_state(ConnectionState::Initialized)?;
        let tools = self.client.list_tools(ctx).await?;
        debug!(server = %self.name, tool_count = tools.len(), "Listed tools");
        Ok(tools)
    }

    /// Call a tool on the server.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<CallToolResult, McpError> {
        self.expect_state(ConnectionState::Initialized)?;
        debug!(server = %self.name, tool = name, "Calling tool");

        let result = self.client.call_tool(name, arguments, ctx).await?;
        if result.is_error {
            warn!(server = %self.name, tool = name, "Tool returned error");
        }
        Ok(result)
    }

    /// List resources offered by the server.
    pub async fn list_resources(&self, ctx: &RequestContext) -> Result<Vec<Resource>, McpError> {
        self.expect_state(ConnectionState::Initialized)?;
        self.client.list_resources(ctx).await
    }

    /// Read a resource from the server.
    pub async fn read_resource(
        &self,
        uri: &str,
        ctx: &RequestContext,
    ) -> Result<ReadResourceResult, McpError> {
        self.expect_state(ConnectionState::Initialized)?;
        self.client.read_resource(uri, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{StreamTransport, DEFAULT_SHUTDOWN_GRACE};

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Spawned.to_string(), "spawned");
        assert_eq!(ConnectionState::Started.to_string(), "started");
        assert_eq!(ConnectionState::Initialized.to_string(), "initialized");
        assert_eq!(ConnectionState::Stopped.to_string(), "stopped");
    }

    #[tokio::test]
    async fn test_guarded_transitions() {
        let (near, _far) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(near);
        let connection = McpConnection::new("test", Arc::new(StreamTransport::new(read, write)));

        let err = connection
            .list_tools(&RequestContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidState { .. }));

        let err = connection
            .initialize(ClientInfo::default(), &RequestContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidState { .. }));

        connection.start().await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Started);
        assert!(connection.start().await.is_err());

        connection.stop().await;
        connection.stop().await;
        assert_eq!(connection.state(), ConnectionState::Stopped);
        assert!(!connection.is_alive());
    }

    #[tokio::test]
    async fn test_failed_initialize_stops_connection() {
        // `cat` echoes the initialize request back, which is not a response.
        let config = McpServerConfig::new("cat");
        let connection = McpConnection::spawn("echo", &config, DEFAULT_SHUTDOWN_GRACE).unwrap();
        connection.start().await.unwrap();

        let ctx = RequestContext::new().with_timeout(Duration::from_millis(200));
        let err = connection
            .initialize(ClientInfo::default(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InitializationFailed(_)));
        assert_eq!(connection.state(), ConnectionState::Stopped);
    }
}
