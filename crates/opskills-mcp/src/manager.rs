//! External server manager.
//!
//! Owns the connection cache keyed by server name. Connections are made
//! lazily on first use, at most one per server even under concurrent
//! first use. A cached connection whose process has died is evicted and
//! replaced on the next use; calls already in flight on it fail and are
//! not retried.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use opskills_core::{Config, McpServerConfig};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::client::RequestContext;
use crate::connection::McpConnection;
use crate::error::McpError;
use crate::protocol::{CallToolResult, ClientInfo, McpToolDefinition, Resource};
use crate::transport::{Transport, DEFAULT_SHUTDOWN_GRACE};

/// Default request timeout (5 minutes).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Lazily connects to configured external servers and caches the connections.
pub struct ExternalServerManager {
    /// Launch specifications by server name.
    servers: BTreeMap<String, McpServerConfig>,
    /// Identity sent in `initialize`.
    client_info: ClientInfo,
    request_timeout: Duration,
    shutdown_grace: Duration,
    /// Active connections by server name.
    connections: RwLock<HashMap<String, Arc<McpConnection>>>,
    /// Per-server locks serializing connection attempts.
    connecting: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ExternalServerManager {
    /// Create a manager for the given server launch specifications.
    pub fn new(servers: BTreeMap<String, McpServerConfig>) -> Self {
        Self {
            servers,
            client_info: ClientInfo::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            connections: RwLock::new(HashMap::new()),
            connecting: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Create a manager from the `[mcp_servers]`, `[general]` and `[mcp]` settings.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.mcp_servers.clone())
            .with_client_info(ClientInfo::new(
                config.general.client_name.clone(),
                config.general.client_version.clone(),
            ))
            .with_request_timeout(config.mcp.request_timeout())
            .with_shutdown_grace(config.mcp.shutdown_grace())
    }

    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.client_info = client_info;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Context applied to every call made through the manager.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::new().with_timeout(self.request_timeout)
    }

    /// Names of all configured servers.
    pub fn configured_servers(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    /// Check whether a live connection to `name` is cached.
    pub async fn is_connected(&self, name: &str) -> bool {
        self.connections
            .read()
            .await
            .get(name)
            .is_some_and(|c| c.is_alive())
    }

    /// List all connected server names.
    pub async fn connected_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .connections
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.is_alive())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Return the cached connection to `name`, connecting first if needed.
    pub async fn get_or_connect(&self, name: &str) -> Result<Arc<McpConnection>, McpError> {
        if let Some(connection) = self.cached(name).await {
            return Ok(connection);
        }

        let config = self
            .servers
            .get(name)
            .ok_or_else(|| McpError::ServerNotConnected(name.to_string()))?;

        let lock = self.connect_lock(name);
        let _connecting = lock.lock().await;

        // Someone else may have connected while we waited.
        if let Some(connection) = self.cached(name).await {
            return Ok(connection);
        }
        self.evict_dead(name).await;

        info!(server = %name, command = %config.command, "Connecting to MCP server");
        let connection = McpConnection::spawn(name, config, self.shutdown_grace)?;
        let connection = self.establish(connection).await?;
        Ok(connection)
    }

    /// Connect `name` over an already-built transport.
    ///
    /// If a live connection to `name` is cached it is returned and the
    /// transport is stopped unused.
    pub async fn connect_with(
        &self,
        name: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<McpConnection>, McpError> {
        let lock = self.connect_lock(name);
        let _connecting = lock.lock().await;

        if let Some(connection) = self.cached(name).await {
            debug!(server = %name, "Already connected");
            if let Err(e) = transport.stop().await {
                debug!(server = %name, error = %e, "Error stopping unused transport");
            }
            return Ok(connection);
        }
        self.evict_dead(name).await;

        self.establish(McpConnection::new(name, transport)).await
    }

    async fn establish(&self, connection: McpConnection) -> Result<Arc<McpConnection>, McpError> {
        if let Err(e) = connection.start().await {
            connection.stop().await;
            return Err(e);
        }
        connection
            .initialize(self.client_info.clone(), &self.request_context())
            .await?;

        let connection = Arc::new(connection);
        self.connections
            .write()
            .await
            .insert(connection.name().to_string(), Arc::clone(&connection));
        Ok(connection)
    }

    async fn cached(&self, name: &str) -> Option<Arc<McpConnection>> {
        self.connections
            .read()
            .await
            .get(name)
            .filter(|c| c.is_alive())
            .cloned()
    }

    async fn evict_dead(&self, name: &str) {
        let dead = {
            let mut connections = self.connections.write().await;
            match connections.get(name) {
                Some(c) if !c.is_alive() => connections.remove(name),
                _ => None,
            }
        };
        if let Some(connection) = dead {
            warn!(server = %name, state = %connection.state(), "Evicting dead MCP connection");
            connection.stop().await;
        }
    }

    fn connect_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.connecting
                .lock()
                .entry(name.to_string())
                .or_default(),
        )
    }

    /// Disconnect from an MCP server.
    pub async fn disconnect(&self, name: &str) -> Result<(), McpError> {
        let connection = self
            .connections
            .write()
            .await
            .remove(name)
            .ok_or_else(|| McpError::ServerNotConnected(name.to_string()))?;

        connection.stop().await;
        Ok(())
    }

    /// Disconnect from all servers.
    pub async fn disconnect_all(&self) {
        let connections: Vec<Arc<McpConnection>> = {
            let mut connections = self.connections.write().await;
            connections.drain().map(|(_, conn)| conn).collect()
        };

        for connection in connections {
            connection.stop().await;
        }
    }

    /// List the tools offered by a server, connecting if needed.
    pub async fn discover_tools(&self, name: &str) -> Result<Vec<McpToolDefinition>, McpError> {
        let connection = self.get_or_connect(name).await?;
        let tools = connection.list_tools(&self.request_context()).await?;
        info!(server = %name, tool_count = tools.len(), "Discovered tools");
        Ok(tools)
    }

    /// List the resources offered by a server, connecting if needed.
    pub async fn discover_resources(&self, name: &str) -> Result<Vec<Resource>, McpError> {
        let connection = self.get_or_connect(name).await?;
        connection.list_resources(&self.request_context()).await
    }

    /// Call a tool on a server, connecting if needed.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, McpError> {
        let connection = self.get_or_connect(server).await?;
        connection
            .call_tool(tool, arguments, &self.request_context())
            .await
            .map_err(|e| {
                error!(server, tool, error = %e, "MCP tool call failed");
                e
            })
    }
}
