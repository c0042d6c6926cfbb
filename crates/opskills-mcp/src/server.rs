//! MCP method dispatcher.
//!
//! [`McpServer`] maps method names to [`Handler`]s and serves one envelope
//! at a time from a reader, writing responses to a writer. `initialize`
//! is answered by the dispatcher itself from the declared identity and
//! capabilities. Handler errors become error responses; nothing a peer
//! sends can end the serve loop short of end-of-stream.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{McpError, TransportError};
use crate::transport::{is_blank, read_line};
use crate::protocol::{
    decode_bytes, encode, methods, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, Message, ServerCapabilities, ServerInfo, MCP_PROTOCOL_VERSION,
};

/// What a handler knows about the call it is serving.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Method being served.
    pub method: String,
    /// Fires when the server is shutting down.
    pub cancel: CancellationToken,
}

/// Handler error that should be reported as invalid params rather than
/// an internal error.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InvalidParams(pub String);

/// Serves one method.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Produce the result for `params`.
    async fn handle(&self, cx: HandlerContext, params: Option<Value>) -> anyhow::Result<Value>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(HandlerContext, Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn handle(&self, cx: HandlerContext, params: Option<Value>) -> anyhow::Result<Value> {
        (self.0)(cx, params).await
    }
}

/// Server-side method dispatcher.
pub struct McpServer {
    info: ServerInfo,
    capabilities: RwLock<ServerCapabilities>,
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl McpServer {
    /// Create a dispatcher with the given identity. `ping` is pre-registered.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let server = Self {
            info: ServerInfo::new(name, version),
            capabilities: RwLock::new(ServerCapabilities::default()),
            handlers: RwLock::new(HashMap::new()),
        };
        server.register_fn(methods::PING, |_, _| async {
            Ok::<_, anyhow::Error>(Value::Object(Default::default()))
        });
        server
    }

    /// Server identity.
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Declared capabilities.
    pub fn capabilities(&self) -> ServerCapabilities {
        self.capabilities.read().clone()
    }

    /// Replace the declared capabilities.
    pub fn set_capabilities(&self, capabilities: ServerCapabilities) {
        *self.capabilities.write() = capabilities;
    }

    /// Register `handler` for `method`, replacing any previous one.
    pub fn register_handler(&self, method: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.write().insert(method.into(), handler);
    }

    /// Register an async closure for `method`.
    pub fn register_fn<F, Fut>(&self, method: impl Into<String>, f: F)
    where
        F: Fn(HandlerContext, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register_handler(method, Arc::new(FnHandler(f)));
    }

    /// Whether a handler exists for `method`.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.read().contains_key(method)
    }

    /// Dispatch one request. Returns `None` for notifications.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Option<JsonRpcResponse> {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        let notification = id.is_none();

        let outcome = if method == methods::INITIALIZE {
            self.initialize(params)
        } else {
            let handler = self.handlers.read().get(&method).cloned();
            match handler {
                Some(handler) => {
                    let cx = HandlerContext {
                        method: method.clone(),
                        cancel: cancel.clone(),
                    };
                    handler.handle(cx, params).await.map_err(|e| {
                        warn!(method = %method, error = %format!("{:#}", e), "Handler failed");
                        match e.downcast_ref::<InvalidParams>() {
                            Some(invalid) => JsonRpcError::invalid_params(&invalid.0),
                            None => JsonRpcError::internal_error(format!("{:#}", e)),
                        }
                    })
                }
                None if notification => {
                    debug!(method = %method, "Ignoring unhandled notification");
                    return None;
                }
                None => {
                    debug!(method = %method, "Method not found");
                    Err(JsonRpcError::method_not_found(&method))
                }
            }
        };

        if notification {
            return None;
        }
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(JsonRpcError::invalid_params)?;

        if params.protocol_version != MCP_PROTOCOL_VERSION {
            debug!(
                requested = %params.protocol_version,
                supported = MCP_PROTOCOL_VERSION,
                "Protocol version differs, continuing"
            );
        }
        info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            "Client initializing"
        );

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities(),
            server_info: self.info.clone(),
        };
        serde_json::to_value(result).map_err(JsonRpcError::internal_error)
    }

    /// Dispatch one raw line. Undecodable input yields an error response
    /// with a null ID; stray responses are ignored.
    pub async fn handle_line(
        &self,
        line: &[u8],
        cancel: &CancellationToken,
    ) -> Option<JsonRpcResponse> {
        match decode_bytes(line) {
            Ok(Message::Request(request)) => self.handle_request(request, cancel).await,
            Ok(Message::Response(response)) => {
                debug!(id = ?response.id, "Ignoring response sent to server");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to decode message");
                Some(JsonRpcResponse::error(None, e.to_rpc_error()))
            }
        }
    }

    /// Serve requests from `reader` until end-of-stream or `cancel` fires.
    pub async fn serve<R, W>(
        &self,
        reader: R,
        mut writer: W,
        cancel: CancellationToken,
    ) -> Result<(), McpError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(server = %self.info.name, "Serving MCP requests");
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();

        loop {
            let more = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Serve loop cancelled");
                    break;
                }
                read = read_line(&mut reader, &mut line) => {
                    read.map_err(TransportError::ReadError)?
                }
            };
            if !more {
                debug!("Input closed");
                break;
            }
            if is_blank(&line) {
                continue;
            }

            if let Some(response) = self.handle_line(&line, &cancel).await {
                let mut out = encode(&response)?;
                out.push('\n');
                writer
                    .write_all(out.as_bytes())
                    .await
                    .map_err(TransportError::WriteError)?;
                writer.flush().await.map_err(TransportError::WriteError)?;
            }
        }

        info!(server = %self.info.name, "MCP server stopped");
        Ok(())
    }
}
