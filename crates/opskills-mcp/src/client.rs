//! MCP client implementation.
//!
//! [`McpClient`] correlates requests with responses over one transport.
//! Each call takes a fresh numeric ID and parks on a oneshot slot in the
//! pending table; the transport's read loop resolves slots by ID. Any
//! number of calls may be in flight at once and responses may arrive in
//! any order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{McpError, TransportError};
use crate::protocol::{
    encode, methods, CallToolParams, CallToolResult, ClientInfo, InitializeParams,
    InitializeResult, JsonRpcRequest, JsonRpcResponse, ListResourcesResult, ListToolsResult,
    McpToolDefinition, Message, ReadResourceParams, ReadResourceResult, RequestId, Resource,
};
use crate::transport::{InboundSink, Transport};

type Slot = oneshot::Sender<Result<JsonRpcResponse, McpError>>;
type ResponseSlot = oneshot::Receiver<Result<JsonRpcResponse, McpError>>;

/// Per-call cancellation and deadline.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Cancelling this token abandons the call.
    pub cancel: Option<CancellationToken>,
    /// Give up when no response arrives within this time.
    pub timeout: Option<Duration>,
}

impl RequestContext {
    /// No deadline, not cancellable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandon the call after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abandon the call when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Default)]
struct PendingTable {
    next_id: i64,
    waiting: HashMap<RequestId, Slot>,
    closed: bool,
}

/// Shared between the client and the transport's read loop.
struct Correlator {
    pending: Mutex<PendingTable>,
    closed: AtomicBool,
}

impl Correlator {
    fn new() -> Self {
        Self {
            pending: Mutex::new(PendingTable {
                next_id: 1,
                ..Default::default()
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Allocate an ID and park a slot for it.
    fn register(&self) -> Result<(RequestId, ResponseSlot), McpError> {
        let mut table = self.pending.lock();
        if table.closed {
            return Err(TransportError::NotConnected.into());
        }
        let id = RequestId::Number(table.next_id);
        table.next_id += 1;

        let (tx, rx) = oneshot::channel();
        table.waiting.insert(id.clone(), tx);
        Ok((id, rx))
    }

    fn forget(&self, id: &RequestId) {
        self.pending.lock().waiting.remove(id);
    }

    fn pending_count(&self) -> usize {
        self.pending.lock().waiting.len()
    }
}

impl InboundSink for Correlator {
    fn deliver(&self, message: Message) {
        match message {
            Message::Response(response) => {
                let Some(id) = response.id.clone() else {
                    warn!(
                        error = ?response.error,
                        "Server reported an error for an unidentified message"
                    );
                    return;
                };
                let slot = self.pending.lock().waiting.remove(&id);
                match slot {
                    // A dropped receiver means the caller is already gone.
                    Some(slot) => {
                        let _ = slot.send(Ok(response));
                    }
                    None => debug!(id = %id, "Dropping late response"),
                }
            }
            Message::Request(request) => {
                debug!(method = %request.method, "Ignoring server-initiated message");
            }
        }
    }

    fn closed(&self, reason: Option<TransportError>) {
        self.closed.store(true, Ordering::SeqCst);
        let slots: Vec<Slot> = {
            let mut table = self.pending.lock();
            table.closed = true;
            table.waiting.drain().map(|(_, slot)| slot).collect()
        };

        if !slots.is_empty() {
            warn!(
                pending = slots.len(),
                reason = ?reason.as_ref().map(ToString::to_string),
                "Connection closed with requests in flight"
            );
        }
        for slot in slots {
            let _ = slot.send(Err(TransportError::ConnectionClosed.into()));
        }
    }
}

/// Removes the pending entry however the call ends.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.forget(&self.id);
    }
}

/// Client side of one MCP session.
pub struct McpClient {
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
}

impl McpClient {
    /// Create a client over `transport`. Call [`start`](Self::start) before use.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            correlator: Arc::new(Correlator::new()),
        }
    }

    /// Start the transport's read loop with this client as its sink.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), McpError> {
        let sink: Arc<dyn InboundSink> = self.correlator.clone();
        self.transport.start(sink, cancel).await?;
        Ok(())
    }

    /// Stop the underlying transport.
    pub async fn stop(&self) -> Result<(), McpError> {
        self.transport.stop().await?;
        Ok(())
    }

    /// Whether calls can still be made.
    pub fn is_connected(&self) -> bool {
        !self.correlator.closed.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    /// Number of calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Send a request and wait for its response.
    ///
    /// An error response becomes [`McpError::ServerError`]. Cancellation
    /// and timeout remove the pending entry; a response arriving after
    /// that is dropped.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: &RequestContext,
    ) -> Result<Value, McpError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }

        let (id, rx) = self.correlator.register()?;
        let _guard = PendingGuard {
            correlator: &self.correlator,
            id: id.clone(),
        };

        let line = encode(&JsonRpcRequest::new(id.clone(), method, params))?;
        debug!(method, id = %id, "Sending request");
        self.transport.send(&line).await?;

        let response = wait_for(rx, ctx).await.map_err(|e| {
            if e.is_cancellation() {
                debug!(method, id = %id, error = %e, "Request abandoned");
            }
            e
        })?;
        debug!(method, id = %id, error = response.is_error(), "Received response");

        response.into_result().map_err(McpError::server_error)
    }

    /// Send a notification; no response is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let line = encode(&JsonRpcRequest::notification(method, params))?;
        debug!(method, "Sending notification");
        self.transport.send(&line).await?;
        Ok(())
    }

    /// Typed request helper.
    async fn request<P, R>(
        &self,
        method: &str,
        params: Option<P>,
        ctx: &RequestContext,
    ) -> Result<R, McpError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = params.map(serde_json::to_value).transpose()?;
        let result = self.call(method, params, ctx).await?;
        serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("unexpected {} result: {}", method, e)))
    }

    /// Perform the capability handshake, then send `initialized`.
    pub async fn initialize(
        &self,
        client_info: ClientInfo,
        ctx: &RequestContext,
    ) -> Result<InitializeResult, McpError> {
        let params = InitializeParams::new(client_info);
        let result: InitializeResult = self
            .request(methods::INITIALIZE, Some(params), ctx)
            .await?;
        self.notify(methods::INITIALIZED, None).await?;
        Ok(result)
    }

    /// Liveness check.
    pub async fn ping(&self, ctx: &RequestContext) -> Result<(), McpError> {
        self.call(methods::PING, None, ctx).await.map(|_| ())
    }

    /// List available tools.
    pub async fn list_tools(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<McpToolDefinition>, McpError> {
        let result: ListToolsResult = self.request::<(), _>(methods::TOOLS_LIST, None, ctx).await?;
        Ok(result.tools)
    }

    /// Call a tool.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<CallToolResult, McpError> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        self.request(methods::TOOLS_CALL, Some(params), ctx).await
    }

    /// List available resources.
    pub async fn list_resources(&self, ctx: &RequestContext) -> Result<Vec<Resource>, McpError> {
        let result: ListResourcesResult = self
            .request::<(), _>(methods::RESOURCES_LIST, None, ctx)
            .await?;
        Ok(result.resources)
    }

    /// Read one resource.
    pub async fn read_resource(
        &self,
        uri: &str,
        ctx: &RequestContext,
    ) -> Result<ReadResourceResult, McpError> {
        let params = ReadResourceParams {
            uri: uri.to_string(),
        };
        self.request(methods::RESOURCES_READ, Some(params), ctx).await
    }
}

async fn wait_for(
    rx: ResponseSlot,
    ctx: &RequestContext,
) -> Result<JsonRpcResponse, McpError> {
    let cancel = ctx.cancel.clone().unwrap_or_default();
    let deadline = async {
        match ctx.timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        received = rx => match received {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectionClosed.into()),
        },
        _ = cancel.cancelled() => Err(McpError::Cancelled),
        _ = deadline => Err(McpError::Timeout(ctx.timeout.unwrap_or_default())),
    }
}
