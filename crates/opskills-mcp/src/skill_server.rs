//! Skill capability server.
//!
//! Exposes a [`SkillRegistry`] over MCP: one tool per skill, executed with
//! an [`Executor`], and each skill's descriptor, scripts and example
//! configuration files as `skill://` resources.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use opskills_core::{Skill, SkillRegistry};
use opskills_exec::Executor;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{
    arguments_to_params, result_to_tool_result, skill_resources, skill_to_tool, ResourceKind,
    SkillUri,
};
use crate::error::McpError;
use crate::protocol::{
    methods, CallToolParams, CallToolResult, ListResourcesResult, ListToolsResult,
    ReadResourceParams, ReadResourceResult, ResourceContents, ServerCapabilities,
};
use crate::server::{InvalidParams, McpServer};

/// Registry plus executor; what the handlers share.
struct SkillBackend {
    registry: Arc<SkillRegistry>,
    executor: Arc<dyn Executor>,
}

impl SkillBackend {
    fn skill(&self, name: &str) -> anyhow::Result<Arc<Skill>> {
        self.registry
            .get(name)
            .with_context(|| format!("skill not found: {}", name))
    }

    fn list_tools(&self) -> ListToolsResult {
        ListToolsResult {
            tools: self.registry.list().iter().map(|s| skill_to_tool(s)).collect(),
            next_cursor: None,
        }
    }

    async fn call_tool(&self, params: CallToolParams) -> anyhow::Result<CallToolResult> {
        let skill = self.skill(&params.name)?;
        let exec_params = arguments_to_params(params.arguments.as_ref());

        info!(skill = %skill.name, params = exec_params.len(), "Tool call");
        let result = self.executor.execute(&skill, &exec_params).await;
        if !result.success {
            warn!(skill = %skill.name, error = %result.error_message(), "Skill execution failed");
        }
        Ok(result_to_tool_result(&result))
    }

    fn list_resources(&self) -> anyhow::Result<ListResourcesResult> {
        let mut resources = Vec::new();
        for skill in self.registry.list() {
            let scripts = skill
                .script_files()
                .with_context(|| format!("listing scripts of {}", skill.name))?;
            resources.extend(skill_resources(&skill, &scripts));
        }
        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
        })
    }

    async fn read_resource(&self, uri: &str) -> anyhow::Result<ReadResourceResult> {
        let parsed = SkillUri::parse(uri).map_err(|e| InvalidParams(e.to_string()))?;
        let skill = self.skill(&parsed.skill)?;
        let kind = parsed.kind()?;

        let path: PathBuf = match &kind {
            ResourceKind::Documentation => skill
                .descriptor_path
                .clone()
                .ok_or_else(|| McpError::UnknownResource(uri.to_string()))?,
            ResourceKind::Script(file) => skill.script_path(file),
            ResourceKind::Config(file) => skill.examples_path().join(file),
        };

        debug!(uri, path = %path.display(), "Reading resource");
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        Ok(ReadResourceResult {
            contents: vec![ResourceContents {
                uri: uri.to_string(),
                mime_type: Some(kind.mime_type().to_string()),
                text,
            }],
        })
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> anyhow::Result<T> {
    let params = params.ok_or_else(|| InvalidParams("missing params".to_string()))?;
    serde_json::from_value(params).map_err(|e| InvalidParams(e.to_string()).into())
}

/// MCP server exposing skills as tools and resources.
pub struct SkillServer {
    backend: Arc<SkillBackend>,
    server: McpServer,
}

impl SkillServer {
    /// Create a server over `registry`, running tools with `executor`.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        registry: Arc<SkillRegistry>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let backend = Arc::new(SkillBackend { registry, executor });
        let server = McpServer::new(name, version);
        server.set_capabilities(ServerCapabilities::tools_and_resources());

        let b = Arc::clone(&backend);
        server.register_fn(methods::TOOLS_LIST, move |_, _| {
            let result = serde_json::to_value(b.list_tools());
            async move { Ok::<_, anyhow::Error>(result?) }
        });

        let b = Arc::clone(&backend);
        server.register_fn(methods::TOOLS_CALL, move |_, params| {
            let b = Arc::clone(&b);
            async move {
                let params: CallToolParams = parse_params(params)?;
                Ok::<_, anyhow::Error>(serde_json::to_value(b.call_tool(params).await?)?)
            }
        });

        let b = Arc::clone(&backend);
        server.register_fn(methods::RESOURCES_LIST, move |_, _| {
            let result = b.list_resources();
            async move { Ok::<_, anyhow::Error>(serde_json::to_value(result?)?) }
        });

        let b = Arc::clone(&backend);
        server.register_fn(methods::RESOURCES_READ, move |_, params| {
            let b = Arc::clone(&b);
            async move {
                let params: ReadResourceParams = parse_params(params)?;
                Ok::<_, anyhow::Error>(serde_json::to_value(b.read_resource(&params.uri).await?)?)
            }
        });

        Self { backend, server }
    }

    /// The underlying dispatcher.
    pub fn server(&self) -> &McpServer {
        &self.server
    }

    /// Skills being served.
    pub fn registry(&self) -> &SkillRegistry {
        &self.backend.registry
    }

    /// Serve until end-of-stream or cancellation.
    pub async fn serve<R, W>(
        &self,
        reader: R,
        writer: W,
        cancel: CancellationToken,
    ) -> Result<(), McpError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(skills = self.backend.registry.len(), "Starting skill server");
        self.server.serve(reader, writer, cancel).await
    }
}
