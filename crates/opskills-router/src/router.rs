//! Per-call choice between local execution and MCP forwarding.

use std::sync::Arc;
use std::time::Instant;

use opskills_core::{Config, ExecutionMode, ExecutionParams, ExecutionResult, SkillRegistry};
use opskills_exec::Executor;
use opskills_mcp::adapter::{params_to_arguments, tool_result_to_result};
use opskills_mcp::ExternalServerManager;
use tracing::{debug, info, warn};

use crate::{RouterError, RouterResult};

// ============================================================================
// Router
// ============================================================================

/// Routes skill invocations to the direct executor or an external server.
///
/// External connections are made on first use and cached by server name
/// for the lifetime of the router. Call [`shutdown`](Self::shutdown) to
/// stop the server processes.
pub struct SkillRouter {
    config: Arc<Config>,
    registry: Arc<SkillRegistry>,
    executor: Arc<dyn Executor>,
    manager: ExternalServerManager,
}

impl SkillRouter {
    /// Create a router. External servers come from `config.mcp_servers`.
    pub fn new(
        config: Arc<Config>,
        registry: Arc<SkillRegistry>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let manager = ExternalServerManager::from_config(&config);
        Self {
            config,
            registry,
            executor,
            manager,
        }
    }

    /// Local skills.
    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    /// The connection cache for external servers.
    pub fn manager(&self) -> &ExternalServerManager {
        &self.manager
    }

    /// Names of the configured external servers.
    pub fn servers(&self) -> Vec<String> {
        self.manager.configured_servers()
    }

    /// Execution mode configured for `skill`.
    pub fn mode_for(&self, skill: &str) -> ExecutionMode {
        self.config.skill_config(skill).execution_mode
    }

    /// Execute `skill` with `params`.
    ///
    /// `auto` behaves exactly like `direct`. A forwarded call that fails is
    /// returned as an error and not retried; a script that ran and failed
    /// is a failed result, whichever way it ran.
    pub async fn execute(
        &self,
        skill: &str,
        params: &ExecutionParams,
    ) -> RouterResult<ExecutionResult> {
        let skill_config = self.config.skill_config(skill);
        debug!(skill, mode = %skill_config.execution_mode, "Routing skill");

        match skill_config.execution_mode {
            ExecutionMode::Direct | ExecutionMode::Auto => self.execute_direct(skill, params).await,
            ExecutionMode::Mcp => {
                let server = skill_config
                    .mcp_server
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| RouterError::MissingServer(skill.to_string()))?;
                self.execute_forwarded(skill, &server, params).await
            }
        }
    }

    async fn execute_direct(
        &self,
        name: &str,
        params: &ExecutionParams,
    ) -> RouterResult<ExecutionResult> {
        let skill = self
            .registry
            .get(name)
            .ok_or_else(|| RouterError::SkillNotFound(name.to_string()))?;

        let result = self.executor.execute(&skill, params).await;
        info!(
            skill = name,
            success = result.success,
            duration_ms = result.duration_ms,
            "Skill executed directly"
        );
        Ok(result)
    }

    async fn execute_forwarded(
        &self,
        skill: &str,
        server: &str,
        params: &ExecutionParams,
    ) -> RouterResult<ExecutionResult> {
        let start = Instant::now();
        info!(skill, server, "Forwarding skill to MCP server");

        let reply = self
            .manager
            .call_tool(server, skill, params_to_arguments(params))
            .await?;

        let result = tool_result_to_result(&reply).with_duration(start.elapsed());
        if !result.success {
            warn!(skill, server, error = %result.error_message(), "Forwarded skill failed");
        }
        Ok(result)
    }

    /// Stop every cached external connection.
    pub async fn shutdown(&self) {
        debug!("Shutting down skill router");
        self.manager.disconnect_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opskills_core::{FailureKind, McpServerConfig, Skill, SkillConfig};
    use opskills_exec::DirectExecutor;
    use opskills_mcp::{McpError, SkillServer, StreamTransport};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn etcd_registry() -> (TempDir, Arc<SkillRegistry>) {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("etcd");
        std::fs::create_dir_all(base.join("scripts")).unwrap();
        std::fs::write(
            base.join("scripts/backup.sh"),
            "#!/bin/bash\necho \"backup to $SKILL_PARAM_target\"\n",
        )
        .unwrap();
        std::fs::write(
            base.join("scripts/restore.sh"),
            "#!/bin/bash\necho \"no snapshot\" >&2\nexit 2\n",
        )
        .unwrap();

        let skill = Skill::new("etcd", "Back up and restore etcd", &base);
        let registry = SkillRegistry::from_skills([skill]).unwrap();
        (dir, Arc::new(registry))
    }

    fn router(config: Config, registry: Arc<SkillRegistry>) -> SkillRouter {
        SkillRouter::new(
            Arc::new(config),
            registry,
            Arc::new(DirectExecutor::new(Duration::from_secs(10))),
        )
    }

    fn backup() -> ExecutionParams {
        ExecutionParams::new()
            .with("action", "backup")
            .with("target", "s3://snapshots")
    }

    #[tokio::test]
    async fn test_direct_execution() {
        let (_dir, registry) = etcd_registry();
        let router = router(Config::default(), registry);

        assert_eq!(router.mode_for("etcd"), ExecutionMode::Direct);
        let result = router.execute("etcd", &backup()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output.trim(), "backup to s3://snapshots");
    }

    #[tokio::test]
    async fn test_auto_mode_runs_directly() {
        let (_dir, registry) = etcd_registry();
        let mut config = Config::default();
        config.skills.insert(
            "etcd".to_string(),
            SkillConfig {
                execution_mode: ExecutionMode::Auto,
                mcp_server: Some("unreachable".to_string()),
            },
        );
        let router = router(config, registry);

        let result = router.execute("etcd", &backup()).await.unwrap();
        assert!(result.success);
        assert!(router.manager().connected_servers().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_script_is_a_result() {
        let (_dir, registry) = etcd_registry();
        let router = router(Config::default(), registry);

        let params = ExecutionParams::new().with("action", "restore");
        let result = router.execute("etcd", &params).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.failure, Some(FailureKind::NonZeroExit));
    }

    #[tokio::test]
    async fn test_unknown_skill() {
        let (_dir, registry) = etcd_registry();
        let router = router(Config::default(), registry);

        let err = router.execute("vault", &ExecutionParams::new()).await.unwrap_err();
        assert!(matches!(err, RouterError::SkillNotFound(name) if name == "vault"));
    }

    #[tokio::test]
    async fn test_forwarded_without_server() {
        let (_dir, registry) = etcd_registry();
        let mut config = Config::default();
        config.skills.insert(
            "etcd".to_string(),
            SkillConfig {
                execution_mode: ExecutionMode::Mcp,
                mcp_server: None,
            },
        );
        let router = router(config, registry);

        let err = router.execute("etcd", &backup()).await.unwrap_err();
        assert!(matches!(err, RouterError::MissingServer(_)));
    }

    #[tokio::test]
    async fn test_forwarded_to_unknown_server_fails_fast() {
        let (_dir, registry) = etcd_registry();
        let mut config = Config::default();
        config
            .skills
            .insert("etcd".to_string(), SkillConfig::forwarded("ghost"));
        let router = router(config, registry);

        let err = tokio::time::timeout(Duration::from_secs(2), router.execute("etcd", &backup()))
            .await
            .expect("router blocked on an unknown server")
            .unwrap_err();
        assert!(matches!(
            err,
            RouterError::Mcp(McpError::ServerNotConnected(name)) if name == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_forwarded_spawn_failure() {
        let (_dir, registry) = etcd_registry();
        let mut config = Config::default();
        config
            .skills
            .insert("etcd".to_string(), SkillConfig::forwarded("broken"));
        config.mcp_servers.insert(
            "broken".to_string(),
            McpServerConfig::new("/nonexistent/opskills"),
        );
        let router = router(config, registry);

        assert_eq!(router.servers(), vec!["broken"]);
        let err = router.execute("etcd", &backup()).await.unwrap_err();
        assert!(matches!(err, RouterError::Mcp(McpError::Transport(_))));
    }

    #[tokio::test]
    async fn test_forwarded_over_cached_connection() {
        let (_dir, remote_registry) = etcd_registry();
        let (near, far) = tokio::io::duplex(64 * 1024);

        let cancel = CancellationToken::new();
        let server = SkillServer::new(
            "remote",
            "0.1.0",
            remote_registry,
            Arc::new(DirectExecutor::default()),
        );
        let serve_cancel = cancel.clone();
        let server_task = tokio::spawn(async move {
            let (read, write) = tokio::io::split(far);
            server.serve(read, write, serve_cancel).await
        });

        // The forwarded skill does not need to exist locally.
        let mut config = Config::default();
        config
            .skills
            .insert("etcd".to_string(), SkillConfig::forwarded("remote"));
        let router = router(config, Arc::new(SkillRegistry::new()));

        let (read, write) = tokio::io::split(near);
        router
            .manager()
            .connect_with("remote", Arc::new(StreamTransport::new(read, write)))
            .await
            .unwrap();

        let result = router.execute("etcd", &backup()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output.trim(), "backup to s3://snapshots");

        let params = ExecutionParams::new().with("action", "restore");
        let result = router.execute("etcd", &params).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::Remote));
        assert_eq!(result.exit_code, 2);
        assert!(result.error_message().contains("no snapshot"));

        router.shutdown().await;
        assert!(!router.manager().is_connected("remote").await);

        cancel.cancel();
        server_task.await.unwrap().unwrap();
    }
}
