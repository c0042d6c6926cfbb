//! # opskills-router
//!
//! Execution routing for OpsSkills.
//!
//! [`SkillRouter`] looks up a skill's execution mode and either runs its
//! script locally through an [`Executor`](opskills_exec::Executor) or
//! forwards the call as an MCP tool call to a configured external server.
//!
//! ## Example
//!
//! ```ignore
//! use opskills_router::SkillRouter;
//!
//! let router = SkillRouter::new(config, registry, executor);
//! let params = ExecutionParams::new().with("action", "backup");
//! let result = router.execute("etcd", &params).await?;
//! router.shutdown().await;
//! ```

use opskills_mcp::McpError;
use thiserror::Error;

pub mod router;

pub use router::SkillRouter;

/// Errors returned by the router.
///
/// A script that runs and fails is not an error: it is a failed
/// [`ExecutionResult`](opskills_core::ExecutionResult).
#[derive(Debug, Error)]
pub enum RouterError {
    /// The skill is not registered locally.
    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    /// The skill is forwarded but names no server.
    #[error("Skill '{0}' uses mcp mode but has no mcp_server configured")]
    MissingServer(String),

    /// The forwarded call failed.
    #[error(transparent)]
    Mcp(#[from] McpError),
}

impl RouterError {
    /// The caller abandoned the call (cancellation or timeout).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RouterError::Mcp(e) if e.is_cancellation())
    }
}

/// Result type for routing.
pub type RouterResult<T> = Result<T, RouterError>;

impl From<RouterError> for opskills_core::Error {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::SkillNotFound(name) => opskills_core::Error::SkillNotFound(name),
            RouterError::MissingServer(_) => opskills_core::Error::Routing(err.to_string()),
            RouterError::Mcp(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_router_error_into_core_error() {
        let err: opskills_core::Error = RouterError::SkillNotFound("etcd".to_string()).into();
        assert!(matches!(err, opskills_core::Error::SkillNotFound(name) if name == "etcd"));

        let err: opskills_core::Error = RouterError::MissingServer("etcd".to_string()).into();
        assert!(matches!(err, opskills_core::Error::Routing(_)));

        let err: opskills_core::Error =
            RouterError::Mcp(McpError::ServerNotConnected("remote".to_string())).into();
        assert!(matches!(err, opskills_core::Error::Mcp(_)));
    }

    #[test]
    fn test_cancellation_is_distinguished() {
        assert!(RouterError::Mcp(McpError::Timeout(Duration::from_secs(1))).is_cancellation());
        assert!(RouterError::Mcp(McpError::Cancelled).is_cancellation());
        assert!(!RouterError::SkillNotFound("x".to_string()).is_cancellation());
    }
}
