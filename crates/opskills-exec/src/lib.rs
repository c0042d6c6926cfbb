//! # opskills-exec
//!
//! Direct execution of skill scripts.
//!
//! This crate provides:
//! - [`ScriptRunner`]: runs one `bash` script with captured output and a hard
//!   wall-clock timeout
//! - [`DirectExecutor`]: selects a skill's script, marshals parameters into
//!   arguments and environment, and folds every outcome into an
//!   [`ExecutionResult`]
//!
//! ## Example
//!
//! ```ignore
//! use opskills_exec::{DirectExecutor, Executor};
//! use std::time::Duration;
//!
//! let executor = DirectExecutor::new(Duration::from_secs(60));
//! let params = ExecutionParams::new().with("action", "create_cluster");
//! let result = executor.execute(&skill, &params).await;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use opskills_core::{ExecutionParams, ExecutionResult, FailureKind, Skill};
use thiserror::Error;

pub mod direct;
pub mod runner;

pub use direct::DirectExecutor;
pub use runner::{RunOutput, ScriptRunner};

/// Runs a skill with parameters.
///
/// Implementations never fail: script resolution, spawn, exit status and
/// timeout problems are all reported through a failed [`ExecutionResult`].
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute `skill` with `params`.
    async fn execute(&self, skill: &Skill, params: &ExecutionParams) -> ExecutionResult;
}

/// Errors that can occur while running a script.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The requested script does not exist.
    #[error("script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    /// The scripts directory has no runnable script.
    #[error("no script found in {}", .0.display())]
    NoScripts(PathBuf),

    /// The requested script name escapes the scripts directory.
    #[error("invalid script name: {0}")]
    InvalidScriptName(String),

    /// The process could not be started.
    #[error("failed to start script: {0}")]
    Spawn(#[source] std::io::Error),

    /// I/O error while waiting for the process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The script exceeded its wall-clock limit.
    #[error("script execution timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl ExecError {
    /// Failure classification for the result.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ExecError::ScriptNotFound(_)
            | ExecError::NoScripts(_)
            | ExecError::InvalidScriptName(_) => FailureKind::ScriptNotFound,
            ExecError::Spawn(_) | ExecError::Io(_) => FailureKind::SpawnFailed,
            ExecError::Timeout(_) => FailureKind::Timeout,
        }
    }

    /// Convert into a failed execution result.
    pub fn into_result(self) -> ExecutionResult {
        ExecutionResult::failure(self.failure_kind(), self.to_string())
    }
}

impl From<ExecError> for opskills_core::Error {
    fn from(err: ExecError) -> Self {
        opskills_core::Error::Execution(err.to_string())
    }
}
