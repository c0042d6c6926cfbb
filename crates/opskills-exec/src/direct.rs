//! Direct skill executor.
//!
//! Script selection, in order:
//! 1. an explicit `script` parameter (must exist)
//! 2. `<action>.sh` when an `action` parameter names an existing script
//! 3. `main.sh`
//! 4. the first `*.sh` file by name
//!
//! Every other parameter is exported as `SKILL_PARAM_<key>` and, unless its
//! rendered value is empty or starts with `-`, passed as `--key value`.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use opskills_core::skill::SCRIPT_EXTENSION;
use opskills_core::{ExecutionParams, ExecutionResult, FailureKind, Skill};
use tracing::{debug, info, warn};

use crate::runner::ScriptRunner;
use crate::{ExecError, Executor};

/// Fallback script name.
pub const MAIN_SCRIPT: &str = "main.sh";

/// Prefix of per-parameter environment variables.
pub const PARAM_ENV_PREFIX: &str = "SKILL_PARAM_";

/// Parameters consumed by script selection rather than passed to the script.
const RESERVED_PARAMS: [&str; 2] = ["script", "action"];

/// Executes skills by running their scripts locally.
#[derive(Debug, Clone, Default)]
pub struct DirectExecutor {
    runner: ScriptRunner,
}

impl DirectExecutor {
    /// Create an executor with the given script timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            runner: ScriptRunner::new(timeout),
        }
    }

    /// Create an executor around an existing runner.
    pub fn with_runner(runner: ScriptRunner) -> Self {
        Self { runner }
    }

    /// Choose the script to run for `params`.
    pub fn select_script(
        &self,
        skill: &Skill,
        params: &ExecutionParams,
    ) -> Result<PathBuf, ExecError> {
        if let Some(script) = params.get("script").filter(|v| !v.is_null()) {
            let name = script.to_string();
            validate_script_name(&name)?;
            let path = skill.script_path(&name);
            if path.is_file() {
                return Ok(path);
            }
            return Err(ExecError::ScriptNotFound(path));
        }

        if let Some(action) = params.get_str("action").filter(|a| !a.is_empty()) {
            if validate_script_name(action).is_ok() {
                let path = skill.script_path(&format!("{}.{}", action, SCRIPT_EXTENSION));
                if path.is_file() {
                    return Ok(path);
                }
            }
            debug!(skill = %skill.name, action, "No script for action, falling back");
        }

        let scripts = skill.script_files()?;
        if scripts.iter().any(|s| s == MAIN_SCRIPT) {
            return Ok(skill.script_path(MAIN_SCRIPT));
        }
        scripts
            .first()
            .map(|s| skill.script_path(s))
            .ok_or_else(|| ExecError::NoScripts(skill.scripts_path.clone()))
    }

    /// Build the command-line arguments and environment for a run.
    pub fn prepare(
        &self,
        skill: &Skill,
        params: &ExecutionParams,
    ) -> (Vec<String>, Vec<(String, String)>) {
        let mut args = Vec::new();
        let mut env = vec![
            ("SKILL_NAME".to_string(), skill.name.clone()),
            (
                "SKILL_BASE_PATH".to_string(),
                skill.base_path.display().to_string(),
            ),
            (
                "SKILL_SCRIPTS_PATH".to_string(),
                skill.scripts_path.display().to_string(),
            ),
        ];

        for (key, value) in params {
            if RESERVED_PARAMS.contains(&key.as_str()) {
                continue;
            }
            if key.is_empty() || key.contains(['=', '\0']) {
                warn!(skill = %skill.name, key = %key, "Skipping parameter with unusable name");
                continue;
            }

            let rendered = value.to_string();
            env.push((format!("{}{}", PARAM_ENV_PREFIX, key), rendered.clone()));

            if !rendered.is_empty() && !rendered.starts_with('-') {
                args.push(format!("--{}", key));
                args.push(rendered);
            }
        }

        (args, env)
    }
}

#[async_trait]
impl Executor for DirectExecutor {
    async fn execute(&self, skill: &Skill, params: &ExecutionParams) -> ExecutionResult {
        let started = Instant::now();

        let script = match self.select_script(skill, params) {
            Ok(script) => script,
            Err(e) => {
                warn!(skill = %skill.name, error = %e, "Script selection failed");
                return e.into_result().with_duration(started.elapsed());
            }
        };
        let (args, env) = self.prepare(skill, params);

        info!(
            skill = %skill.name,
            script = %script.display(),
            args = args.len(),
            "Executing skill script"
        );

        let result = match self.runner.run(&script, &args, &env).await {
            Ok(output) if output.success() => ExecutionResult::success(output.stdout),
            Ok(output) => ExecutionResult::failure(FailureKind::NonZeroExit, output.stderr)
                .with_output(output.stdout)
                .with_exit_code(output.exit_code),
            Err(e) => e.into_result(),
        };
        let result = result.with_duration(started.elapsed());

        if result.success {
            debug!(skill = %skill.name, duration_ms = result.duration_ms, "Skill succeeded");
        } else {
            warn!(
                skill = %skill.name,
                exit_code = result.exit_code,
                failure = ?result.failure,
                "Skill failed"
            );
        }
        result
    }
}

/// Reject names that would resolve outside the scripts directory.
fn validate_script_name(name: &str) -> Result<(), ExecError> {
    let path = Path::new(name);
    let escapes = name.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(ExecError::InvalidScriptName(name.to_string()));
    }
    Ok(())
}
