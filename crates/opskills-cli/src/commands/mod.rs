//! CLI command implementations.

use std::sync::Arc;

use anyhow::Context;
use opskills_core::{Config, SkillLoader, SkillRegistry};
use opskills_exec::DirectExecutor;

pub mod config;
pub mod mcp;
pub mod run;
pub mod serve;
pub mod skills;

/// Fail on configuration errors, log warnings.
pub fn ensure_valid(config: &Config) -> anyhow::Result<()> {
    let result = config.validate();
    for warning in result.warnings() {
        tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
    }
    if !result.is_ok() {
        let errors: Vec<String> = result
            .errors()
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        anyhow::bail!(
            "Configuration validation failed:\n  {}\n  Run 'opskills config validate' for details",
            errors.join("\n  ")
        );
    }
    Ok(())
}

/// Load the skills directory named by the configuration.
pub fn load_registry(config: &Config) -> anyhow::Result<SkillRegistry> {
    let loader = SkillLoader::new(&config.general.skills_dir);
    let loaded = loader
        .load_all()
        .with_context(|| format!("Failed to load skills from {}", loader.skills_dir().display()))?;

    for error in &loaded.errors {
        eprintln!("warning: {}", error);
    }
    Ok(loaded.into_registry())
}

/// Direct executor using the configured script timeout.
pub fn direct_executor(config: &Config) -> Arc<DirectExecutor> {
    Arc::new(DirectExecutor::new(config.executor.timeout()))
}
