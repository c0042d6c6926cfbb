//! Serve skills over stdio.

use opskills_mcp::SkillServer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::commands::{direct_executor, load_registry};
use crate::AppContext;

/// Run the skill server on stdin/stdout until end of input or Ctrl-C.
pub async fn run(ctx: &AppContext, only: &[String]) -> anyhow::Result<()> {
    let config = &ctx.config;
    crate::commands::ensure_valid(config)?;

    let registry = load_registry(config)?;
    if !only.is_empty() {
        let missing = registry.retain_only(only);
        if !missing.is_empty() {
            anyhow::bail!("Unknown skill(s): {}", missing.join(", "));
        }
    }

    let server = SkillServer::new(
        config.mcp.server_name.clone(),
        config.mcp.server_version.clone(),
        Arc::new(registry),
        direct_executor(config),
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            on_interrupt.cancel();
        }
    });

    server
        .serve(tokio::io::stdin(), tokio::io::stdout(), cancel)
        .await?;
    Ok(())
}
