//! External MCP server inspection commands.

use opskills_mcp::ExternalServerManager;

use crate::{AppContext, McpAction};

pub async fn handle(action: McpAction, ctx: &AppContext) -> anyhow::Result<()> {
    match action {
        McpAction::List => {
            list_servers(ctx);
            Ok(())
        }
        McpAction::Tools { server } => {
            crate::commands::ensure_valid(&ctx.config)?;
            let manager = ExternalServerManager::from_config(&ctx.config);
            let outcome = list_tools(&manager, &server).await;
            manager.disconnect_all().await;
            outcome
        }
        McpAction::Resources { server } => {
            crate::commands::ensure_valid(&ctx.config)?;
            let manager = ExternalServerManager::from_config(&ctx.config);
            let outcome = list_resources(&manager, &server).await;
            manager.disconnect_all().await;
            outcome
        }
    }
}

fn list_servers(ctx: &AppContext) {
    if ctx.config.mcp_servers.is_empty() {
        println!("No MCP servers configured.");
        return;
    }

    println!("Configured MCP servers:");
    for (name, server) in &ctx.config.mcp_servers {
        let mut command = server.command.clone();
        for arg in &server.args {
            command.push(' ');
            command.push_str(arg);
        }
        println!("  {} ({}): {}", name, server.server_type, command);

        let skills: Vec<&str> = ctx
            .config
            .skills
            .iter()
            .filter(|(_, s)| s.mcp_server.as_deref() == Some(name.as_str()))
            .map(|(skill, _)| skill.as_str())
            .collect();
        if !skills.is_empty() {
            println!("    skills: {}", skills.join(", "));
        }
    }
}

async fn list_tools(manager: &ExternalServerManager, server: &str) -> anyhow::Result<()> {
    let tools = manager.discover_tools(server).await?;
    if tools.is_empty() {
        println!("{} offers no tools.", server);
        return Ok(());
    }

    println!("Tools on {}:", server);
    for tool in tools {
        match tool.description.as_deref() {
            Some(description) if !description.is_empty() => {
                println!("  {} - {}", tool.name, description)
            }
            _ => println!("  {}", tool.name),
        }
    }
    Ok(())
}

async fn list_resources(manager: &ExternalServerManager, server: &str) -> anyhow::Result<()> {
    let resources = manager.discover_resources(server).await?;
    if resources.is_empty() {
        println!("{} offers no resources.", server);
        return Ok(());
    }

    println!("Resources on {}:", server);
    for resource in resources {
        let mime = resource.mime_type.as_deref().unwrap_or("-");
        println!("  {}  [{}]  {}", resource.uri, mime, resource.name);
    }
    Ok(())
}
