//! Skill listing.

use crate::commands::load_registry;
use crate::{AppContext, SkillsAction};

pub fn handle(action: SkillsAction, ctx: &AppContext) -> anyhow::Result<()> {
    match action {
        SkillsAction::List => list_skills(ctx),
    }
}

fn list_skills(ctx: &AppContext) -> anyhow::Result<()> {
    let registry = load_registry(&ctx.config)?;
    if registry.is_empty() {
        println!(
            "No skills found in {}",
            ctx.config.general.skills_dir.display()
        );
        return Ok(());
    }

    let skills = registry.list();
    let width = skills.iter().map(|s| s.name.len()).max().unwrap_or(0);
    for skill in skills {
        let skill_config = ctx.config.skill_config(&skill.name);
        let mode = match skill_config.mcp_server.as_deref() {
            Some(server) if !server.is_empty() => {
                format!("{} -> {}", skill_config.execution_mode, server)
            }
            _ => skill_config.execution_mode.to_string(),
        };
        println!(
            "{:<width$}  [{}]  {}",
            skill.name,
            mode,
            skill.description,
            width = width
        );
    }
    Ok(())
}
