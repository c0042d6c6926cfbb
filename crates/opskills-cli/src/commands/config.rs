//! Configuration management commands.

use std::process::ExitCode;

use crate::{AppContext, ConfigAction};

pub fn handle(action: ConfigAction, ctx: &AppContext) -> anyhow::Result<ExitCode> {
    match action {
        ConfigAction::Show => {
            print!("{}", ctx.config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        ConfigAction::Validate => Ok(validate(ctx)),
    }
}

fn validate(ctx: &AppContext) -> ExitCode {
    let result = ctx.config.validate();

    for error in result.errors() {
        println!("  ✗ {}: {}", error.field, error.message);
    }
    for warning in result.warnings() {
        println!("  ! {}: {}", warning.field, warning.message);
    }

    if result.is_ok() {
        println!("Configuration is valid.");
        ExitCode::SUCCESS
    } else {
        println!("\nConfiguration has {} error(s).", result.errors().len());
        ExitCode::FAILURE
    }
}
