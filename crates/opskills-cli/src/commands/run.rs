//! Run a skill once.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use opskills_core::error::format_error_with_suggestion;
use opskills_core::{ExecutionMode, ExecutionParams, SkillRegistry};
use opskills_router::SkillRouter;
use serde_json::Value;

use crate::commands::{direct_executor, ensure_valid, load_registry};
use crate::AppContext;

/// Build parameters from `--params` JSON and `-p key=value` pairs.
///
/// Pairs are applied after the JSON object and override its keys. Pair
/// values are always strings; use `--params` for typed values.
pub fn parse_params(pairs: &[String], json: Option<&str>) -> anyhow::Result<ExecutionParams> {
    let mut params = match json {
        Some(text) => {
            let value: Value = serde_json::from_str(text).context("--params is not valid JSON")?;
            match value {
                Value::Object(map) => ExecutionParams::from_json_map(map),
                _ => bail!("--params must be a JSON object"),
            }
        }
        None => ExecutionParams::new(),
    };

    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Invalid parameter '{}': expected KEY=VALUE", pair))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid parameter '{}': empty key", pair);
        }
        params.insert(key, value);
    }
    Ok(params)
}

pub async fn run(
    ctx: &AppContext,
    skill: &str,
    pairs: &[String],
    json_params: Option<&str>,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let config = &ctx.config;
    ensure_valid(config)?;
    let params = parse_params(pairs, json_params)?;

    // Forwarded skills run remotely and need no local descriptor.
    let forwarded = config.skill_config(skill).execution_mode == ExecutionMode::Mcp;
    let registry = match load_registry(config) {
        Ok(registry) => registry,
        Err(e) if forwarded => {
            tracing::debug!(error = %format!("{:#}", e), "No local skills");
            SkillRegistry::new()
        }
        Err(e) => return Err(e),
    };

    let router = SkillRouter::new(
        Arc::new(config.clone()),
        Arc::new(registry),
        direct_executor(config),
    );
    let outcome = router.execute(skill, &params).await;
    router.shutdown().await;

    let result = outcome.map_err(|e| {
        let err = opskills_core::Error::from(e);
        anyhow::anyhow!(format_error_with_suggestion(&err))
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.output);
        if !result.output.is_empty() && !result.output.ends_with('\n') {
            println!();
        }
        if !result.success {
            eprintln!("error: {}", result.error_message());
        }
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opskills_core::ParamValue;

    fn pairs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_pairs() {
        let params =
            parse_params(&pairs(&["action=create", "version=1.10", "empty="]), None).unwrap();
        assert_eq!(params.get_str("action"), Some("create"));
        assert_eq!(params.get_str("version"), Some("1.10"));
        assert_eq!(params.get_str("empty"), Some(""));
    }

    #[test]
    fn test_pairs_override_json() {
        let params = parse_params(
            &pairs(&["nodes=5"]),
            Some(r#"{"action": "scale", "nodes": 3, "dry_run": true}"#),
        )
        .unwrap();
        assert_eq!(params.get_str("action"), Some("scale"));
        assert_eq!(params.get_str("nodes"), Some("5"));
        assert_eq!(params.get("dry_run"), Some(&ParamValue::Bool(true)));
    }

    #[test]
    fn test_invalid_params() {
        assert!(parse_params(&pairs(&["novalue"]), None).is_err());
        assert!(parse_params(&pairs(&["=x"]), None).is_err());
        assert!(parse_params(&[], Some("[1, 2]")).is_err());
        assert!(parse_params(&[], Some("{not json")).is_err());
    }
}
