//! End-to-end tests against the built `opskills` binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

use opskills_core::{Config, ExecutionParams, McpServerConfig, SkillConfig, SkillRegistry};
use opskills_exec::DirectExecutor;
use opskills_router::SkillRouter;
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_opskills");

struct Fixture {
    _dir: TempDir,
    skills_dir: PathBuf,
    config: PathBuf,
}

fn fixture(config: &str) -> Fixture {
    let dir = TempDir::new().unwrap();
    let skills_dir = dir.path().join("skills");
    let base = skills_dir.join("etcd");
    std::fs::create_dir_all(base.join("scripts")).unwrap();
    std::fs::write(
        base.join("SKILL.md"),
        "---\nname: etcd\ndescription: Back up and restore etcd\n---\n# etcd\n",
    )
    .unwrap();
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

    let config_path = dir.path().join("opskills.toml");
    std::fs::write(&config_path, config).unwrap();

    Fixture {
        _dir: dir,
        skills_dir,
        config: config_path,
    }
}

fn opskills(fixture: &Fixture, args: &[&str]) -> Output {
    Command::new(BIN)
        .arg("--config")
        .arg(&fixture.config)
        .arg("--skills-dir")
        .arg(&fixture.skills_dir)
        .args(args)
        .output()
        .unwrap()
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn test_run_direct_skill() {
    let fixture = fixture("");
    let output = opskills(
        &fixture,
        &["run", "etcd", "-p", "action=backup", "-p", "target=s3://snapshots"],
    );

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "backup to s3://snapshots"
    );
}

#[test]
fn test_run_failure_sets_exit_status() {
    let fixture = fixture("");
    let output = opskills(&fixture, &["run", "etcd", "--params", r#"{"action": "restore"}"#]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("script exited with code 2"));
    assert!(stderr.contains("no snapshot"));
}

#[test]
fn test_run_unknown_skill() {
    let fixture = fixture("");
    let output = opskills(&fixture, &["run", "vault"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Skill not found: vault"));
}

#[test]
fn test_skills_list() {
    let fixture = fixture("[skills.etcd]\nexecution_mode = \"auto\"\n");
    let output = opskills(&fixture, &["skills", "list"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("etcd"));
    assert!(stdout.contains("[auto]"));
    assert!(stdout.contains("Back up and restore etcd"));
}

#[test]
fn test_config_validate() {
    let invalid = fixture("[skills.etcd]\nexecution_mode = \"mcp\"\nmcp_server = \"missing\"\n");
    let output = opskills(&invalid, &["config", "validate"]);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("skills.etcd.mcp_server"));
    assert!(stdout.contains("MCP server 'missing' is not defined"));

    let valid = fixture("[executor]\ntimeout_secs = 60\n");
    let output = opskills(&valid, &["config", "validate"]);
    assert!(output.status.success());
}

#[test]
fn test_config_show_renders_toml() {
    let fixture = fixture("[executor]\ntimeout_secs = 42\n");
    let output = opskills(&fixture, &["config", "show"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("timeout_secs = 42"));
}

#[test]
fn test_version() {
    let output = Command::new(BIN).arg("version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("opskills "));
}

#[tokio::test]
async fn test_router_forwards_to_spawned_server() {
    let fixture = fixture("");

    let mut config = Config::default();
    config.mcp_servers.insert(
        "local".to_string(),
        McpServerConfig::new(BIN).with_args([
            "--config".to_string(),
            path_str(&fixture.config),
            "--skills-dir".to_string(),
            path_str(&fixture.skills_dir),
            "serve".to_string(),
        ]),
    );
    config
        .skills
        .insert("etcd".to_string(), SkillConfig::forwarded("local"));

    let router = SkillRouter::new(
        Arc::new(config),
        Arc::new(SkillRegistry::new()),
        Arc::new(DirectExecutor::default()),
    );

    let params = ExecutionParams::new()
        .with("action", "backup")
        .with("target", "s3://snapshots");
    let result = router.execute("etcd", &params).await.unwrap();
    assert!(result.success, "{}", result.error_message());
    assert_eq!(result.output.trim(), "backup to s3://snapshots");

    // Second call reuses the cached connection.
    let result = router
        .execute("etcd", &ExecutionParams::new().with("action", "restore"))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.exit_code, 2);
    assert_eq!(router.manager().connected_servers().await, vec!["local"]);

    let resources = router.manager().discover_resources("local").await.unwrap();
    let uris: Vec<&str> = resources.iter().map(|r| r.uri.as_str()).collect();
    assert_eq!(
        uris,
        vec![
            "skill://etcd/skill.md",
            "skill://etcd/script/backup.sh",
            "skill://etcd/script/restore.sh",
        ]
    );

    router.shutdown().await;
    assert!(router.manager().connected_servers().await.is_empty());
}
