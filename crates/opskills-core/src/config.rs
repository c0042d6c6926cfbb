//! Configuration system for OpsSkills.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Project-local configuration file name.
pub const PROJECT_CONFIG_FILE: &str = "opskills.toml";

/// Prefix for configuration environment variables.
pub const ENV_PREFIX: &str = "OPSKILLS_";

/// Main configuration struct for OpsSkills.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Direct executor settings
    pub executor: ExecutorConfig,
    /// Protocol bridge settings
    pub mcp: McpConfig,
    /// Per-skill execution settings
    pub skills: BTreeMap<String, SkillConfig>,
    /// External MCP servers by name
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding one subdirectory per skill
    pub skills_dir: PathBuf,
    /// Client name sent during the initialize handshake
    pub client_name: String,
    /// Client version sent during the initialize handshake
    pub client_version: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            skills_dir: PathBuf::from("./skills"),
            client_name: "opskills-agent".to_string(),
            client_version: "1.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Wall-clock limit for a single script run, in seconds
    pub timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { timeout_secs: 1800 }
    }
}

impl ExecutorConfig {
    /// Script timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Timeout for a forwarded request, in seconds
    pub request_timeout_secs: u64,
    /// Grace period between SIGTERM and SIGKILL when stopping a server, in seconds
    pub shutdown_grace_secs: u64,
    /// Name advertised by `opskills serve`
    pub server_name: String,
    /// Version advertised by `opskills serve`
    pub server_version: String,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 300,
            shutdown_grace_secs: 2,
            server_name: "opskills".to_string(),
            server_version: "1.0.0".to_string(),
        }
    }
}

impl McpConfig {
    /// Forwarded request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Shutdown grace period as a duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// How a skill is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run the skill's script locally
    #[default]
    Direct,
    /// Forward the call to an external MCP server
    #[serde(alias = "forwarded")]
    Mcp,
    /// Currently identical to `Direct`
    Auto,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Mcp => write!(f, "mcp"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "mcp" | "forwarded" => Ok(Self::Mcp),
            "auto" => Ok(Self::Auto),
            other => Err(Error::Config(format!(
                "Invalid execution mode '{}'. Valid values: direct, mcp, auto",
                other
            ))),
        }
    }
}

/// Execution settings for one skill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillConfig {
    /// Execution mode
    pub execution_mode: ExecutionMode,
    /// External server used in `mcp` mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_server: Option<String>,
}

impl SkillConfig {
    /// Direct execution.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Forward to the named server.
    pub fn forwarded(server: impl Into<String>) -> Self {
        Self {
            execution_mode: ExecutionMode::Mcp,
            mcp_server: Some(server.into()),
        }
    }
}

/// Transport used to reach an external server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    /// Child process speaking line-delimited JSON on stdin/stdout
    #[default]
    Stdio,
    /// Not supported
    Http,
    /// Not supported
    Sse,
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
            Self::Sse => write!(f, "sse"),
        }
    }
}

/// Launch specification for an external MCP server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpServerConfig {
    /// Transport type
    #[serde(rename = "type")]
    pub server_type: ServerType,
    /// Command to execute
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl McpServerConfig {
    /// Create a stdio server configuration.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Add arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "skills.kubekey.mcp_server")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Defaults, then the user config file, then `./opskills.toml`, then
    /// `OPSKILLS_*` environment variables (nested keys separated by `__`).
    pub fn load() -> Result<Self, figment::Error> {
        let user_config = Self::config_dir().join("config.toml");

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(user_config))
            .merge(Toml::file(PROJECT_CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Load configuration from an explicit file instead of the user and project files.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(figment::Error::from(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Load and validate configuration, from `path` when given.
    pub fn load_validated(path: Option<&Path>) -> Result<Self, Error> {
        let config = match path {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
        .map_err(|e| Error::Config(e.to_string()))?;

        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.general.skills_dir.as_os_str().is_empty() {
            result.add_error("general.skills_dir", "skills_dir cannot be empty");
        }

        if self.executor.timeout_secs == 0 {
            result.add_error("executor.timeout_secs", "timeout_secs must be greater than 0");
        }

        if self.mcp.request_timeout_secs == 0 {
            result.add_error(
                "mcp.request_timeout_secs",
                "request_timeout_secs must be greater than 0",
            );
        }

        for (name, skill) in &self.skills {
            let field = format!("skills.{}.mcp_server", name);
            match (skill.execution_mode, skill.mcp_server.as_deref()) {
                (ExecutionMode::Mcp, None) | (ExecutionMode::Mcp, Some("")) => {
                    result.add_error(field, "mcp execution mode requires mcp_server");
                }
                (ExecutionMode::Mcp, Some(server)) if !self.mcp_servers.contains_key(server) => {
                    result.add_error(field, format!("MCP server '{}' is not defined", server));
                }
                (ExecutionMode::Auto, Some(server)) => {
                    result.add_warning(
                        field,
                        format!("auto mode runs directly; server '{}' is never used", server),
                    );
                }
                _ => {}
            }
        }

        for (name, server) in &self.mcp_servers {
            if server.server_type != ServerType::Stdio {
                result.add_error(
                    format!("mcp_servers.{}.type", name),
                    format!(
                        "Unsupported server type '{}'. Only 'stdio' is supported",
                        server.server_type
                    ),
                );
            }
            if server.command.trim().is_empty() {
                result.add_error(
                    format!("mcp_servers.{}.command", name),
                    "command cannot be empty",
                );
            }
        }

        result
    }

    /// Execution settings for a skill; unconfigured skills run directly.
    pub fn skill_config(&self, name: &str) -> SkillConfig {
        self.skills.get(name).cloned().unwrap_or_default()
    }

    /// Launch specification for a named server.
    pub fn server(&self, name: &str) -> Option<&McpServerConfig> {
        self.mcp_servers.get(name)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("opskills"))
            .unwrap_or_else(|| PathBuf::from("~/.config/opskills"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_ok(), "Default config should be valid: {:?}", result.issues);
        assert_eq!(config.executor.timeout(), Duration::from_secs(30 * 60));
        assert_eq!(config.mcp.shutdown_grace(), Duration::from_secs(2));
    }

    #[test]
    fn test_mcp_mode_requires_server() {
        let mut config = Config::default();
        config.skills.insert(
            "kubekey".to_string(),
            SkillConfig {
                execution_mode: ExecutionMode::Mcp,
                mcp_server: None,
            },
        );
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result.errors().iter().any(|e| e.field == "skills.kubekey.mcp_server"));
    }

    #[test]
    fn test_undefined_server_is_error() {
        let mut config = Config::default();
        config
            .skills
            .insert("kubekey".to_string(), SkillConfig::forwarded("ghost"));
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result.errors()[0].message.contains("ghost"));

        config
            .mcp_servers
            .insert("ghost".to_string(), McpServerConfig::new("ghost-server"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unsupported_server_type() {
        let mut config = Config::default();
        let mut server = McpServerConfig::new("remote");
        server.server_type = ServerType::Http;
        config.mcp_servers.insert("remote".to_string(), server);
        config
            .mcp_servers
            .insert("blank".to_string(), McpServerConfig::new("  "));

        let result = config.validate();
        assert!(result.errors().iter().any(|e| e.field == "mcp_servers.remote.type"));
        assert!(result.errors().iter().any(|e| e.field == "mcp_servers.blank.command"));
    }

    #[test]
    fn test_zero_timeouts_are_errors() {
        let mut config = Config::default();
        config.executor.timeout_secs = 0;
        config.mcp.request_timeout_secs = 0;
        let result = config.validate();
        assert_eq!(result.errors().len(), 2);
    }

    #[test]
    fn test_auto_with_server_is_warning() {
        let mut config = Config::default();
        config.skills.insert(
            "kubekey".to_string(),
            SkillConfig {
                execution_mode: ExecutionMode::Auto,
                mcp_server: Some("kk".to_string()),
            },
        );
        let result = config.validate();
        assert!(result.is_ok()); // Warnings don't fail validation
        assert_eq!(result.warnings().len(), 1);
    }

    #[test]
    fn test_execution_mode_parsing() {
        assert_eq!("direct".parse::<ExecutionMode>().unwrap(), ExecutionMode::Direct);
        assert_eq!("forwarded".parse::<ExecutionMode>().unwrap(), ExecutionMode::Mcp);
        assert_eq!("AUTO".parse::<ExecutionMode>().unwrap(), ExecutionMode::Auto);
        assert!("sometimes".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("opskills.toml");
        std::fs::write(
            &path,
            r#"
[general]
skills_dir = "/srv/skills"

[executor]
timeout_secs = 60

[skills.kubekey]
execution_mode = "forwarded"
mcp_server = "kk"

[mcp_servers.kk]
type = "stdio"
command = "kubekey-mcp-server"
args = ["--verbose"]
env = { KUBECONFIG = "/etc/kube/config" }
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.general.skills_dir, PathBuf::from("/srv/skills"));
        assert_eq!(config.executor.timeout_secs, 60);
        assert_eq!(config.mcp.request_timeout_secs, 300);
        assert_eq!(config.skill_config("kubekey"), SkillConfig::forwarded("kk"));
        assert_eq!(config.skill_config("other"), SkillConfig::direct());

        let server = config.server("kk").unwrap();
        assert_eq!(server.command, "kubekey-mcp-server");
        assert_eq!(server.args, vec!["--verbose"]);
        assert_eq!(server.env.get("KUBECONFIG").map(String::as_str), Some("/etc/kube/config"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load_from(dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_render_toml() {
        let mut config = Config::default();
        config
            .mcp_servers
            .insert("kk".to_string(), McpServerConfig::new("kk-server").with_args(["serve"]));
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("[mcp_servers.kk]"));
        assert!(rendered.contains("type = \"stdio\""));
    }
}
