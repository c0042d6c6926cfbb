//! Error types for OpsSkills.
//!
//! This module provides the top-level error hierarchy, with structured
//! errors that carry context and recovery suggestions. Lower layers
//! (executor, protocol bridge, router) define their own error enums and
//! convert into [`Error`] at the crate boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the OpsSkills error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for OpsSkills.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Skill descriptor error
    #[error("{0}")]
    Skill(#[from] SkillError),

    /// Skill not registered
    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    /// Script execution error
    #[error("Execution error: {0}")]
    Execution(String),

    /// Protocol bridge error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Routing error
    #[error("Routing error: {0}")]
    Routing(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Cancelled by the caller
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => {
                Some("Check your config file at ~/.config/opskills/config.toml or ./opskills.toml")
            }
            Error::Skill(e) => e.recovery_suggestion(),
            Error::SkillNotFound(_) => Some("Use 'opskills skills list' to see available skills"),
            Error::Mcp(_) => Some("Use 'opskills mcp list' to check the configured MCP servers"),
            Error::Routing(_) => Some("Check the [skills] section of your configuration"),
            _ => None,
        }
    }
}

/// Errors raised while reading a skill descriptor.
#[derive(Error, Debug)]
pub enum SkillError {
    /// Descriptor has no frontmatter block
    #[error("{path}: missing YAML frontmatter")]
    MissingFrontmatter { path: PathBuf },

    /// Frontmatter is not valid YAML
    #[error("{path}: invalid YAML frontmatter: {message}")]
    InvalidYaml { path: PathBuf, message: String },

    /// Required frontmatter field is absent or empty
    #[error("{path}: missing required field '{field}'")]
    MissingField { path: PathBuf, field: &'static str },

    /// Name is unusable as a registry key
    #[error("invalid skill name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Descriptor file could not be read
    #[error("{path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SkillError {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            SkillError::MissingFrontmatter { .. } | SkillError::InvalidYaml { .. } => {
                Some("SKILL.md must start with a '---' delimited YAML block")
            }
            SkillError::MissingField { .. } => {
                Some("Add 'name' and 'description' to the SKILL.md frontmatter")
            }
            SkillError::InvalidName { .. } => {
                Some("Skill names must be non-empty and must not contain '/'")
            }
            SkillError::Read { .. } => None,
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}
