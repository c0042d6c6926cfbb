//! Skill descriptors and execution results.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File name of a skill's descriptor inside its base directory.
pub const DESCRIPTOR_FILE: &str = "SKILL.md";

/// Default name of the scripts directory inside a skill's base directory.
pub const SCRIPTS_DIR: &str = "scripts";

/// Directory holding example configuration files inside a skill's base directory.
pub const EXAMPLES_DIR: &str = "examples";

/// Extension of runnable skill scripts.
pub const SCRIPT_EXTENSION: &str = "sh";

/// A loaded capability descriptor.
///
/// Immutable once constructed; the registry owns it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    /// Unique skill name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// License name or reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Compatibility notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<String>,
    /// Skill root directory
    pub base_path: PathBuf,
    /// Directory containing the skill's scripts
    pub scripts_path: PathBuf,
    /// Path of the descriptor file, when one was read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor_path: Option<PathBuf>,
    /// Markdown body of the descriptor
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instructions: String,
    /// When the descriptor was loaded
    pub loaded_at: DateTime<Utc>,
}

impl Skill {
    /// Create a descriptor rooted at `base_path`, with scripts under `<base>/scripts`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        base_path: impl Into<PathBuf>,
    ) -> Self {
        let base_path = base_path.into();
        Self {
            name: name.into(),
            description: description.into(),
            license: None,
            compatibility: None,
            scripts_path: base_path.join(SCRIPTS_DIR),
            base_path,
            descriptor_path: None,
            instructions: String::new(),
            loaded_at: Utc::now(),
        }
    }

    /// Override the scripts directory.
    pub fn with_scripts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.scripts_path = path.into();
        self
    }

    /// Set the license.
    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = Some(license.into());
        self
    }

    /// Set the compatibility notes.
    pub fn with_compatibility(mut self, compatibility: impl Into<String>) -> Self {
        self.compatibility = Some(compatibility.into());
        self
    }

    /// Record the descriptor file the skill was read from.
    pub fn with_descriptor(mut self, path: impl Into<PathBuf>) -> Self {
        self.descriptor_path = Some(path.into());
        self
    }

    /// Set the markdown instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Directory holding example configuration files.
    pub fn examples_path(&self) -> PathBuf {
        self.base_path.join(EXAMPLES_DIR)
    }

    /// Resolve a script file name against the scripts directory.
    pub fn script_path(&self, file: &str) -> PathBuf {
        self.scripts_path.join(file)
    }

    /// List runnable script file names, sorted lexicographically.
    ///
    /// A missing scripts directory yields an empty list.
    pub fn script_files(&self) -> std::io::Result<Vec<String>> {
        list_scripts(&self.scripts_path)
    }
}

fn list_scripts(dir: &Path) -> std::io::Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            files.push(name.to_string());
        }
    }
    files.sort();
    Ok(files)
}

/// Why an execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No script could be selected for the request
    ScriptNotFound,
    /// The script process could not be started
    SpawnFailed,
    /// The script exited with a non-zero status
    NonZeroExit,
    /// The script exceeded its wall-clock limit and was killed
    Timeout,
    /// The remote side reported the call as failed
    Remote,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::ScriptNotFound => write!(f, "script not found"),
            FailureKind::SpawnFailed => write!(f, "spawn failed"),
            FailureKind::NonZeroExit => write!(f, "non-zero exit"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Remote => write!(f, "remote failure"),
        }
    }
}

/// Outcome of a single skill execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether execution succeeded
    pub success: bool,
    /// Captured standard output
    pub output: String,
    /// Captured standard error, or a failure message
    #[serde(default)]
    pub error: String,
    /// Process exit code (-1 when the process never produced one)
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Completion timestamp
    pub completed_at: DateTime<Utc>,
    /// Failure classification, absent on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    /// Create a successful result.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: String::new(),
            exit_code: 0,
            duration_ms: 0,
            completed_at: Utc::now(),
            failure: None,
        }
    }

    /// Create a failed result.
    pub fn failure(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
            exit_code: -1,
            duration_ms: 0,
            completed_at: Utc::now(),
            failure: Some(kind),
        }
    }

    /// Set the captured output.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    /// Set the exit code.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Wall-clock duration.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Whether the failure was a timeout.
    pub fn timed_out(&self) -> bool {
        self.failure == Some(FailureKind::Timeout)
    }

    /// One-line human-readable error summary.
    pub fn error_message(&self) -> String {
        let detail = self.error.trim();
        match (self.failure, detail.is_empty()) {
            (Some(FailureKind::NonZeroExit), true) => {
                format!("script exited with code {}", self.exit_code)
            }
            (Some(FailureKind::NonZeroExit), false) => {
                format!("script exited with code {}: {}", self.exit_code, detail)
            }
            (Some(kind), true) => kind.to_string(),
            (_, false) => detail.to_string(),
            (None, true) => "execution failed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_skill_default_paths() {
        let skill = Skill::new("kubekey", "Deploy clusters", "/opt/skills/kubekey");
        assert_eq!(skill.scripts_path, PathBuf::from("/opt/skills/kubekey/scripts"));
        assert_eq!(skill.examples_path(), PathBuf::from("/opt/skills/kubekey/examples"));
        assert_eq!(
            skill.script_path("create.sh"),
            PathBuf::from("/opt/skills/kubekey/scripts/create.sh")
        );
    }

    #[test]
    fn test_script_files_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let scripts = dir.path().join("scripts");
        std::fs::create_dir(&scripts).unwrap();
        std::fs::write(scripts.join("zeta.sh"), "#!/bin/bash\n").unwrap();
        std::fs::write(scripts.join("alpha.sh"), "#!/bin/bash\n").unwrap();
        std::fs::write(scripts.join("README.md"), "docs").unwrap();
        std::fs::create_dir(scripts.join("nested.sh")).unwrap();

        let skill = Skill::new("demo", "Demo", dir.path());
        assert_eq!(skill.script_files().unwrap(), vec!["alpha.sh", "zeta.sh"]);
    }

    #[test]
    fn test_script_files_missing_dir() {
        let dir = TempDir::new().unwrap();
        let skill = Skill::new("demo", "Demo", dir.path());
        assert!(skill.script_files().unwrap().is_empty());
    }

    #[test]
    fn test_result_error_message() {
        let result = ExecutionResult::failure(FailureKind::NonZeroExit, "boom\n").with_exit_code(2);
        assert_eq!(result.error_message(), "script exited with code 2: boom");

        let result = ExecutionResult::failure(FailureKind::Timeout, "");
        assert!(result.timed_out());
        assert_eq!(result.error_message(), "timeout");
    }

    #[test]
    fn test_result_duration() {
        let result = ExecutionResult::success("ok").with_duration(Duration::from_millis(1500));
        assert_eq!(result.duration_ms, 1500);
        assert_eq!(result.duration(), Duration::from_millis(1500));
        assert!(result.failure.is_none());
    }
}
