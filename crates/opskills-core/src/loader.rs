//! SKILL.md descriptor loading.
//!
//! A skills directory holds one subdirectory per skill. Each subdirectory
//! with a `SKILL.md` file is read: YAML frontmatter between `---` lines
//! supplies the metadata, the markdown body becomes the skill's
//! instructions. A broken descriptor is reported and skipped, it never
//! aborts loading of the others.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result, SkillError};
use crate::registry::SkillRegistry;
use crate::skill::{Skill, DESCRIPTOR_FILE};

/// Raw frontmatter as parsed from YAML.
#[derive(Debug, Deserialize)]
struct RawFrontmatter {
    name: Option<String>,
    description: Option<String>,
    license: Option<String>,
    compatibility: Option<String>,
}

/// Outcome of loading a skills directory.
#[derive(Debug, Default)]
pub struct LoadResult {
    /// Successfully parsed skills, in directory-name order
    pub skills: Vec<Skill>,
    /// Descriptors that failed to parse
    pub errors: Vec<SkillError>,
}

impl LoadResult {
    /// Register every loaded skill, keeping the first of duplicate names.
    pub fn into_registry(self) -> SkillRegistry {
        let registry = SkillRegistry::new();
        for skill in self.skills {
            if let Err(e) = registry.register(skill) {
                tracing::warn!(error = %e, "Skipping skill");
            }
        }
        registry
    }
}

/// Loads skills from a directory.
#[derive(Debug, Clone)]
pub struct SkillLoader {
    skills_dir: PathBuf,
}

impl SkillLoader {
    /// Create a loader for the given skills directory.
    pub fn new(skills_dir: impl Into<PathBuf>) -> Self {
        Self {
            skills_dir: skills_dir.into(),
        }
    }

    /// The directory being loaded.
    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }

    /// Load every skill found in an immediate subdirectory.
    pub fn load_all(&self) -> Result<LoadResult> {
        if !self.skills_dir.is_dir() {
            return Err(Error::Config(format!(
                "skills directory does not exist: {}",
                self.skills_dir.display()
            )));
        }

        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.skills_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let mut result = LoadResult::default();
        for dir in dirs {
            let descriptor = dir.join(DESCRIPTOR_FILE);
            if !descriptor.is_file() {
                continue;
            }
            match load_descriptor(&descriptor) {
                Ok(skill) => {
                    tracing::debug!(skill = %skill.name, "Loaded skill descriptor");
                    result.skills.push(skill);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to load skill");
                    result.errors.push(e);
                }
            }
        }

        tracing::info!(
            dir = %self.skills_dir.display(),
            loaded = result.skills.len(),
            failed = result.errors.len(),
            "Loaded skills"
        );
        Ok(result)
    }

    /// Load a single skill by directory name.
    pub fn load_skill(&self, name: &str) -> Result<Skill> {
        let descriptor = self.skills_dir.join(name).join(DESCRIPTOR_FILE);
        if !descriptor.is_file() {
            return Err(Error::SkillNotFound(name.to_string()));
        }
        Ok(load_descriptor(&descriptor)?)
    }
}

/// Read and parse a descriptor file.
pub fn load_descriptor(path: &Path) -> std::result::Result<Skill, SkillError> {
    let content = std::fs::read_to_string(path).map_err(|source| SkillError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_skill_md(&content, path)
}

/// Parse descriptor content read from `path`.
///
/// The skill's base directory is the descriptor's parent directory.
pub fn parse_skill_md(content: &str, path: &Path) -> std::result::Result<Skill, SkillError> {
    let (frontmatter, body) = split_frontmatter(content).ok_or_else(|| {
        SkillError::MissingFrontmatter {
            path: path.to_path_buf(),
        }
    })?;

    let raw: RawFrontmatter =
        serde_yaml::from_str(frontmatter).map_err(|e| SkillError::InvalidYaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let name = required(raw.name, path, "name")?;
    let description = required(raw.description, path, "description")?;

    let base_path = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut skill = Skill::new(name, description, base_path)
        .with_descriptor(path)
        .with_instructions(body.trim());
    skill.license = raw.license.filter(|l| !l.is_empty());
    skill.compatibility = raw.compatibility.filter(|c| !c.is_empty());
    Ok(skill)
}

fn required(
    value: Option<String>,
    path: &Path,
    field: &'static str,
) -> std::result::Result<String, SkillError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(SkillError::MissingField {
            path: path.to_path_buf(),
            field,
        }),
    }
}

/// Split content into (frontmatter, body). The first line must be `---`.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            let body = &rest[offset + line.len()..];
            return Some((&rest[..offset], body));
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KUBEKEY_MD: &str = "---
name: kubekey
description: Deploy Kubernetes clusters with KubeKey.
license: Apache-2.0
---

# KubeKey

Run `create` to build a cluster.
";

    fn write_skill(root: &Path, dir: &str, content: &str) -> PathBuf {
        let skill_dir = root.join(dir);
        std::fs::create_dir_all(&skill_dir).unwrap();
        let path = skill_dir.join(DESCRIPTOR_FILE);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_basic() {
        let skill = parse_skill_md(KUBEKEY_MD, Path::new("/skills/kubekey/SKILL.md")).unwrap();
        assert_eq!(skill.name, "kubekey");
        assert_eq!(skill.description, "Deploy Kubernetes clusters with KubeKey.");
        assert_eq!(skill.license.as_deref(), Some("Apache-2.0"));
        assert!(skill.compatibility.is_none());
        assert_eq!(skill.base_path, PathBuf::from("/skills/kubekey"));
        assert_eq!(skill.scripts_path, PathBuf::from("/skills/kubekey/scripts"));
        assert!(skill.instructions.starts_with("# KubeKey"));
    }

    #[test]
    fn test_parse_missing_frontmatter() {
        let err = parse_skill_md("# Just markdown\n", Path::new("x/SKILL.md")).unwrap_err();
        assert!(matches!(err, SkillError::MissingFrontmatter { .. }));

        let err = parse_skill_md("---\nname: open\n", Path::new("x/SKILL.md")).unwrap_err();
        assert!(matches!(err, SkillError::MissingFrontmatter { .. }));
    }

    #[test]
    fn test_parse_missing_description() {
        let err = parse_skill_md("---\nname: lonely\n---\n", Path::new("x/SKILL.md")).unwrap_err();
        assert!(matches!(
            err,
            SkillError::MissingField {
                field: "description",
                ..
            }
        ));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err =
            parse_skill_md("---\nname: [unclosed\n---\n", Path::new("x/SKILL.md")).unwrap_err();
        assert!(matches!(err, SkillError::InvalidYaml { .. }));
    }

    #[test]
    fn test_load_all_skips_bad_descriptors() {
        let dir = TempDir::new().unwrap();
        write_skill(dir.path(), "kubekey", KUBEKEY_MD);
        write_skill(dir.path(), "broken", "no frontmatter here");
        write_skill(
            dir.path(),
            "alpha",
            "---\nname: alpha\ndescription: First skill\n---\n",
        );
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        let result = SkillLoader::new(dir.path()).load_all().unwrap();
        let names: Vec<_> = result.skills.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "kubekey"]);
        assert_eq!(result.errors.len(), 1);

        let registry = result.into_registry();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_load_all_missing_dir() {
        let dir = TempDir::new().unwrap();
        let err = SkillLoader::new(dir.path().join("nope")).load_all().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_skill_by_name() {
        let dir = TempDir::new().unwrap();
        write_skill(dir.path(), "kubekey", KUBEKEY_MD);

        let loader = SkillLoader::new(dir.path());
        assert_eq!(loader.load_skill("kubekey").unwrap().name, "kubekey");
        assert!(matches!(
            loader.load_skill("missing"),
            Err(Error::SkillNotFound(_))
        ));
    }
}
