//! Registry of loaded skills.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::SkillError;
use crate::skill::Skill;

/// Concurrency-safe mapping from skill name to descriptor.
///
/// Populated once at startup and read concurrently afterwards. Registration
/// takes a write lock for the rare insert; lookups share a read lock and hand
/// out `Arc` clones so no lock is held by callers.
#[derive(Default)]
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Arc<Skill>>>,
}

impl SkillRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from descriptors, keeping the first of any duplicates.
    pub fn from_skills(skills: impl IntoIterator<Item = Skill>) -> Result<Self, SkillError> {
        let registry = Self::new();
        for skill in skills {
            registry.register(skill)?;
        }
        Ok(registry)
    }

    /// Register a skill.
    ///
    /// Returns `Ok(false)` when a skill with the same name is already present;
    /// the existing entry is kept.
    pub fn register(&self, skill: Skill) -> Result<bool, SkillError> {
        validate_name(&skill.name)?;

        let mut skills = self.skills.write();
        if skills.contains_key(&skill.name) {
            tracing::warn!(skill = %skill.name, "Duplicate skill name, keeping first");
            return Ok(false);
        }
        tracing::debug!(skill = %skill.name, path = %skill.base_path.display(), "Registered skill");
        skills.insert(skill.name.clone(), Arc::new(skill));
        Ok(true)
    }

    /// Get a skill by name.
    pub fn get(&self, name: &str) -> Option<Arc<Skill>> {
        self.skills.read().get(name).cloned()
    }

    /// Check if a skill exists.
    pub fn contains(&self, name: &str) -> bool {
        self.skills.read().contains_key(name)
    }

    /// List all skill names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// List all skills, sorted by name.
    pub fn list(&self) -> Vec<Arc<Skill>> {
        let mut skills: Vec<Arc<Skill>> = self.skills.read().values().cloned().collect();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }

    /// Keep only the named skills, returning the names that were not found.
    pub fn retain_only(&self, names: &[String]) -> Vec<String> {
        let mut skills = self.skills.write();
        let missing = names
            .iter()
            .filter(|n| !skills.contains_key(n.as_str()))
            .cloned()
            .collect();
        skills.retain(|name, _| names.contains(name));
        missing
    }

    /// Get the number of registered skills.
    pub fn len(&self) -> usize {
        self.skills.read().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.skills.read().is_empty()
    }
}

impl std::fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillRegistry")
            .field("skills", &self.names())
            .finish()
    }
}

/// Check that a name is usable as a registry key and in resource URIs.
pub fn validate_name(name: &str) -> Result<(), SkillError> {
    let reason = if name.trim().is_empty() {
        "name cannot be empty"
    } else if name.contains('/') {
        "name cannot contain '/'"
    } else {
        return Ok(());
    };
    Err(SkillError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(name: &str) -> Skill {
        Skill::new(name, format!("{} skill", name), format!("/skills/{}", name))
    }

    #[test]
    fn test_registry_register_and_get() {
        let registry = SkillRegistry::new();
        assert!(registry.register(skill("kubekey")).unwrap());

        assert!(registry.contains("kubekey"));
        assert_eq!(registry.get("kubekey").unwrap().description, "kubekey skill");
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_registry_duplicate_keeps_first() {
        let registry = SkillRegistry::new();
        registry.register(skill("dup")).unwrap();

        let second = Skill::new("dup", "second", "/elsewhere");
        assert!(!registry.register(second).unwrap());
        assert_eq!(registry.get("dup").unwrap().description, "dup skill");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_rejects_bad_names() {
        let registry = SkillRegistry::new();
        assert!(matches!(
            registry.register(skill("a/b")),
            Err(SkillError::InvalidName { .. })
        ));
        assert!(registry.register(skill("")).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_sorted_listing() {
        let registry = SkillRegistry::from_skills(vec![skill("zeta"), skill("alpha")]).unwrap();
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
        let listed: Vec<_> = registry.list().iter().map(|s| s.name.clone()).collect();
        assert_eq!(listed, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_registry_retain_only() {
        let registry =
            SkillRegistry::from_skills(vec![skill("a"), skill("b"), skill("c")]).unwrap();
        let missing = registry.retain_only(&["a".to_string(), "x".to_string()]);
        assert_eq!(missing, vec!["x"]);
        assert_eq!(registry.names(), vec!["a"]);
    }

    #[test]
    fn test_registry_concurrent_readers() {
        let registry = Arc::new(SkillRegistry::from_skills(vec![skill("shared")]).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get("shared").is_some())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
