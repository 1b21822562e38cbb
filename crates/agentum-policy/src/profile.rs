use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tool-name categories from `permissions.yaml`.
///
/// Categories are consulted before the pattern lists: `disabled` always
/// denies, `pre_approved` always allows, `permission_checked` routes the
/// call through the decision function, `enabled` is what the agent is told
/// exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCategories {
    #[serde(default)]
    pub enabled: Vec<String>,

    #[serde(default)]
    pub disabled: Vec<String>,

    #[serde(default)]
    pub permission_checked: Vec<String>,

    #[serde(default)]
    pub pre_approved: Vec<String>,
}

/// Declarative permission rule document.
///
/// `allow` and `deny` are ordered lists, scanned in declared order; deny is
/// always consulted first. Kept as explicit `Vec`s so ordering can never
/// silently degrade into map iteration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionProfile {
    #[serde(default)]
    pub tools: ToolCategories,

    #[serde(default)]
    pub allow: Vec<String>,

    #[serde(default)]
    pub deny: Vec<String>,

    /// Denials of the same tool-call fingerprint before the next denial
    /// carries the interrupt flag
    #[serde(default = "default_denial_interrupt_threshold")]
    pub denial_interrupt_threshold: u32,
}

impl Default for PermissionProfile {
    fn default() -> Self {
        Self {
            tools: ToolCategories::default(),
            allow: Vec::new(),
            deny: Vec::new(),
            denial_interrupt_threshold: default_denial_interrupt_threshold(),
        }
    }
}

fn default_denial_interrupt_threshold() -> u32 {
    3
}

impl PermissionProfile {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let profile: PermissionProfile = serde_yaml::from_str(&content)?;
        Ok(profile)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let tmp = tempfile::TempDir::new().unwrap();
        let profile = PermissionProfile::load_from(&tmp.path().join("missing.yaml")).unwrap();
        assert!(profile.allow.is_empty());
        assert!(profile.deny.is_empty());
        assert_eq!(profile.denial_interrupt_threshold, 3);
    }

    #[test]
    fn test_load_document() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("permissions.yaml");
        std::fs::write(
            &path,
            r#"
tools:
  enabled: [Bash, Read, Write]
  disabled: [WebFetch]
  permission_checked: [Bash]
  pre_approved: [Read]
allow:
  - "Bash(*)"
  - "Write({workspace}/**)"
deny:
  - "Bash(rm *)"
"#,
        )
        .unwrap();

        let profile = PermissionProfile::load_from(&path).unwrap();
        assert_eq!(profile.tools.enabled.len(), 3);
        assert_eq!(profile.tools.disabled, vec!["WebFetch"]);
        assert_eq!(profile.allow[0], "Bash(*)");
        assert_eq!(profile.deny, vec!["Bash(rm *)"]);
    }

    #[test]
    fn test_save_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("permissions.yaml");

        let mut profile = PermissionProfile::default();
        profile.allow.push("Read(*)".to_string());
        profile.save_to(&path).unwrap();

        let loaded = PermissionProfile::load_from(&path).unwrap();
        assert_eq!(loaded.allow, vec!["Read(*)"]);
    }
}
