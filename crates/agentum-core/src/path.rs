use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Resolve the sessions root directory based on priority:
/// 1. Explicit path (with tilde expansion)
/// 2. AGENTUM_PATH environment variable (with tilde expansion)
/// 3. System data directory (recommended default)
/// 4. ~/.agentum (fallback for systems without standard data directory)
pub fn resolve_sessions_root(explicit_path: Option<&str>) -> Result<PathBuf> {
    // Priority 1: Explicit path
    if let Some(path) = explicit_path {
        return Ok(expand_tilde(path).join("sessions"));
    }

    // Priority 2: AGENTUM_PATH environment variable
    if let Ok(env_path) = std::env::var("AGENTUM_PATH") {
        return Ok(expand_tilde(&env_path).join("sessions"));
    }

    // Priority 3: System data directory (recommended default)
    if let Some(data_dir) = dirs::data_dir() {
        return Ok(data_dir.join("agentum").join("sessions"));
    }

    // Priority 4: Fallback to ~/.agentum (last resort for systems without standard data directory)
    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".agentum").join("sessions"));
    }

    Err(Error::Config(
        "Could not determine sessions root: no HOME directory or system data directory found"
            .to_string(),
    ))
}

/// Expand tilde (~) in paths to the user's home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

/// Normalize a path for comparison (resolve to absolute, canonicalize if possible)
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

/// Verify that `candidate` is the root itself or a descendant of it,
/// after normalization of both sides.
pub fn ensure_descendant(root: &Path, candidate: &Path) -> Result<()> {
    let root = normalize_path(root);
    let candidate = normalize_path(candidate);
    if candidate.starts_with(&root) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "Path {} escapes sessions root {}",
            candidate.display(),
            root.display()
        )))
    }
}

/// Compute a relative path from `base` to `target` (both absolute).
/// Used for the skills symlink so session trees stay relocatable.
pub fn relative_path_from(base: &Path, target: &Path) -> PathBuf {
    let base: Vec<_> = base.components().collect();
    let target_parts: Vec<_> = target.components().collect();

    let common = base
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base.len() {
        rel.push("..");
    }
    for part in &target_parts[common..] {
        rel.push(part);
    }
    rel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = std::env::var_os("HOME") {
            let expanded = expand_tilde("~/sessions");
            assert_eq!(expanded, PathBuf::from(home).join("sessions"));
        }
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn test_ensure_descendant_accepts_child() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let child = root.join("a").join("b");
        assert!(ensure_descendant(&root, &child).is_ok());
    }

    #[test]
    fn test_ensure_descendant_rejects_sibling() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(ensure_descendant(&tmp.path().join("root"), Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_relative_path_from() {
        let rel = relative_path_from(
            Path::new("/data/sessions/20260105_123456_deadbeef/workspace"),
            Path::new("/data/skills"),
        );
        assert_eq!(rel, PathBuf::from("../../../skills"));
    }

    #[test]
    fn test_explicit_root_takes_priority() {
        let root = resolve_sessions_root(Some("/srv/agentum")).unwrap();
        assert_eq!(root, PathBuf::from("/srv/agentum/sessions"));
    }
}
