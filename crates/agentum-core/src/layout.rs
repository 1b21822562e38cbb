use crate::path::{ensure_descendant, relative_path_from};
use crate::{Error, Result};
use agentum_types::{Session, SessionId};
use std::fs;
use std::path::{Path, PathBuf};

const INFO_FILE: &str = "session_info.json";
const LOG_FILE: &str = "agent.jsonl";
const WORKSPACE_DIR: &str = "workspace";
const OUTPUT_FILE: &str = "output.yaml";
const SKILLS_LINK: &str = "skills";

/// Per-session directory tree under the sessions root:
///
/// ```text
/// <sessions_root>/<session_id>/
///   session_info.json       machine-readable session mirror
///   agent.jsonl             raw per-line child stdout
///   workspace/              agent cwd and output area
///     output.yaml           structured final output
///     skills -> ...         relative symlink to the shared skills tree
/// ```
///
/// Every operation takes a validated [`SessionId`], so the join can never
/// traverse; the descendant check stays as a second line of defense.
#[derive(Debug, Clone)]
pub struct SessionLayout {
    root: PathBuf,
}

impl SessionLayout {
    /// Open (creating if needed) the sessions root.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        // Canonicalize once so descendant checks are not fooled by
        // symlinked parents of the root itself.
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn workspace(&self, id: &SessionId) -> PathBuf {
        self.dir(id).join(WORKSPACE_DIR)
    }

    pub fn info_file(&self, id: &SessionId) -> PathBuf {
        self.dir(id).join(INFO_FILE)
    }

    pub fn log_file(&self, id: &SessionId) -> PathBuf {
        self.dir(id).join(LOG_FILE)
    }

    pub fn output_file(&self, id: &SessionId) -> PathBuf {
        self.workspace(id).join(OUTPUT_FILE)
    }

    /// Create the session directory and workspace. Side-effect #1 of the
    /// two-phase session create; on a later store failure the caller rolls
    /// back with [`SessionLayout::destroy`].
    pub fn create(&self, id: &SessionId) -> Result<PathBuf> {
        let dir = self.dir(id);
        ensure_descendant(&self.root, &dir)?;
        if dir.exists() {
            return Err(Error::Validation(format!(
                "Session directory already exists: {}",
                dir.display()
            )));
        }

        create_dir_restricted(&dir)?;
        create_dir_restricted(&dir.join(WORKSPACE_DIR))?;
        Ok(dir)
    }

    /// Write the session metadata mirror consumed by the agent.
    pub fn write_session_info(&self, session: &Session) -> Result<()> {
        let path = self.info_file(&session.id);
        ensure_descendant(&self.root, &path)?;
        let json = serde_json::to_string_pretty(session)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Install the relative read-only symlink to the shared skills tree
    /// inside the workspace. Replaces a stale link, never a real file.
    pub fn install_skills_symlink(&self, id: &SessionId, skills_root: &Path) -> Result<()> {
        let workspace = self.workspace(id);
        let link = workspace.join(SKILLS_LINK);
        ensure_descendant(&self.root, &link)?;

        if let Ok(meta) = link.symlink_metadata() {
            if !meta.file_type().is_symlink() {
                return Err(Error::Validation(format!(
                    "Refusing to replace non-symlink at {}",
                    link.display()
                )));
            }
            fs::remove_file(&link)?;
        }

        let target = relative_path_from(&workspace, skills_root);
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, &link)?;
        #[cfg(not(unix))]
        std::os::windows::fs::symlink_dir(&target, &link)?;
        Ok(())
    }

    /// Parse `workspace/output.yaml` into a JSON value for the result
    /// endpoint. A missing file is a validation error, not an IO error,
    /// because the agent simply produced no structured output.
    pub fn parse_output(&self, id: &SessionId) -> Result<serde_json::Value> {
        let path = self.output_file(id);
        if !path.exists() {
            return Err(Error::Validation(format!(
                "No output document for session {}",
                id
            )));
        }
        let text = fs::read_to_string(path)?;
        let value: serde_json::Value = serde_yaml::from_str(&text)?;
        Ok(value)
    }

    /// Resolve a workspace-relative file for streaming. Rejects absolute
    /// paths and any `..` component before touching the filesystem, then
    /// re-verifies containment on the resolved path (symlink escapes).
    pub fn resolve_workspace_file(&self, id: &SessionId, relative: &str) -> Result<PathBuf> {
        let requested = Path::new(relative);
        if requested.is_absolute() {
            return Err(Error::Validation(format!(
                "Absolute paths are not allowed: {}",
                relative
            )));
        }
        if requested
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::Validation(format!(
                "Parent traversal is not allowed: {}",
                relative
            )));
        }

        let workspace = self.workspace(id);
        let candidate = workspace.join(requested);
        // Canonicalize distinguishes a missing file (Io) from an escape
        // attempt (Validation), which the API maps to 404 vs 400.
        let resolved = candidate.canonicalize().map_err(Error::Io)?;
        ensure_descendant(&workspace, &resolved)?;
        Ok(resolved)
    }

    /// Remove the whole session directory. Used only by the two-phase
    /// creation rollback.
    pub fn destroy(&self, id: &SessionId) -> Result<()> {
        let dir = self.dir(id);
        ensure_descendant(&self.root, &dir)?;
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn create_dir_restricted(path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().mode(0o750).create(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_dir_restricted(path: &Path) -> Result<()> {
    fs::DirBuilder::new().create(path)?;
    Ok(())
}
