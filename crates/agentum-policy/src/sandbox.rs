use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Fixed in-sandbox mount targets. The agent always sees its session at the
// same path regardless of where the host keeps it.
pub const SANDBOX_SESSION_DIR: &str = "/session";
pub const SANDBOX_WORKSPACE_DIR: &str = "/session/workspace";
pub const SANDBOX_SKILLS_DIR: &str = "/skills";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    Ro,
    Rw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMount {
    pub source: PathBuf,
    pub target: PathBuf,
    pub mode: MountMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxEnvironment {
    #[serde(default = "default_true")]
    pub clear_env: bool,

    #[serde(default = "default_home")]
    pub home: String,

    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for SandboxEnvironment {
    fn default() -> Self {
        Self {
            clear_env: true,
            home: default_home(),
            path: default_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_home() -> String {
    SANDBOX_SESSION_DIR.to_string()
}

fn default_path() -> String {
    "/usr/local/bin:/usr/bin:/bin".to_string()
}

/// Security configuration document (`security.yaml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bwrap_path")]
    pub bwrap_path: PathBuf,

    #[serde(default = "default_true")]
    pub unshare_pid: bool,

    #[serde(default = "default_true")]
    pub unshare_ipc: bool,

    #[serde(default = "default_true")]
    pub unshare_uts: bool,

    /// Size of the ephemeral /tmp tmpfs in bytes
    #[serde(default = "default_tmpfs_size")]
    pub tmpfs_size: u64,

    #[serde(default = "default_system_mounts")]
    pub system_mounts: Vec<SystemMount>,

    #[serde(default)]
    pub environment: SandboxEnvironment,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bwrap_path: default_bwrap_path(),
            unshare_pid: true,
            unshare_ipc: true,
            unshare_uts: true,
            tmpfs_size: default_tmpfs_size(),
            system_mounts: default_system_mounts(),
            environment: SandboxEnvironment::default(),
        }
    }
}

fn default_bwrap_path() -> PathBuf {
    PathBuf::from("/usr/bin/bwrap")
}

fn default_tmpfs_size() -> u64 {
    64 * 1024 * 1024
}

fn default_system_mounts() -> Vec<SystemMount> {
    ["/usr", "/bin", "/lib", "/lib64", "/etc/ssl"]
        .into_iter()
        .map(|p| SystemMount {
            source: PathBuf::from(p),
            target: PathBuf::from(p),
            mode: MountMode::Ro,
        })
        .collect()
}

impl SandboxConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: SandboxConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}

/// Builds the isolation command line wrapping the agent process.
///
/// Wrapping is driven entirely by the security document, not per call.
/// When sandboxing is enabled and the isolation binary is missing the
/// launcher fails closed: the session fails rather than degrade to a
/// direct exec.
#[derive(Debug, Clone)]
pub struct SandboxLauncher {
    config: SandboxConfig,
}

impl SandboxLauncher {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Wrap `argv` for execution with the session directory bound
    /// read-write and the skills tree read-only. Returns `argv` unchanged
    /// when sandboxing is disabled.
    pub fn wrap(
        &self,
        argv: Vec<String>,
        session_dir: &Path,
        skills_root: Option<&Path>,
    ) -> Result<Vec<String>> {
        if !self.config.enabled {
            return Ok(argv);
        }
        if !self.config.bwrap_path.is_file() {
            return Err(Error::SandboxUnavailable(format!(
                "Isolation binary not found at {}",
                self.config.bwrap_path.display()
            )));
        }

        let mut cmd = vec![self.config.bwrap_path.display().to_string()];

        if self.config.unshare_pid {
            cmd.push("--unshare-pid".to_string());
        }
        if self.config.unshare_ipc {
            cmd.push("--unshare-ipc".to_string());
        }
        if self.config.unshare_uts {
            cmd.push("--unshare-uts".to_string());
        }

        // TTY isolation and lifetime coupling: the child must not outlive
        // the supervisor and must not reach the controlling terminal.
        cmd.push("--die-with-parent".to_string());
        cmd.push("--new-session".to_string());

        if self.config.environment.clear_env {
            cmd.push("--clearenv".to_string());
        }
        for (key, value) in [
            ("HOME", self.config.environment.home.as_str()),
            ("PATH", self.config.environment.path.as_str()),
            ("TMPDIR", "/tmp"),
        ] {
            cmd.push("--setenv".to_string());
            cmd.push(key.to_string());
            cmd.push(value.to_string());
        }

        for mount in &self.config.system_mounts {
            if !mount.source.exists() {
                continue;
            }
            let flag = match mount.mode {
                MountMode::Ro => "--ro-bind",
                MountMode::Rw => "--bind",
            };
            cmd.push(flag.to_string());
            cmd.push(mount.source.display().to_string());
            cmd.push(mount.target.display().to_string());
        }

        cmd.push("--bind".to_string());
        cmd.push(session_dir.display().to_string());
        cmd.push(SANDBOX_SESSION_DIR.to_string());

        if let Some(skills) = skills_root {
            cmd.push("--ro-bind".to_string());
            cmd.push(skills.display().to_string());
            cmd.push(SANDBOX_SKILLS_DIR.to_string());
        }

        // --size applies to the next --tmpfs
        cmd.push("--size".to_string());
        cmd.push(self.config.tmpfs_size.to_string());
        cmd.push("--tmpfs".to_string());
        cmd.push("/tmp".to_string());

        cmd.push("--chdir".to_string());
        cmd.push(SANDBOX_WORKSPACE_DIR.to_string());

        cmd.push("--".to_string());
        cmd.extend(argv);

        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_argv() -> Vec<String> {
        vec!["agentum-agent".to_string(), "--task".to_string(), "hi".to_string()]
    }

    #[test]
    fn test_disabled_passes_through() {
        let launcher = SandboxLauncher::new(SandboxConfig {
            enabled: false,
            ..SandboxConfig::default()
        });

        let wrapped = launcher
            .wrap(agent_argv(), Path::new("/tmp/s1"), None)
            .unwrap();
        assert_eq!(wrapped, agent_argv());
    }

    #[test]
    fn test_missing_binary_fails_closed() {
        let launcher = SandboxLauncher::new(SandboxConfig {
            enabled: true,
            bwrap_path: PathBuf::from("/nonexistent/bwrap"),
            ..SandboxConfig::default()
        });

        let err = launcher
            .wrap(agent_argv(), Path::new("/tmp/s1"), None)
            .unwrap_err();
        assert!(matches!(err, Error::SandboxUnavailable(_)));
    }

    #[test]
    fn test_wrap_shape() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fake_bwrap = tmp.path().join("bwrap");
        std::fs::write(&fake_bwrap, "#!/bin/sh\n").unwrap();

        let launcher = SandboxLauncher::new(SandboxConfig {
            enabled: true,
            bwrap_path: fake_bwrap.clone(),
            system_mounts: vec![],
            ..SandboxConfig::default()
        });

        let skills = tmp.path().join("skills");
        std::fs::create_dir_all(&skills).unwrap();
        let wrapped = launcher
            .wrap(agent_argv(), Path::new("/data/sessions/s1"), Some(&skills))
            .unwrap();

        assert_eq!(wrapped[0], fake_bwrap.display().to_string());
        assert!(wrapped.contains(&"--unshare-pid".to_string()));
        assert!(wrapped.contains(&"--die-with-parent".to_string()));
        assert!(wrapped.contains(&"--new-session".to_string()));
        assert!(wrapped.contains(&"--clearenv".to_string()));

        // Session dir is bound read-write at the fixed target
        let bind_at = wrapped.iter().position(|a| a == "--bind").unwrap();
        assert_eq!(wrapped[bind_at + 1], "/data/sessions/s1");
        assert_eq!(wrapped[bind_at + 2], SANDBOX_SESSION_DIR);

        // Skills are read-only
        let ro = wrapped.iter().position(|a| a == "--ro-bind").unwrap();
        assert_eq!(wrapped[ro + 2], SANDBOX_SKILLS_DIR);

        // Agent argv comes after the separator
        let sep = wrapped.iter().position(|a| a == "--").unwrap();
        assert_eq!(&wrapped[sep + 1..], agent_argv().as_slice());
    }

    #[test]
    fn test_wrap_skips_missing_system_mounts() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fake_bwrap = tmp.path().join("bwrap");
        std::fs::write(&fake_bwrap, "#!/bin/sh\n").unwrap();

        let launcher = SandboxLauncher::new(SandboxConfig {
            enabled: true,
            bwrap_path: fake_bwrap,
            system_mounts: vec![SystemMount {
                source: PathBuf::from("/definitely/not/here"),
                target: PathBuf::from("/definitely/not/here"),
                mode: MountMode::Ro,
            }],
            ..SandboxConfig::default()
        });

        let wrapped = launcher
            .wrap(agent_argv(), Path::new("/data/sessions/s1"), None)
            .unwrap();
        assert!(!wrapped.contains(&"/definitely/not/here".to_string()));
    }

    #[test]
    fn test_config_defaults() {
        let config = SandboxConfig::default();
        assert!(config.enabled);
        assert!(config.environment.clear_env);
        assert_eq!(config.environment.home, SANDBOX_SESSION_DIR);
        assert!(config.tmpfs_size > 0);
    }

    #[test]
    fn test_config_load_from_yaml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("security.yaml");
        std::fs::write(
            &path,
            r#"
enabled: true
bwrap_path: /opt/bwrap
unshare_pid: true
unshare_ipc: false
unshare_uts: true
tmpfs_size: 1048576
system_mounts:
  - source: /usr
    target: /usr
    mode: ro
environment:
  clear_env: true
  home: /session
  path: /usr/bin:/bin
"#,
        )
        .unwrap();

        let config = SandboxConfig::load_from(&path).unwrap();
        assert_eq!(config.bwrap_path, PathBuf::from("/opt/bwrap"));
        assert!(!config.unshare_ipc);
        assert_eq!(config.tmpfs_size, 1_048_576);
        assert_eq!(config.system_mounts.len(), 1);
        assert_eq!(config.system_mounts[0].mode, MountMode::Ro);
    }
}
