mod engine;
mod pattern;
mod profile;
mod sandbox;

pub mod error;

pub use engine::{Decision, PermissionEngine};
pub use error::{Error, Result};
pub use pattern::ToolCall;
pub use profile::{PermissionProfile, ToolCategories};
pub use sandbox::{
    MountMode, SANDBOX_SESSION_DIR, SANDBOX_SKILLS_DIR, SANDBOX_WORKSPACE_DIR, SandboxConfig,
    SandboxEnvironment, SandboxLauncher, SystemMount,
};
