//! TestWorld pattern for declarative integration test setup.
//!
//! Bundles an isolated temp directory with a fresh store, a session
//! layout, and a place to drop fake agent scripts, so a test reads as
//! setup -> act -> assert without path plumbing.

use agentum_core::SessionLayout;
use agentum_store::Database;
use agentum_types::{Session, SessionId, User};
use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestWorld {
    temp_dir: TempDir,
    pub layout: SessionLayout,
    pub db_path: PathBuf,
}

impl TestWorld {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let layout = SessionLayout::new(temp_dir.path().join("sessions"))?;
        let db_path = temp_dir.path().join("agentum.db");
        // Initialize the schema once so later opens are cheap
        Database::open(&db_path)?;

        Ok(Self {
            temp_dir,
            layout,
            db_path,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory for fake agent scripts.
    pub fn bin_dir(&self) -> PathBuf {
        let dir = self.temp_dir.path().join("bin");
        std::fs::create_dir_all(&dir).expect("create bin dir");
        dir
    }

    pub fn open_db(&self) -> Result<Database> {
        Ok(Database::open(&self.db_path)?)
    }

    /// Create a user plus a pending session with its directory, the way
    /// the lifecycle manager would.
    pub fn seed_session(&self, task: &str) -> Result<(User, Session)> {
        let db = self.open_db()?;
        let user = db.get_or_create_user(None)?;
        let id = SessionId::generate();
        self.layout.create(&id)?;
        let session = db.create_session(
            &id,
            &user.id,
            task,
            "test-model",
            &self.layout.workspace(&id).display().to_string(),
        )?;
        Ok((user, session))
    }
}
