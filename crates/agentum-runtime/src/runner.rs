use crate::config::ServiceConfig;
use crate::hub::EventHub;
use crate::lifecycle::SessionLifecycle;
use crate::registry::Registry;
use crate::supervisor::{ExecutionParams, Supervisor};
use crate::writer::run_writer;
use crate::{Error, Result, SharedStore};
use agentum_core::SessionLayout;
use agentum_policy::{
    PermissionEngine, PermissionProfile, SANDBOX_WORKSPACE_DIR, SandboxConfig, SandboxLauncher,
};
use agentum_types::{Session, SessionId, SessionStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Injected service context: configuration, both stores, policy documents,
/// and the registry of live runs. Everything that used to be a global in
/// the dynamic-language ancestor travels through this struct.
pub struct Runtime {
    pub config: ServiceConfig,
    pub store: SharedStore,
    pub layout: SessionLayout,
    pub registry: Registry,
    pub profile: PermissionProfile,
    pub sandbox: SandboxConfig,
    pub lifecycle: SessionLifecycle,
}

impl Runtime {
    pub fn new(
        config: ServiceConfig,
        store: SharedStore,
        layout: SessionLayout,
        profile: PermissionProfile,
        sandbox: SandboxConfig,
    ) -> Arc<Self> {
        let lifecycle = SessionLifecycle::new(store.clone(), layout.clone());
        Arc::new(Self {
            config,
            store,
            layout,
            registry: Registry::new(),
            profile,
            sandbox,
            lifecycle,
        })
    }
}

/// Per-request overrides for a run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub task: String,
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

/// Single entry point used by the HTTP surface and any CLI driver:
/// resolve config and overrides, open or resume the session, build the
/// permission engine and sandbox launcher, wire the hub and writer, and
/// hand off to a supervisor task.
pub struct TaskRunner {
    runtime: Arc<Runtime>,
}

impl TaskRunner {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Create a session and start its first run.
    pub async fn start(&self, user_id: &str, request: RunRequest) -> Result<Session> {
        self.check_capacity()?;

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.runtime.config.agent.default_model.clone());
        let session = self
            .runtime
            .lifecycle
            .create(user_id, &request.task, &model)
            .await?;

        let session = self
            .runtime
            .lifecycle
            .transition(&session.id, SessionStatus::Running)
            .await?;

        let id = session.id.clone();
        match self.launch(session, request.task.clone(), None, &request).await {
            Ok(session) => Ok(session),
            Err(err) => {
                self.fail_unlaunched(&id).await;
                Err(err)
            }
        }
    }

    /// Continue or resume an existing session with a new task.
    pub async fn resume(
        &self,
        id: &SessionId,
        user_id: &str,
        request: RunRequest,
    ) -> Result<Session> {
        self.check_capacity()?;

        let (session, effective_task) = self
            .runtime
            .lifecycle
            .resume(id, user_id, &request.task)
            .await?;
        let resume_id = session.resume_id.clone();

        let session = self.runtime.lifecycle.begin_run(id).await?;
        match self.launch(session, effective_task, resume_id, &request).await {
            Ok(session) => Ok(session),
            Err(err) => {
                self.fail_unlaunched(id).await;
                Err(err)
            }
        }
    }

    /// Forward a cancel request; returns immediately.
    pub async fn cancel(&self, id: &SessionId, user_id: &str) -> Result<()> {
        self.runtime
            .lifecycle
            .request_cancel(id, user_id, &self.runtime.registry)
            .await
    }

    /// A run that never reached its supervisor has nobody left to move
    /// the row out of `running`; do it here so the session is not stuck
    /// until the next restart reconciliation.
    async fn fail_unlaunched(&self, id: &SessionId) {
        if let Err(err) = self
            .runtime
            .lifecycle
            .transition(id, SessionStatus::Failed)
            .await
        {
            tracing::error!(session_id = %id, error = %err, "Failed to mark unlaunched session");
        }
    }

    fn check_capacity(&self) -> Result<()> {
        let limit = self.runtime.config.limits.max_concurrent_sessions;
        if self.runtime.registry.running_count() >= limit {
            return Err(Error::Capacity(limit));
        }
        Ok(())
    }

    async fn launch(
        &self,
        session: Session,
        effective_task: String,
        resume_id: Option<String>,
        request: &RunRequest,
    ) -> Result<Session> {
        let runtime = &self.runtime;
        let config = &runtime.config;
        let id = session.id.clone();

        // Refresh the metadata mirror the agent reads at startup
        let layout = runtime.layout.clone();
        let info_session = session.clone();
        tokio::task::spawn_blocking(move || layout.write_session_info(&info_session))
            .await
            .map_err(|e| Error::Internal(format!("Info write aborted: {}", e)))??;

        if let Some(skills) = &config.skills_root {
            let layout = runtime.layout.clone();
            let sid = id.clone();
            let skills = skills.clone();
            let link = tokio::task::spawn_blocking(move || {
                layout.install_skills_symlink(&sid, &skills)
            })
            .await
            .map_err(|e| Error::Internal(format!("Skills link aborted: {}", e)))?;
            if let Err(err) = link {
                tracing::warn!(session_id = %id, error = %err, "Skills symlink not installed");
            }
        }

        let launcher = SandboxLauncher::new(runtime.sandbox.clone());

        // The engine matches against the paths the agent itself sees
        let visible_workspace = if launcher.enabled() {
            PathBuf::from(SANDBOX_WORKSPACE_DIR)
        } else {
            runtime.layout.workspace(&id)
        };
        let engine = Arc::new(PermissionEngine::new(
            runtime.profile.clone(),
            &visible_workspace.display().to_string(),
        ));

        let params = ExecutionParams {
            session_id: id.clone(),
            task: effective_task,
            model: session.model.clone(),
            max_turns: request.max_turns.unwrap_or(config.agent.max_turns),
            timeout: Duration::from_secs(
                request.timeout_seconds.unwrap_or(config.agent.timeout_seconds),
            ),
            grace_period: Duration::from_secs(config.agent.grace_period_seconds),
            resume_id,
            agent_program: config.agent.program.clone(),
            agent_args: config.agent.args.clone(),
            max_line_bytes: config.limits.max_line_bytes,
            skills_root: config.skills_root.clone(),
        };

        // A continuation run keeps numbering from where the last one
        // stopped; the per-session sequence is monotonic across runs.
        let sid = id.clone();
        let last_sequence =
            crate::with_store(&runtime.store, move |db| db.last_sequence(&sid)).await?;

        let (hub, persist_rx) =
            EventHub::new(id.clone(), config.limits.subscriber_buffer, last_sequence);
        let supervisor = Supervisor::new(
            params,
            runtime.store.clone(),
            runtime.layout.clone(),
            hub.clone(),
            engine,
            launcher,
        );
        let cancel = supervisor.cancel_handle();

        runtime.registry.insert(&id, hub.clone(), cancel.clone());

        let writer = tokio::spawn(run_writer(
            id.clone(),
            persist_rx,
            runtime.store.clone(),
            hub.clone(),
            cancel,
        ));

        let registry_runtime = runtime.clone();
        let run_id = id.clone();
        tokio::spawn(async move {
            supervisor.run(writer).await;
            registry_runtime.registry.remove(&run_id);
        });

        // Return the running snapshot
        let sid = id.clone();
        let session = crate::with_store(&runtime.store, move |db| db.get_session_any(&sid))
            .await?
            .ok_or_else(|| Error::Internal(format!("Session {} vanished after launch", id)))?;
        Ok(session)
    }
}
