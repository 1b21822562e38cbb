use crate::registry::Registry;
use crate::{Error, Result, SharedStore, with_store};
use agentum_core::SessionLayout;
use agentum_store::SessionPatch;
use agentum_types::{Session, SessionId, SessionStatus};

/// Block prepended to the task text when continuing a cancelled run, so
/// the agent knows to pick up partially finished work in the workspace.
const RESUME_CONTEXT: &str = "[Resume context] The previous run of this session was cancelled \
before completion. Review the workspace state and continue the task from where it left off.";

/// Creating, resuming, cancelling, and reconciling sessions.
///
/// The create path is two-phase: the session directory is made first, the
/// row second, and a row failure destroys the directory again, so a
/// session row exists iff its directory exists.
pub struct SessionLifecycle {
    store: SharedStore,
    layout: SessionLayout,
}

impl SessionLifecycle {
    pub fn new(store: SharedStore, layout: SessionLayout) -> Self {
        Self { store, layout }
    }

    pub async fn create(&self, user_id: &str, task: &str, model: &str) -> Result<Session> {
        if task.trim().is_empty() {
            return Err(Error::Validation("Task must not be empty".to_string()));
        }

        let id = SessionId::generate();
        let layout = self.layout.clone();
        let store = self.store.clone();
        let user_id = user_id.to_string();
        let task = task.to_string();
        let model = model.to_string();

        tokio::task::spawn_blocking(move || {
            let working_dir = layout.workspace(&id).display().to_string();
            layout.create(&id).map_err(Error::from)?;

            let created = {
                let db = store.lock().expect("store mutex poisoned");
                db.create_session(&id, &user_id, &task, &model, &working_dir)
            };
            match created {
                Ok(session) => Ok(session),
                Err(err) => {
                    // Roll the directory back so neither side survives
                    if let Err(cleanup) = layout.destroy(&id) {
                        tracing::error!(
                            session_id = %id,
                            error = %cleanup,
                            "Rollback of session directory failed"
                        );
                    }
                    Err(Error::Create(err.to_string()))
                }
            }
        })
        .await
        .map_err(|e| Error::Internal(format!("Create task aborted: {}", e)))?
    }

    /// Validate a continuation request and produce the effective task
    /// text. Requires the session to be owned by the caller and not
    /// currently running; the stored `resume_id` rides along in the
    /// returned session.
    pub async fn resume(
        &self,
        id: &SessionId,
        user_id: &str,
        new_task: &str,
    ) -> Result<(Session, String)> {
        if new_task.trim().is_empty() {
            return Err(Error::Validation("Task must not be empty".to_string()));
        }

        let session = self.get_owned(id, user_id).await?;
        match session.status {
            SessionStatus::Running => Err(Error::Transition {
                from: session.status.as_str().to_string(),
                to: SessionStatus::Running.as_str().to_string(),
            }),
            SessionStatus::Pending => Err(Error::NotResumable(
                "Session has not finished its first run".to_string(),
            )),
            _ => {
                let effective = if session.status == SessionStatus::Cancelled {
                    format!("{}\n\n{}", RESUME_CONTEXT, new_task)
                } else {
                    new_task.to_string()
                };
                Ok((session, effective))
            }
        }
    }

    /// Request cancellation. Non-blocking and idempotent: flags the row,
    /// forwards to the live supervisor when one exists, and returns. The
    /// status flip to `cancelled` happens when the supervisor reaps its
    /// child; a `pending` session with no supervisor flips immediately.
    pub async fn request_cancel(
        &self,
        id: &SessionId,
        user_id: &str,
        registry: &Registry,
    ) -> Result<()> {
        let session = self.get_owned(id, user_id).await?;

        match session.status {
            SessionStatus::Running => {
                let sid = id.clone();
                let patch = SessionPatch {
                    cancel_requested: Some(true),
                    ..SessionPatch::default()
                };
                with_store(&self.store, move |db| db.update_session(&sid, &patch)).await?;

                if let Some(handle) = registry.cancel_handle(id) {
                    handle.request();
                }
                Ok(())
            }
            SessionStatus::Pending => {
                self.transition(id, SessionStatus::Cancelled).await?;
                Ok(())
            }
            SessionStatus::Cancelled => Ok(()), // idempotent
            terminal => Err(Error::Transition {
                from: terminal.as_str().to_string(),
                to: SessionStatus::Cancelled.as_str().to_string(),
            }),
        }
    }

    /// Validated status transition; stamps `completed_at` and
    /// `duration_ms` when landing in a terminal state. The session's row
    /// is only ever advanced by its own supervisor, so the read-validate-
    /// update here is not racing another writer.
    pub async fn transition(&self, id: &SessionId, to: SessionStatus) -> Result<Session> {
        let sid = id.clone();
        let session = with_store(&self.store, move |db| db.get_session_any(&sid))
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {}", id)))?;

        session.status.validate_transition(to)?;

        let now = chrono::Utc::now();
        let patch = SessionPatch {
            status: Some(to),
            completed_at: to.is_terminal().then_some(now),
            duration_ms: to
                .is_terminal()
                .then(|| (now - session.created_at).num_milliseconds().max(0) as u64),
            ..SessionPatch::default()
        };
        let sid = id.clone();
        with_store(&self.store, move |db| db.update_session(&sid, &patch)).await
    }

    /// Mark a session row as running again for a continuation run. This
    /// deliberately bypasses `validate_transition`: monotonic transitions
    /// are a per-run invariant, and a resume starts a new run on the same
    /// session identity.
    pub async fn begin_run(&self, id: &SessionId) -> Result<Session> {
        let sid = id.clone();
        with_store(&self.store, move |db| {
            let patch = SessionPatch {
                status: Some(SessionStatus::Running),
                cancel_requested: Some(false),
                ..SessionPatch::default()
            };
            db.update_session(&sid, &patch)
        })
        .await
    }

    /// Startup reconciliation: flip orphaned `running` rows to `failed`.
    pub async fn cleanup_stale_sessions(&self) -> Result<Vec<String>> {
        let stale = with_store(&self.store, |db| db.mark_stale_running_failed()).await?;
        if !stale.is_empty() {
            tracing::warn!(count = stale.len(), "Reconciled stale running sessions");
        }
        Ok(stale)
    }

    pub async fn get_owned(&self, id: &SessionId, user_id: &str) -> Result<Session> {
        let sid = id.clone();
        let uid = user_id.to_string();
        with_store(&self.store, move |db| db.get_session(&sid, &uid))
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {}", id)))
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }
}
