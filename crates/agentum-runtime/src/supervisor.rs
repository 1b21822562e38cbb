use crate::hub::EventHub;
use crate::{Error, Result, SharedStore, with_store};
use agentum_core::SessionLayout;
use agentum_policy::{
    PermissionEngine, SANDBOX_SESSION_DIR, SandboxLauncher,
};
use agentum_store::SessionPatch;
use agentum_types::{
    CancelledPayload, ErrorPayload, EventPayload, SessionId, SessionStatus,
};
use futures::StreamExt;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Resolved inputs for one supervisor run
#[derive(Debug, Clone)]
pub struct ExecutionParams {
    pub session_id: SessionId,
    pub task: String,
    pub model: String,
    pub max_turns: u32,
    pub timeout: Duration,
    pub grace_period: Duration,
    pub resume_id: Option<String>,
    pub agent_program: String,
    pub agent_args: Vec<String>,
    pub max_line_bytes: usize,
    pub skills_root: Option<PathBuf>,
}

/// Cancellation intent shared between the lifecycle manager, the writer,
/// and the supervisor that owns the child.
///
/// `request` is non-blocking and idempotent: it sets the flag and, when a
/// child is armed, delivers SIGTERM. The supervisor observes the exit and
/// emits the `cancelled` event afterwards.
#[derive(Clone, Default)]
pub struct CancelHandle {
    requested: Arc<AtomicBool>,
    pid: Arc<Mutex<Option<u32>>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
        let pid = *self.pid.lock().expect("cancel pid poisoned");
        if let Some(pid) = pid {
            tracing::info!(pid, "Sending SIGTERM to agent");
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    fn arm(&self, pid: u32) {
        *self.pid.lock().expect("cancel pid poisoned") = Some(pid);
        // A cancel that raced the spawn still lands
        if self.is_requested() {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }

    fn disarm(&self) {
        *self.pid.lock().expect("cancel pid poisoned") = None;
    }
}

/// How the child run ended, before terminal-event emission
enum Outcome {
    /// Child emitted `agent_complete`
    Completed,
    /// A terminal `error` event is already on the stream (child error
    /// record or persistence failure); only the status flip remains
    FailedSignalled,
    /// Caller cancelled; `resumable` when the agent handed back a resume id
    Cancelled { resumable: bool },
    /// Wall-clock timeout expired
    TimedOut,
    /// Child died without completing
    Crashed { detail: String },
    /// Sandbox wrapping failed before any spawn
    SandboxUnavailable { detail: String },
    /// Spawn itself failed
    SpawnFailed { detail: String },
}

/// Per-session task owning the agent child process.
///
/// Spawns exactly one child per run, adapts its stdout JSONL stream into
/// hub events, enforces the wall-clock timeout, and guarantees a terminal
/// event plus a terminal session status on every exit path.
pub struct Supervisor {
    params: ExecutionParams,
    store: SharedStore,
    layout: SessionLayout,
    hub: Arc<EventHub>,
    engine: Arc<PermissionEngine>,
    launcher: SandboxLauncher,
    cancel: CancelHandle,
    saw_complete: AtomicBool,
}

impl Supervisor {
    pub fn new(
        params: ExecutionParams,
        store: SharedStore,
        layout: SessionLayout,
        hub: Arc<EventHub>,
        engine: Arc<PermissionEngine>,
        launcher: SandboxLauncher,
    ) -> Self {
        Self {
            params,
            store,
            layout,
            hub,
            engine,
            launcher,
            cancel: CancelHandle::new(),
            saw_complete: AtomicBool::new(false),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Drive the run to a terminal state. Never returns early without
    /// emitting (or observing) a terminal event and updating the session.
    ///
    /// `writer` is the session's persistence-writer task; it is awaited
    /// after the terminal event so that a terminal session status always
    /// implies a fully persisted event list (resumed runs read the last
    /// sequence from the store).
    pub async fn run(self, writer: tokio::task::JoinHandle<()>) {
        let started = Instant::now();
        let session_id = self.params.session_id.clone();

        let outcome = self.execute().await;

        let (status, terminal_payload) = match outcome {
            Outcome::Completed => (SessionStatus::Complete, None),
            Outcome::FailedSignalled => (SessionStatus::Failed, None),
            Outcome::Cancelled { resumable } => (
                SessionStatus::Cancelled,
                Some(EventPayload::Cancelled(CancelledPayload {
                    message: "Run cancelled by user".to_string(),
                    resumable,
                })),
            ),
            Outcome::TimedOut => (
                SessionStatus::Failed,
                Some(EventPayload::Error(ErrorPayload {
                    message: format!(
                        "Run exceeded wall-clock timeout of {}s",
                        self.params.timeout.as_secs()
                    ),
                    error_type: "timeout".to_string(),
                })),
            ),
            Outcome::Crashed { detail } => (
                SessionStatus::Failed,
                Some(EventPayload::Error(ErrorPayload {
                    message: detail,
                    error_type: "child_crash".to_string(),
                })),
            ),
            Outcome::SandboxUnavailable { detail } => (
                SessionStatus::Failed,
                Some(EventPayload::Error(ErrorPayload {
                    message: detail,
                    error_type: "sandbox_unavailable".to_string(),
                })),
            ),
            Outcome::SpawnFailed { detail } => (
                SessionStatus::Failed,
                Some(EventPayload::Error(ErrorPayload {
                    message: detail,
                    error_type: "child_crash".to_string(),
                })),
            ),
        };

        if let Some(payload) = terminal_payload {
            match self.hub.publish(payload).await {
                Ok(_) => {}
                // The child already emitted its own terminal event; the
                // first one wins.
                Err(Error::StreamClosed) => {
                    tracing::debug!(session_id = %session_id, "Terminal event already emitted");
                }
                Err(err) => {
                    tracing::error!(error = %err, "Failed to publish terminal event");
                }
            }
        }

        // The terminal event closed the persist channel; the writer
        // finishes once it has committed the backlog.
        if let Err(err) = writer.await {
            tracing::warn!(session_id = %session_id, error = %err, "Writer task failed");
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let patch = SessionPatch {
            status: Some(status),
            completed_at: Some(chrono::Utc::now()),
            duration_ms: Some(duration_ms),
            ..SessionPatch::default()
        };
        let id = session_id.clone();
        if let Err(err) = with_store(&self.store, move |db| db.update_session(&id, &patch)).await {
            tracing::error!(
                session_id = %session_id,
                error = %err,
                "Failed to record terminal session status"
            );
        }

        self.cancel.disarm();
        tracing::info!(
            session_id = %session_id,
            status = %status,
            duration_ms,
            "Supervisor finished"
        );
    }

    async fn execute(&self) -> Outcome {
        let argv = match self.build_command() {
            Ok(argv) => argv,
            Err(Error::SandboxUnavailable(detail)) => {
                return Outcome::SandboxUnavailable { detail };
            }
            Err(err) => {
                return Outcome::SpawnFailed {
                    detail: err.to_string(),
                };
            }
        };

        let mut child = match self.spawn(&argv) {
            Ok(child) => child,
            Err(err) => {
                return Outcome::SpawnFailed {
                    detail: format!("Failed to spawn agent: {}", err),
                };
            }
        };

        if let Some(pid) = child.id() {
            self.cancel.arm(pid);
        }

        let deadline = Instant::now() + self.params.timeout;
        let timed_out = match self.pump_stream(&mut child, deadline).await {
            Ok(timed_out) => timed_out,
            Err(err) => {
                let _ = self.terminate(&mut child).await;
                return Outcome::Crashed {
                    detail: format!("Agent stream failed: {}", err),
                };
            }
        };

        if timed_out {
            let _ = self.terminate(&mut child).await;
            return Outcome::TimedOut;
        }

        // Stream is at EOF; the child should be exiting.
        let exit = match tokio::time::timeout(self.params.grace_period, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "Error waiting for agent exit");
                None
            }
            Err(_) => {
                tracing::warn!("Agent did not exit after closing stdout, killing");
                let _ = child.kill().await;
                None
            }
        };

        let resumable = self.seen_resume_id().await;
        if self.saw_complete.load(Ordering::Acquire) {
            return Outcome::Completed;
        }
        if self.hub.is_closed().await {
            return Outcome::FailedSignalled;
        }
        if self.cancel.is_requested() {
            return Outcome::Cancelled { resumable };
        }

        let detail = match exit {
            Some(status) => format!("Agent exited without completing (status {})", status),
            None => "Agent exited without completing".to_string(),
        };
        Outcome::Crashed { detail }
    }

    fn build_command(&self) -> Result<Vec<String>> {
        let id = &self.params.session_id;
        let session_dir = self.layout.dir(id);

        // Inside the sandbox the session is always mounted at the fixed
        // target; outside it the real path is handed over.
        let visible_session_dir = if self.launcher.enabled() {
            PathBuf::from(SANDBOX_SESSION_DIR)
        } else {
            session_dir.clone()
        };

        let mut argv = vec![self.params.agent_program.clone()];
        argv.extend(self.params.agent_args.iter().cloned());
        argv.push("--task".to_string());
        argv.push(self.params.task.clone());
        argv.push("--model".to_string());
        argv.push(self.params.model.clone());
        argv.push("--max-turns".to_string());
        argv.push(self.params.max_turns.to_string());
        argv.push("--session-dir".to_string());
        argv.push(visible_session_dir.display().to_string());
        if let Some(resume_id) = &self.params.resume_id {
            argv.push("--resume".to_string());
            argv.push(resume_id.clone());
        }

        let wrapped = self.launcher.wrap(
            argv,
            &session_dir,
            self.params.skills_root.as_deref(),
        )?;
        Ok(wrapped)
    }

    fn spawn(&self, argv: &[String]) -> std::io::Result<Child> {
        let workspace = self.layout.workspace(&self.params.session_id);

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !self.launcher.enabled() {
            // The sandbox handles --chdir itself
            cmd.current_dir(&workspace);
        }

        cmd.spawn()
    }

    /// Read the child's stdout line-by-line until EOF or deadline.
    /// Returns `Ok(true)` when the deadline expired.
    async fn pump_stream(&self, child: &mut Child, deadline: Instant) -> Result<bool> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("Agent stdout was not piped".to_string()))?;
        let stderr = child.stderr.take();

        // Raw capture of everything the agent prints, one line per record
        let log_path = self.layout.log_file(&self.params.session_id);
        let mut log_file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await?;

        // stderr is drained concurrently into the same log so a chatty
        // agent can never block on a full pipe
        let stderr_task = stderr.map(|stderr| {
            let log_path = log_path.clone();
            tokio::spawn(async move {
                let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(64 * 1024));
                let mut file = match tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&log_path)
                    .await
                {
                    Ok(file) => file,
                    Err(_) => return,
                };
                while let Some(Ok(line)) = lines.next().await {
                    let _ = file.write_all(format!("stderr: {}\n", line).as_bytes()).await;
                }
            })
        });

        let codec = LinesCodec::new_with_max_length(self.params.max_line_bytes);
        let mut lines = FramedRead::new(stdout, codec);

        let timed_out = loop {
            match tokio::time::timeout_at(deadline, lines.next()).await {
                Err(_) => break true,
                Ok(None) => break false,
                Ok(Some(Ok(line))) => {
                    log_file.write_all(line.as_bytes()).await?;
                    log_file.write_all(b"\n").await?;
                    self.handle_line(&line).await;
                }
                Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                    tracing::warn!(
                        session_id = %self.params.session_id,
                        max_bytes = self.params.max_line_bytes,
                        "Dropping oversized agent output line"
                    );
                }
                Ok(Some(Err(LinesCodecError::Io(err)))) => {
                    return Err(Error::Io(err));
                }
            }
        };

        if let Some(task) = stderr_task {
            task.abort();
        }
        Ok(timed_out)
    }

    /// Parse one stdout line as an event record and forward it. Malformed
    /// lines are logged and dropped without aborting the stream.
    async fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let payload: EventPayload = match serde_json::from_str(line) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(
                    session_id = %self.params.session_id,
                    error = %err,
                    "Dropping malformed agent record"
                );
                return;
            }
        };

        match &payload {
            EventPayload::AgentStart(start) => {
                if let Some(resume_id) = start.resume_id.clone() {
                    // Persist immediately so a cancelled run stays resumable
                    let id = self.params.session_id.clone();
                    let patch = SessionPatch {
                        resume_id: Some(resume_id),
                        ..SessionPatch::default()
                    };
                    if let Err(err) =
                        with_store(&self.store, move |db| db.update_session(&id, &patch)).await
                    {
                        tracing::error!(error = %err, "Failed to persist resume id");
                    }
                }
            }
            EventPayload::ToolStart(tool) => {
                // Policy audit; a runaway sequence of denied calls aborts
                // the run via the same path as a user cancel.
                let call = format_tool_call(&tool.tool_name, &tool.tool_input);
                match self.engine.evaluate(&call) {
                    agentum_policy::Decision::Allow => {}
                    agentum_policy::Decision::Deny { interrupt } => {
                        tracing::warn!(
                            session_id = %self.params.session_id,
                            call = %call,
                            interrupt,
                            "Tool call denied by permission profile"
                        );
                        if interrupt {
                            self.cancel.request();
                        }
                    }
                }
            }
            EventPayload::MetricsUpdate(metrics) => {
                let id = self.params.session_id.clone();
                let patch = SessionPatch {
                    num_turns: Some(metrics.turns),
                    total_cost_usd: Some(metrics.total_cost_usd),
                    ..SessionPatch::default()
                };
                if let Err(err) =
                    with_store(&self.store, move |db| db.update_session(&id, &patch)).await
                {
                    tracing::warn!(error = %err, "Failed to fold metrics update");
                }
            }
            EventPayload::AgentComplete(complete) => {
                self.saw_complete.store(true, Ordering::Release);
                let id = self.params.session_id.clone();
                let patch = SessionPatch {
                    num_turns: Some(complete.num_turns),
                    total_cost_usd: Some(complete.total_cost_usd),
                    ..SessionPatch::default()
                };
                if let Err(err) =
                    with_store(&self.store, move |db| db.update_session(&id, &patch)).await
                {
                    tracing::warn!(error = %err, "Failed to fold completion metrics");
                }
            }
            _ => {}
        }

        match self.hub.publish(payload).await {
            Ok(_) => {}
            Err(Error::StreamClosed) => {
                tracing::warn!(
                    session_id = %self.params.session_id,
                    "Dropping agent record after terminal event"
                );
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to publish agent event");
            }
        }
    }

    /// SIGTERM, wait out the grace period, then SIGKILL.
    async fn terminate(&self, child: &mut Child) -> Result<()> {
        if let Some(pid) = child.id() {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        match tokio::time::timeout(self.params.grace_period, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!(
                    session_id = %self.params.session_id,
                    "Agent ignored SIGTERM, killing"
                );
                let _ = child.kill().await;
            }
        }
        Ok(())
    }

    async fn seen_resume_id(&self) -> bool {
        let id = self.params.session_id.clone();
        match with_store(&self.store, move |db| db.get_session_any(&id)).await {
            Ok(Some(session)) => session.resume_id.is_some(),
            _ => false,
        }
    }
}

/// Format a tool invocation for the permission engine, e.g.
/// `Bash(git status)` or `Write(/session/workspace/out.yaml)`.
fn format_tool_call(tool_name: &str, tool_input: &serde_json::Value) -> String {
    let argument = tool_input
        .get("command")
        .or_else(|| tool_input.get("file_path"))
        .or_else(|| tool_input.get("path"))
        .or_else(|| tool_input.get("url"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| tool_input.to_string());
    format!("{}({})", tool_name, argument)
}
