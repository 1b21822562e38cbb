use crate::schema::init_schema;
use crate::{Error, Result};
use agentum_types::{
    AgentEvent, Session, SessionId, SessionStatus, User, UserType,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::time::Duration;

// Bounded retry for transient event-append failures (locked database,
// busy WAL checkpoint). Delays: 10ms, 20ms, 40ms, 80ms, 160ms.
const RECORD_EVENT_ATTEMPTS: u32 = 5;
const RECORD_EVENT_BASE_DELAY_MS: u64 = 10;

/// Page of sessions plus the total count for the owner
#[derive(Debug, Clone)]
pub struct SessionPage {
    pub sessions: Vec<Session>,
    pub total: u64,
}

/// Partial session update; `None` fields are left untouched.
/// `update_session` returns the post-image.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub num_turns: Option<u64>,
    pub duration_ms: Option<u64>,
    pub total_cost_usd: Option<f64>,
    pub cancel_requested: Option<bool>,
    pub resume_id: Option<String>,
}

impl SessionPatch {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Self { conn };
        init_schema(&db.conn)?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        init_schema(&db.conn)?;
        Ok(db)
    }

    /// Look up a user, creating an anonymous one when `id` is absent or
    /// unknown. Called on every token issue.
    pub fn get_or_create_user(&self, id: Option<&str>) -> Result<User> {
        if let Some(id) = id
            && let Some(user) = self.get_user(id)?
        {
            return Ok(user);
        }

        let user = User {
            id: id
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            user_type: UserType::Anonymous,
            created_at: Utc::now(),
        };

        self.conn.execute(
            r#"
            INSERT INTO users (id, user_type, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                &user.id,
                user.user_type.as_str(),
                user.created_at.to_rfc3339()
            ],
        )?;

        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, user_type, created_at FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match user {
            None => Ok(None),
            Some((id, user_type, created_at)) => {
                if user_type != UserType::Anonymous.as_str() {
                    return Err(Error::Corrupt(format!("Unknown user type: {}", user_type)));
                }
                Ok(Some(User {
                    id,
                    user_type: UserType::Anonymous,
                    created_at: parse_ts(&created_at)?,
                }))
            }
        }
    }

    /// Insert a new session row in `pending` state. Side-effect #2 of the
    /// two-phase create; the caller already holds the directory.
    pub fn create_session(
        &self,
        id: &SessionId,
        user_id: &str,
        task: &str,
        model: &str,
        working_dir: &str,
    ) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            user_id: user_id.to_string(),
            status: SessionStatus::Pending,
            task: task.to_string(),
            model: model.to_string(),
            working_dir: working_dir.to_string(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            num_turns: 0,
            duration_ms: 0,
            total_cost_usd: 0.0,
            cancel_requested: false,
            resume_id: None,
        };

        self.conn.execute(
            r#"
            INSERT INTO sessions (
                id, user_id, status, task, model, working_dir,
                created_at, updated_at, num_turns, duration_ms,
                total_cost_usd, cancel_requested
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, 0, 0)
            "#,
            params![
                session.id.as_str(),
                &session.user_id,
                session.status.as_str(),
                &session.task,
                &session.model,
                &session.working_dir,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(session)
    }

    /// Owner-scoped fetch. An unowned session yields `None` exactly like a
    /// missing one, so ids cannot be probed across users.
    pub fn get_session(&self, id: &SessionId, user_id: &str) -> Result<Option<Session>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, user_id, status, task, model, working_dir,
                   created_at, updated_at, completed_at, num_turns,
                   duration_ms, total_cost_usd, cancel_requested, resume_id
            FROM sessions
            WHERE id = ?1 AND user_id = ?2
            "#,
        )?;

        let row = stmt
            .query_row(params![id.as_str(), user_id], session_row)
            .optional()?;
        row.map(raw_into_session).transpose()
    }

    /// Unscoped fetch for internal callers (supervisor, writer).
    pub fn get_session_any(&self, id: &SessionId) -> Result<Option<Session>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, user_id, status, task, model, working_dir,
                   created_at, updated_at, completed_at, num_turns,
                   duration_ms, total_cost_usd, cancel_requested, resume_id
            FROM sessions
            WHERE id = ?1
            "#,
        )?;

        let row = stmt.query_row([id.as_str()], session_row).optional()?;
        row.map(raw_into_session).transpose()
    }

    pub fn list_sessions(&self, user_id: &str, limit: u64, offset: u64) -> Result<SessionPage> {
        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        let total = total as u64;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, user_id, status, task, model, working_dir,
                   created_at, updated_at, completed_at, num_turns,
                   duration_ms, total_cost_usd, cancel_requested, resume_id
            FROM sessions
            WHERE user_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;

        let sessions = stmt
            .query_map(params![user_id, limit as i64, offset as i64], session_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(raw_into_session)
            .collect::<Result<Vec<_>>>()?;

        Ok(SessionPage { sessions, total })
    }

    /// Apply a partial update and return the post-image. Metric fields are
    /// clamped non-decreasing; `updated_at` is bumped on every call.
    pub fn update_session(&self, id: &SessionId, patch: &SessionPatch) -> Result<Session> {
        let current = self
            .get_session_any(id)?
            .ok_or_else(|| Error::NotFound(format!("Session {}", id)))?;

        let status = patch.status.unwrap_or(current.status);
        let completed_at = patch.completed_at.or(current.completed_at);
        let num_turns = patch.num_turns.unwrap_or(current.num_turns).max(current.num_turns);
        let duration_ms = patch
            .duration_ms
            .unwrap_or(current.duration_ms)
            .max(current.duration_ms);
        let total_cost_usd = patch
            .total_cost_usd
            .unwrap_or(current.total_cost_usd)
            .max(current.total_cost_usd);
        let cancel_requested = patch.cancel_requested.unwrap_or(current.cancel_requested);
        let resume_id = patch.resume_id.clone().or(current.resume_id.clone());
        let updated_at = Utc::now();

        self.conn.execute(
            r#"
            UPDATE sessions SET
                status = ?2,
                updated_at = ?3,
                completed_at = ?4,
                num_turns = ?5,
                duration_ms = ?6,
                total_cost_usd = ?7,
                cancel_requested = ?8,
                resume_id = ?9
            WHERE id = ?1
            "#,
            params![
                id.as_str(),
                status.as_str(),
                updated_at.to_rfc3339(),
                completed_at.map(|t| t.to_rfc3339()),
                num_turns as i64,
                duration_ms as i64,
                total_cost_usd,
                cancel_requested,
                resume_id,
            ],
        )?;

        Ok(Session {
            status,
            updated_at,
            completed_at,
            num_turns,
            duration_ms,
            total_cost_usd,
            cancel_requested,
            resume_id,
            ..current
        })
    }

    /// Append one canonical event. Retries transient failures with
    /// exponential backoff; after the attempt bound the failure is
    /// reported as `Error::Persistence` and the caller aborts the run.
    pub fn record_event(&self, id: &SessionId, event: &AgentEvent) -> Result<()> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| Error::Persistence(format!("Payload serialization failed: {}", e)))?;

        let mut last_error = None;
        for attempt in 0..RECORD_EVENT_ATTEMPTS {
            let result = self.conn.execute(
                r#"
                INSERT INTO events (session_id, sequence, kind, payload, timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    id.as_str(),
                    event.sequence as i64,
                    event.kind().as_str(),
                    &payload,
                    event.timestamp.to_rfc3339(),
                ],
            );

            match result {
                Ok(_) => return Ok(()),
                Err(err) => {
                    last_error = Some(err);
                    std::thread::sleep(Duration::from_millis(
                        RECORD_EVENT_BASE_DELAY_MS << attempt,
                    ));
                }
            }
        }

        Err(Error::Persistence(format!(
            "Event {}#{} not recorded after {} attempts: {}",
            id,
            event.sequence,
            RECORD_EVENT_ATTEMPTS,
            last_error.expect("at least one attempt was made"),
        )))
    }

    /// Ordered replay of persisted events with `sequence > after_sequence`.
    pub fn list_events(&self, id: &SessionId, after_sequence: u64) -> Result<Vec<AgentEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT payload, timestamp, sequence
            FROM events
            WHERE session_id = ?1 AND sequence > ?2
            ORDER BY sequence ASC
            "#,
        )?;

        let rows = stmt
            .query_map(params![id.as_str(), after_sequence as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(payload, timestamp, sequence)| {
                Ok(AgentEvent {
                    payload: serde_json::from_str(&payload)
                        .map_err(|e| Error::Corrupt(format!("Event payload: {}", e)))?,
                    timestamp: parse_ts(&timestamp)?,
                    sequence: sequence as u64,
                })
            })
            .collect()
    }

    /// Highest persisted sequence for a session (0 when none). A resumed
    /// run's hub continues numbering from here so the per-session
    /// sequence stays monotonic across runs.
    pub fn last_sequence(&self, id: &SessionId) -> Result<u64> {
        let last: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(sequence), 0) FROM events WHERE session_id = ?1",
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(last as u64)
    }

    /// Startup reconciliation: no supervisor survives a restart, so any
    /// `running` row is an orphan. Returns the ids that were flipped.
    pub fn mark_stale_running_failed(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM sessions WHERE status = 'running'")?;
        let stale: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            r#"
            UPDATE sessions
            SET status = 'failed', updated_at = ?1, completed_at = ?1
            WHERE status = 'running'
            "#,
            [&now],
        )?;

        Ok(stale)
    }
}

type RawSession = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    i64,
    i64,
    f64,
    bool,
    Option<String>,
);

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSession> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
    ))
}

fn raw_into_session(raw: RawSession) -> Result<Session> {
    let (
        id,
        user_id,
        status,
        task,
        model,
        working_dir,
        created_at,
        updated_at,
        completed_at,
        num_turns,
        duration_ms,
        total_cost_usd,
        cancel_requested,
        resume_id,
    ) = raw;

    Ok(Session {
        id: SessionId::parse(&id).map_err(|e| Error::Corrupt(e.to_string()))?,
        user_id,
        status: SessionStatus::parse(&status)
            .ok_or_else(|| Error::Corrupt(format!("Unknown status: {}", status)))?,
        task,
        model,
        working_dir,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
        num_turns: num_turns as u64,
        duration_ms: duration_ms as u64,
        total_cost_usd,
        cancel_requested,
        resume_id,
    })
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt(format!("Bad timestamp {}: {}", raw, e)))
}
