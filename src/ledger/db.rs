use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::*;
use crate::rounds::DialogueRound;
use crate::workflow::{StateContext, WorkflowState};

/// Result note stored on an execution replaced by a newer cycle.
pub const SUPERSEDED_NOTE: &str = "superseded";

/// Result note stored on executions failed by the startup sweep.
pub const INTERRUPTED_NOTE: &str = "interrupted: process restarted while the reviewer was running";

/// Async-safe handle to the ledger database.
///
/// Wraps `LedgerDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<LedgerDb>>,
}

impl DbHandle {
    pub fn new(db: LedgerDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&LedgerDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct LedgerDb {
    conn: Connection,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

const SESSION_COLUMNS: &str = "id, main_session_id, review_session_id, status, state, \
     state_context_json, result, created_at, updated_at";

const ROUND_COLUMNS: &str = "id, brain_session_id, round_number, user_input, ai_summary, \
     message_ids, started_at, ended_at, from_review, has_code_changes";

const EXECUTION_COLUMNS: &str = "id, brain_session_id, rounds_reviewed, prompt, status, \
     progress_log_json, result, created_at, completed_at";

impl LedgerDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS brain_sessions (
                    id TEXT PRIMARY KEY,
                    main_session_id TEXT NOT NULL,
                    review_session_id TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    state TEXT NOT NULL DEFAULT 'idle',
                    state_context_json TEXT NOT NULL DEFAULT '{}',
                    result TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS brain_rounds (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    brain_session_id TEXT NOT NULL REFERENCES brain_sessions(id) ON DELETE CASCADE,
                    round_number INTEGER NOT NULL,
                    user_input TEXT NOT NULL DEFAULT '',
                    ai_summary TEXT NOT NULL DEFAULT '',
                    message_ids TEXT NOT NULL DEFAULT '[]',
                    started_at TEXT NOT NULL,
                    ended_at TEXT NOT NULL,
                    from_review INTEGER NOT NULL DEFAULT 0,
                    has_code_changes INTEGER NOT NULL DEFAULT 0,
                    UNIQUE(brain_session_id, round_number)
                );

                CREATE TABLE IF NOT EXISTS brain_executions (
                    id TEXT PRIMARY KEY,
                    brain_session_id TEXT NOT NULL REFERENCES brain_sessions(id) ON DELETE CASCADE,
                    rounds_reviewed TEXT NOT NULL DEFAULT '[]',
                    prompt TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'pending',
                    progress_log_json TEXT NOT NULL DEFAULT '[]',
                    result TEXT,
                    created_at TEXT NOT NULL,
                    completed_at TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_brain_sessions_main ON brain_sessions(main_session_id);
                CREATE INDEX IF NOT EXISTS idx_brain_sessions_review ON brain_sessions(review_session_id);
                CREATE INDEX IF NOT EXISTS idx_brain_rounds_session ON brain_rounds(brain_session_id);
                CREATE INDEX IF NOT EXISTS idx_brain_executions_session ON brain_executions(brain_session_id, status);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── BrainSession ──────────────────────────────────────────────────

    pub fn create_brain_session(
        &self,
        main_session_id: &str,
        review_session_id: &str,
    ) -> Result<BrainSession> {
        let id = uuid::Uuid::new_v4().to_string();
        let ts = now();
        let ctx = StateContext::default()
            .to_json()
            .context("Failed to serialize state context")?;
        self.conn
            .execute(
                "INSERT INTO brain_sessions
                 (id, main_session_id, review_session_id, status, state, state_context_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    id,
                    main_session_id,
                    review_session_id,
                    BrainSessionStatus::Active.as_str(),
                    WorkflowState::Idle.as_str(),
                    ctx,
                    ts
                ],
            )
            .context("Failed to insert brain session")?;
        self.get_brain_session(&id)?
            .context("Brain session not found after insert")
    }

    pub fn get_brain_session(&self, id: &str) -> Result<Option<BrainSession>> {
        let sql = format!("SELECT {} FROM brain_sessions WHERE id = ?1", SESSION_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], SessionRow::from_row)
            .optional()
            .context("Failed to query brain session")?;
        row.map(SessionRow::into_session).transpose()
    }

    /// The newest pending/active session supervising `main_session_id`.
    pub fn find_live_for_main(&self, main_session_id: &str) -> Result<Option<BrainSession>> {
        self.find_live_by("main_session_id", main_session_id)
    }

    /// The newest pending/active session reviewed by `review_session_id`.
    pub fn find_live_for_review(&self, review_session_id: &str) -> Result<Option<BrainSession>> {
        self.find_live_by("review_session_id", review_session_id)
    }

    fn find_live_by(&self, column: &str, value: &str) -> Result<Option<BrainSession>> {
        let sql = format!(
            "SELECT {} FROM brain_sessions
             WHERE {} = ?1 AND status IN ('pending', 'active')
             ORDER BY rowid DESC LIMIT 1",
            SESSION_COLUMNS, column
        );
        let row = self
            .conn
            .query_row(&sql, params![value], SessionRow::from_row)
            .optional()
            .context("Failed to query live brain session")?;
        row.map(SessionRow::into_session).transpose()
    }

    pub fn list_brain_sessions(&self) -> Result<Vec<BrainSession>> {
        let sql = format!("SELECT {} FROM brain_sessions ORDER BY rowid", SESSION_COLUMNS);
        self.query_sessions(&sql)
    }

    pub fn list_live_sessions(&self) -> Result<Vec<BrainSession>> {
        let sql = format!(
            "SELECT {} FROM brain_sessions WHERE status IN ('pending', 'active') ORDER BY rowid",
            SESSION_COLUMNS
        );
        self.query_sessions(&sql)
    }

    fn query_sessions(&self, sql: &str) -> Result<Vec<BrainSession>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare brain session query")?;
        let rows = stmt
            .query_map([], SessionRow::from_row)
            .context("Failed to query brain sessions")?;
        let mut sessions = Vec::new();
        for row in rows {
            let r = row.context("Failed to read brain session row")?;
            sessions.push(r.into_session()?);
        }
        Ok(sessions)
    }

    /// Persist `(state, context)` as one unit.
    pub fn update_workflow(
        &self,
        id: &str,
        state: WorkflowState,
        context: &StateContext,
    ) -> Result<()> {
        let ctx = context
            .to_json()
            .context("Failed to serialize state context")?;
        let changed = self
            .conn
            .execute(
                "UPDATE brain_sessions SET state = ?1, state_context_json = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![state.as_str(), ctx, now(), id],
            )
            .context("Failed to update workflow state")?;
        if changed == 0 {
            anyhow::bail!("Brain session {} not found", id);
        }
        Ok(())
    }

    pub fn update_status(
        &self,
        id: &str,
        status: BrainSessionStatus,
        result: Option<&str>,
    ) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE brain_sessions SET status = ?1, result = COALESCE(?2, result), updated_at = ?3
                 WHERE id = ?4",
                params![status.as_str(), result, now(), id],
            )
            .context("Failed to update brain session status")?;
        if changed == 0 {
            anyhow::bail!("Brain session {} not found", id);
        }
        Ok(())
    }

    // ── BrainRound ────────────────────────────────────────────────────

    pub fn round_numbers(&self, brain_session_id: &str) -> Result<HashSet<u32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT round_number FROM brain_rounds WHERE brain_session_id = ?1")
            .context("Failed to prepare round_numbers")?;
        let rows = stmt
            .query_map(params![brain_session_id], |row| row.get::<_, u32>(0))
            .context("Failed to query round numbers")?;
        let mut numbers = HashSet::new();
        for row in rows {
            numbers.insert(row.context("Failed to read round number")?);
        }
        Ok(numbers)
    }

    /// Record rounds as ingested. Already-recorded round numbers are left
    /// untouched. Returns how many rows were added.
    pub fn insert_rounds(&self, brain_session_id: &str, rounds: &[DialogueRound]) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut inserted = 0;
        for round in rounds {
            let message_ids = serde_json::to_string(&round.message_ids)
                .context("Failed to serialize message ids")?;
            inserted += tx
                .execute(
                    "INSERT OR IGNORE INTO brain_rounds
                     (brain_session_id, round_number, user_input, ai_summary, message_ids,
                      started_at, ended_at, from_review, has_code_changes)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        brain_session_id,
                        round.round_number,
                        round.user_input,
                        round.ai_summary(),
                        message_ids,
                        round.started_at.to_rfc3339(),
                        round.ended_at.to_rfc3339(),
                        round.from_review,
                        round.has_code_changes
                    ],
                )
                .context("Failed to insert brain round")?;
        }
        tx.commit().context("Failed to commit brain rounds")?;
        Ok(inserted)
    }

    pub fn list_rounds(&self, brain_session_id: &str) -> Result<Vec<BrainRound>> {
        let sql = format!(
            "SELECT {} FROM brain_rounds WHERE brain_session_id = ?1 ORDER BY round_number",
            ROUND_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_rounds")?;
        let rows = stmt
            .query_map(params![brain_session_id], |row| {
                Ok(RoundRow {
                    id: row.get(0)?,
                    brain_session_id: row.get(1)?,
                    round_number: row.get(2)?,
                    user_input: row.get(3)?,
                    ai_summary: row.get(4)?,
                    message_ids: row.get(5)?,
                    started_at: row.get(6)?,
                    ended_at: row.get(7)?,
                    from_review: row.get(8)?,
                    has_code_changes: row.get(9)?,
                })
            })
            .context("Failed to query brain rounds")?;
        let mut rounds = Vec::new();
        for row in rows {
            let r = row.context("Failed to read brain round row")?;
            rounds.push(r.into_round()?);
        }
        Ok(rounds)
    }

    // ── Execution ─────────────────────────────────────────────────────

    /// Create a `running` execution, first closing any running one as
    /// superseded. Both happen in one transaction so at most one execution
    /// per session is ever running.
    ///
    /// Returns the new execution and the ids of superseded ones.
    pub fn start_execution(
        &self,
        brain_session_id: &str,
        rounds_reviewed: &[u32],
        prompt: &str,
    ) -> Result<(Execution, Vec<String>)> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let ts = now();

        let superseded: Vec<String> = {
            let mut stmt = tx
                .prepare(
                    "SELECT id FROM brain_executions
                     WHERE brain_session_id = ?1 AND status = 'running' ORDER BY rowid",
                )
                .context("Failed to prepare running execution lookup")?;
            let rows = stmt
                .query_map(params![brain_session_id], |row| row.get::<_, String>(0))
                .context("Failed to query running executions")?;
            rows.collect::<rusqlite::Result<_>>()
                .context("Failed to read running execution id")?
        };
        tx.execute(
            "UPDATE brain_executions SET status = 'completed', result = ?1, completed_at = ?2
             WHERE brain_session_id = ?3 AND status = 'running'",
            params![SUPERSEDED_NOTE, ts, brain_session_id],
        )
        .context("Failed to supersede running execution")?;

        let id = uuid::Uuid::new_v4().to_string();
        let rounds = serde_json::to_string(rounds_reviewed).context("Failed to serialize rounds")?;
        tx.execute(
            "INSERT INTO brain_executions
             (id, brain_session_id, rounds_reviewed, prompt, status, progress_log_json, created_at)
             VALUES (?1, ?2, ?3, ?4, 'running', '[]', ?5)",
            params![id, brain_session_id, rounds, prompt, ts],
        )
        .context("Failed to insert execution")?;
        tx.commit().context("Failed to commit execution start")?;

        let execution = self
            .get_execution(&id)?
            .context("Execution not found after insert")?;
        Ok((execution, superseded))
    }

    pub fn running_execution(&self, brain_session_id: &str) -> Result<Option<Execution>> {
        let sql = format!(
            "SELECT {} FROM brain_executions
             WHERE brain_session_id = ?1 AND status = 'running'
             ORDER BY rowid DESC LIMIT 1",
            EXECUTION_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![brain_session_id], ExecutionRow::from_row)
            .optional()
            .context("Failed to query running execution")?;
        row.map(ExecutionRow::into_execution).transpose()
    }

    pub fn get_execution(&self, id: &str) -> Result<Option<Execution>> {
        let sql = format!("SELECT {} FROM brain_executions WHERE id = ?1", EXECUTION_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], ExecutionRow::from_row)
            .optional()
            .context("Failed to query execution")?;
        row.map(ExecutionRow::into_execution).transpose()
    }

    pub fn list_executions(&self, brain_session_id: &str) -> Result<Vec<Execution>> {
        let sql = format!(
            "SELECT {} FROM brain_executions WHERE brain_session_id = ?1 ORDER BY rowid",
            EXECUTION_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_executions")?;
        let rows = stmt
            .query_map(params![brain_session_id], ExecutionRow::from_row)
            .context("Failed to query executions")?;
        let mut executions = Vec::new();
        for row in rows {
            let r = row.context("Failed to read execution row")?;
            executions.push(r.into_execution()?);
        }
        Ok(executions)
    }

    /// Append entries to the progress log. The log only grows.
    pub fn append_progress(&self, execution_id: &str, entries: &[ProgressEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let current: String = tx
            .query_row(
                "SELECT progress_log_json FROM brain_executions WHERE id = ?1",
                params![execution_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read progress log")?
            .with_context(|| format!("Execution {} not found", execution_id))?;
        let mut log: Vec<ProgressEntry> =
            serde_json::from_str(&current).context("Failed to parse progress log")?;
        log.extend(entries.iter().cloned());
        let json = serde_json::to_string(&log).context("Failed to serialize progress log")?;
        tx.execute(
            "UPDATE brain_executions SET progress_log_json = ?1 WHERE id = ?2",
            params![json, execution_id],
        )
        .context("Failed to update progress log")?;
        tx.commit().context("Failed to commit progress log")?;
        Ok(())
    }

    /// Move a running execution to a terminal status. Returns false when the
    /// execution was no longer running (superseded or swept).
    pub fn finish_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        result: Option<&str>,
    ) -> Result<bool> {
        if !status.is_terminal() {
            anyhow::bail!("Cannot finish execution with status {}", status.as_str());
        }
        let changed = self
            .conn
            .execute(
                "UPDATE brain_executions SET status = ?1, result = ?2, completed_at = ?3
                 WHERE id = ?4 AND status = 'running'",
                params![status.as_str(), result, now(), execution_id],
            )
            .context("Failed to finish execution")?;
        Ok(changed > 0)
    }

    /// Crash-recovery sweep: fail every execution still marked running.
    pub fn fail_running_executions(&self, reason: &str) -> Result<usize> {
        let changed = self
            .conn
            .execute(
                "UPDATE brain_executions SET status = 'failed', result = ?1, completed_at = ?2
                 WHERE status = 'running'",
                params![reason, now()],
            )
            .context("Failed to sweep running executions")?;
        Ok(changed)
    }

    pub fn session_detail(&self, id: &str) -> Result<Option<BrainSessionDetail>> {
        let Some(session) = self.get_brain_session(id)? else {
            return Ok(None);
        };
        let rounds = self.list_rounds(id)?;
        let executions = self.list_executions(id)?;
        Ok(Some(BrainSessionDetail {
            session,
            rounds,
            executions,
        }))
    }
}

// ── Row mapping ───────────────────────────────────────────────────────

struct SessionRow {
    id: String,
    main_session_id: String,
    review_session_id: String,
    status: String,
    state: String,
    state_context_json: String,
    result: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            main_session_id: row.get(1)?,
            review_session_id: row.get(2)?,
            status: row.get(3)?,
            state: row.get(4)?,
            state_context_json: row.get(5)?,
            result: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_session(self) -> Result<BrainSession> {
        let status = BrainSessionStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse brain session status")?;
        let state = WorkflowState::from_str(&self.state)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse workflow state")?;
        let context = StateContext::from_json(&self.state_context_json)
            .context("Failed to parse state context")?;
        Ok(BrainSession {
            id: self.id,
            main_session_id: self.main_session_id,
            review_session_id: self.review_session_id,
            status,
            state,
            context,
            result: self.result,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct RoundRow {
    id: i64,
    brain_session_id: String,
    round_number: u32,
    user_input: String,
    ai_summary: String,
    message_ids: String,
    started_at: String,
    ended_at: String,
    from_review: bool,
    has_code_changes: bool,
}

impl RoundRow {
    fn into_round(self) -> Result<BrainRound> {
        let message_ids: Vec<String> =
            serde_json::from_str(&self.message_ids).context("Failed to parse message ids")?;
        Ok(BrainRound {
            id: self.id,
            brain_session_id: self.brain_session_id,
            round_number: self.round_number,
            user_input: self.user_input,
            ai_summary: self.ai_summary,
            message_ids,
            started_at: self.started_at,
            ended_at: self.ended_at,
            from_review: self.from_review,
            has_code_changes: self.has_code_changes,
        })
    }
}

struct ExecutionRow {
    id: String,
    brain_session_id: String,
    rounds_reviewed: String,
    prompt: String,
    status: String,
    progress_log_json: String,
    result: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            brain_session_id: row.get(1)?,
            rounds_reviewed: row.get(2)?,
            prompt: row.get(3)?,
            status: row.get(4)?,
            progress_log_json: row.get(5)?,
            result: row.get(6)?,
            created_at: row.get(7)?,
            completed_at: row.get(8)?,
        })
    }

    fn into_execution(self) -> Result<Execution> {
        let status = ExecutionStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse execution status")?;
        let rounds_reviewed: Vec<u32> = serde_json::from_str(&self.rounds_reviewed)
            .context("Failed to parse reviewed rounds")?;
        let progress_log: Vec<ProgressEntry> = serde_json::from_str(&self.progress_log_json)
            .context("Failed to parse progress log")?;
        Ok(Execution {
            id: self.id,
            brain_session_id: self.brain_session_id,
            rounds_reviewed,
            prompt: self.prompt,
            status,
            progress_log,
            result: self.result,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::Signal;
    use chrono::Utc;

    fn round(number: u32, code: bool) -> DialogueRound {
        let now = Utc::now();
        DialogueRound {
            round_number: number,
            user_input: format!("request {}", number),
            agent_replies: vec!["done".to_string()],
            message_ids: vec![format!("m{}", number)],
            started_at: now,
            ended_at: now,
            from_review: false,
            has_code_changes: code,
            activity: Vec::new(),
        }
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = LedgerDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table'
             AND name IN ('brain_sessions', 'brain_rounds', 'brain_executions')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 3);
        Ok(())
    }

    #[test]
    fn test_open_file_database_creates_parent_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("brain.db");
        LedgerDb::new(&path)?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn test_create_and_find_brain_session() -> Result<()> {
        let db = LedgerDb::new_in_memory()?;
        let session = db.create_brain_session("main-1", "review-1")?;
        assert_eq!(session.status, BrainSessionStatus::Active);
        assert_eq!(session.state, WorkflowState::Idle);
        assert_eq!(session.context, StateContext::default());

        let by_main = db.find_live_for_main("main-1")?.expect("live session");
        assert_eq!(by_main.id, session.id);
        let by_review = db.find_live_for_review("review-1")?.expect("live session");
        assert_eq!(by_review.id, session.id);
        assert!(db.find_live_for_main("other")?.is_none());
        Ok(())
    }

    #[test]
    fn test_cancelled_session_is_not_live() -> Result<()> {
        let db = LedgerDb::new_in_memory()?;
        let session = db.create_brain_session("main-1", "review-1")?;
        db.update_status(&session.id, BrainSessionStatus::Cancelled, None)?;
        assert!(db.find_live_for_main("main-1")?.is_none());
        assert!(db.list_live_sessions()?.is_empty());
        assert_eq!(db.list_brain_sessions()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_update_workflow_persists_state_and_context() -> Result<()> {
        let db = LedgerDb::new_in_memory()?;
        let session = db.create_brain_session("main-1", "review-1")?;
        let mut ctx = StateContext::default();
        ctx.retries.lint = 2;
        ctx.last_signal = Some(Signal::LintFail);
        db.update_workflow(&session.id, WorkflowState::Developing, &ctx)?;

        let fetched = db.get_brain_session(&session.id)?.expect("session");
        assert_eq!(fetched.state, WorkflowState::Developing);
        assert_eq!(fetched.context, ctx);
        Ok(())
    }

    #[test]
    fn test_update_unknown_session_fails() -> Result<()> {
        let db = LedgerDb::new_in_memory()?;
        assert!(
            db.update_workflow("nope", WorkflowState::Done, &StateContext::default())
                .is_err()
        );
        Ok(())
    }

    #[test]
    fn test_insert_rounds_is_idempotent() -> Result<()> {
        let db = LedgerDb::new_in_memory()?;
        let session = db.create_brain_session("main-1", "review-1")?;

        assert_eq!(db.insert_rounds(&session.id, &[round(1, false), round(2, true)])?, 2);
        assert_eq!(db.insert_rounds(&session.id, &[round(2, true), round(3, false)])?, 1);

        let numbers = db.round_numbers(&session.id)?;
        assert_eq!(numbers, HashSet::from([1, 2, 3]));

        let rounds = db.list_rounds(&session.id)?;
        assert_eq!(rounds.len(), 3);
        assert!(rounds[1].has_code_changes);
        assert_eq!(rounds[1].message_ids, vec!["m2"]);
        assert_eq!(rounds[0].ai_summary, "done");
        Ok(())
    }

    #[test]
    fn test_start_execution_supersedes_running() -> Result<()> {
        let db = LedgerDb::new_in_memory()?;
        let session = db.create_brain_session("main-1", "review-1")?;

        let (first, superseded) = db.start_execution(&session.id, &[1], "prompt 1")?;
        assert!(superseded.is_empty());
        assert_eq!(first.status, ExecutionStatus::Running);

        let (second, superseded) = db.start_execution(&session.id, &[2], "prompt 2")?;
        assert_eq!(superseded, vec![first.id.clone()]);

        let old = db.get_execution(&first.id)?.expect("first execution");
        assert_eq!(old.status, ExecutionStatus::Completed);
        assert_eq!(old.result.as_deref(), Some(SUPERSEDED_NOTE));

        let running = db.running_execution(&session.id)?.expect("running");
        assert_eq!(running.id, second.id);
        assert_eq!(running.rounds_reviewed, vec![2]);

        let running_count = db
            .list_executions(&session.id)?
            .iter()
            .filter(|e| e.status == ExecutionStatus::Running)
            .count();
        assert_eq!(running_count, 1);
        Ok(())
    }

    #[test]
    fn test_append_progress_only_grows() -> Result<()> {
        let db = LedgerDb::new_in_memory()?;
        let session = db.create_brain_session("main-1", "review-1")?;
        let (exec, _) = db.start_execution(&session.id, &[], "p")?;

        db.append_progress(&exec.id, &[ProgressEntry::new(ProgressKind::AssistantText, "a")])?;
        db.append_progress(
            &exec.id,
            &[
                ProgressEntry::new(ProgressKind::ToolUse, "Bash"),
                ProgressEntry::new(ProgressKind::ToolResult, "ok"),
            ],
        )?;

        let log = db.get_execution(&exec.id)?.expect("execution").progress_log;
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].kind, ProgressKind::AssistantText);
        assert_eq!(log[2].content, "ok");
        Ok(())
    }

    #[test]
    fn test_finish_execution_only_from_running() -> Result<()> {
        let db = LedgerDb::new_in_memory()?;
        let session = db.create_brain_session("main-1", "review-1")?;
        let (exec, _) = db.start_execution(&session.id, &[1], "p")?;

        assert!(db.finish_execution(&exec.id, ExecutionStatus::Completed, Some("SIGNAL:no_issue"))?);
        assert!(!db.finish_execution(&exec.id, ExecutionStatus::Failed, Some("late"))?);

        let fetched = db.get_execution(&exec.id)?.expect("execution");
        assert_eq!(fetched.status, ExecutionStatus::Completed);
        assert!(fetched.completed_at.is_some());
        assert!(db.finish_execution(&exec.id, ExecutionStatus::Running, None).is_err());
        Ok(())
    }

    #[test]
    fn test_recovery_sweep_fails_running() -> Result<()> {
        let db = LedgerDb::new_in_memory()?;
        let a = db.create_brain_session("main-1", "review-1")?;
        let b = db.create_brain_session("main-2", "review-2")?;
        db.start_execution(&a.id, &[1], "p")?;
        let (done, _) = db.start_execution(&b.id, &[1], "p")?;
        db.finish_execution(&done.id, ExecutionStatus::Completed, None)?;
        db.start_execution(&b.id, &[2], "p")?;

        assert_eq!(db.fail_running_executions(INTERRUPTED_NOTE)?, 2);
        assert!(db.running_execution(&a.id)?.is_none());
        assert_eq!(db.fail_running_executions(INTERRUPTED_NOTE)?, 0);

        let finished = db.get_execution(&done.id)?.expect("execution");
        assert_eq!(finished.status, ExecutionStatus::Completed);
        Ok(())
    }

    #[test]
    fn test_session_detail() -> Result<()> {
        let db = LedgerDb::new_in_memory()?;
        let session = db.create_brain_session("main-1", "review-1")?;
        db.insert_rounds(&session.id, &[round(1, true)])?;
        db.start_execution(&session.id, &[1], "p")?;

        let detail = db.session_detail(&session.id)?.expect("detail");
        assert_eq!(detail.rounds.len(), 1);
        assert_eq!(detail.executions.len(), 1);
        assert!(db.session_detail("missing")?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_handle_runs_on_blocking_pool() -> Result<()> {
        let handle = DbHandle::new(LedgerDb::new_in_memory()?);
        let session = handle
            .call(|db| db.create_brain_session("main-1", "review-1"))
            .await?;
        let id = session.id.clone();
        let fetched = handle.call(move |db| db.get_brain_session(&id)).await?;
        assert_eq!(fetched.map(|s| s.id), Some(session.id));
        Ok(())
    }
}
