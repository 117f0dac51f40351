//! SQLite-backed storage: plans, sessions, events, snapshots.
//!
//! Single `ralph.db` file in WAL mode with foreign keys enforced. One
//! `Store` per process, used only from the controller task — the
//! single-writer model the schema assumes.

use anyhow::Context;
use ralph_core::{
    now_rfc3339, EventKind, EventRecord, PlanRecord, PlanStatus, SessionRecord, SessionStatus,
    SnapshotKind, SnapshotRecord,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Ordered migrations; `schema_meta.version` records how many have run.
/// Migrations are applied inside one transaction on open.
const MIGRATIONS: &[&str] = &["
CREATE TABLE plans (
    id TEXT PRIMARY KEY,
    source_path TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE sessions (
    id TEXT PRIMARY KEY,
    plan_id TEXT NOT NULL REFERENCES plans(id) ON DELETE CASCADE,
    iteration INTEGER NOT NULL,
    prompt TEXT NOT NULL,
    output TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    UNIQUE (plan_id, iteration)
);

CREATE UNIQUE INDEX idx_sessions_one_running
    ON sessions(plan_id) WHERE status = 'running';

CREATE TABLE events (
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    kind TEXT NOT NULL,
    raw TEXT NOT NULL,
    ts TEXT NOT NULL,
    PRIMARY KEY (session_id, seq)
);

CREATE TABLE snapshots (
    id TEXT PRIMARY KEY,
    plan_id TEXT NOT NULL REFERENCES plans(id) ON DELETE CASCADE,
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_snapshots_plan_kind ON snapshots(plan_id, kind);
"];

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create the database, applying pragmas and pending migrations.
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?;
        let store = Self { conn };
        store.apply_pragmas()?;
        store.migrate()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn migrate(&self) -> anyhow::Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )?;
        let version: usize = self
            .conn
            .query_row(
                "SELECT value FROM schema_meta WHERE key = 'version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if version > MIGRATIONS.len() {
            anyhow::bail!(
                "database schema version {version} is newer than this build ({})",
                MIGRATIONS.len()
            );
        }

        for (i, migration) in MIGRATIONS.iter().enumerate().skip(version) {
            tracing::debug!(version = i + 1, "applying schema migration");
            self.conn.execute_batch(&format!(
                "BEGIN;\n{migration}\nINSERT OR REPLACE INTO schema_meta (key, value) \
                 VALUES ('version', '{}');\nCOMMIT;",
                i + 1
            ))?;
        }
        Ok(())
    }

    // ── Plans ──

    pub fn create_plan(&self, plan: &PlanRecord) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO plans (id, source_path, content, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                plan.id,
                plan.source_path,
                plan.content,
                plan.status.as_str(),
                plan.created_at,
                plan.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_plan(&self, id: &str) -> anyhow::Result<Option<PlanRecord>> {
        self.conn
            .query_row(
                "SELECT id, source_path, content, status, created_at, updated_at
                 FROM plans WHERE id = ?1",
                params![id],
                row_to_plan,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_plans(&self) -> anyhow::Result<Vec<PlanRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source_path, content, status, created_at, updated_at
             FROM plans ORDER BY created_at",
        )?;
        let plans = stmt
            .query_map([], row_to_plan)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    pub fn set_plan_status(&self, id: &str, status: PlanStatus) -> anyhow::Result<()> {
        let changed = self.conn.execute(
            "UPDATE plans SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now_rfc3339()],
        )?;
        anyhow::ensure!(changed == 1, "plan not found: {id}");
        Ok(())
    }

    // ── Sessions ──

    /// Insert a new running session. The partial unique index rejects a
    /// second running session for the same plan.
    pub fn create_session(&self, session: &SessionRecord) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO sessions
                 (id, plan_id, iteration, prompt, output, status, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.id,
                session.plan_id,
                session.iteration as i64,
                session.prompt,
                session.output,
                session.status.as_str(),
                session.created_at,
                session.completed_at,
            ],
        )?;
        Ok(())
    }

    /// Move a session to a terminal status, recording the final output.
    pub fn complete_session(
        &self,
        id: &str,
        status: SessionStatus,
        output: Option<&str>,
    ) -> anyhow::Result<()> {
        let changed = self.conn.execute(
            "UPDATE sessions SET status = ?2, output = ?3, completed_at = ?4 WHERE id = ?1",
            params![id, status.as_str(), output, now_rfc3339()],
        )?;
        anyhow::ensure!(changed == 1, "session not found: {id}");
        Ok(())
    }

    pub fn latest_session(&self, plan_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        self.conn
            .query_row(
                "SELECT id, plan_id, iteration, prompt, output, status, created_at, completed_at
                 FROM sessions WHERE plan_id = ?1 ORDER BY iteration DESC LIMIT 1",
                params![plan_id],
                row_to_session,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn sessions_for_plan(&self, plan_id: &str) -> anyhow::Result<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, plan_id, iteration, prompt, output, status, created_at, completed_at
             FROM sessions WHERE plan_id = ?1 ORDER BY iteration",
        )?;
        let sessions = stmt
            .query_map(params![plan_id], row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Iteration index for the next session: max(prior)+1, or 0.
    pub fn next_iteration(&self, plan_id: &str) -> anyhow::Result<u64> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(iteration) FROM sessions WHERE plan_id = ?1",
            params![plan_id],
            |row| row.get(0),
        )?;
        Ok(max.map(|m| m as u64 + 1).unwrap_or(0))
    }

    /// Mark sessions left running by a dead process as cancelled.
    /// Run on open before resuming; returns how many rows changed.
    pub fn recover_interrupted_sessions(&self) -> anyhow::Result<usize> {
        let changed = self.conn.execute(
            "UPDATE sessions SET status = 'cancelled', completed_at = ?1
             WHERE status = 'running'",
            params![now_rfc3339()],
        )?;
        if changed > 0 {
            tracing::warn!(sessions = changed, "recovered interrupted sessions");
        }
        Ok(changed)
    }

    // ── Events ──

    pub fn append_event(&self, event: &EventRecord) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO events (session_id, seq, kind, raw, ts)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.session_id,
                event.seq as i64,
                event.kind.as_str(),
                event.raw,
                event.ts,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_session(&self, session_id: &str) -> anyhow::Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, seq, kind, raw, ts
             FROM events WHERE session_id = ?1 ORDER BY seq",
        )?;
        let events = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        events
            .into_iter()
            .map(|(session_id, seq, kind, raw, ts)| {
                let kind = EventKind::parse(&kind)
                    .ok_or_else(|| anyhow::anyhow!("invalid event kind in row: {kind}"))?;
                Ok(EventRecord {
                    session_id,
                    seq: seq as u64,
                    kind,
                    raw,
                    ts,
                })
            })
            .collect()
    }

    // ── Snapshots ──

    pub fn append_snapshot(&self, snapshot: &SnapshotRecord) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO snapshots (id, plan_id, session_id, kind, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                snapshot.id,
                snapshot.plan_id,
                snapshot.session_id,
                snapshot.kind.as_str(),
                snapshot.content,
                snapshot.created_at,
            ],
        )?;
        Ok(())
    }

    /// Latest snapshot of one kind; absent rows are not an error.
    pub fn latest_snapshot(
        &self,
        plan_id: &str,
        kind: SnapshotKind,
    ) -> anyhow::Result<Option<SnapshotRecord>> {
        self.conn
            .query_row(
                "SELECT id, plan_id, session_id, kind, content, created_at
                 FROM snapshots WHERE plan_id = ?1 AND kind = ?2
                 ORDER BY rowid DESC LIMIT 1",
                params![plan_id, kind.as_str()],
                row_to_snapshot,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn snapshot_history(
        &self,
        plan_id: &str,
        kind: SnapshotKind,
    ) -> anyhow::Result<Vec<SnapshotRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, plan_id, session_id, kind, content, created_at
             FROM snapshots WHERE plan_id = ?1 AND kind = ?2 ORDER BY rowid",
        )?;
        let snapshots = stmt
            .query_map(params![plan_id, kind.as_str()], row_to_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(snapshots)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Merge WAL back into the main DB so users see a single file when idle.
        let _ = self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
    }
}

// ── Row mapping ──

fn row_to_plan(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlanRecord> {
    let status: String = row.get(3)?;
    Ok(PlanRecord {
        id: row.get(0)?,
        source_path: row.get(1)?,
        content: row.get(2)?,
        status: PlanStatus::parse(&status).unwrap_or(PlanStatus::Failed),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    let status: String = row.get(5)?;
    let iteration: i64 = row.get(2)?;
    Ok(SessionRecord {
        id: row.get(0)?,
        plan_id: row.get(1)?,
        iteration: iteration as u64,
        prompt: row.get(3)?,
        output: row.get(4)?,
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Failed),
        created_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRecord> {
    let kind: String = row.get(3)?;
    Ok(SnapshotRecord {
        id: row.get(0)?,
        plan_id: row.get(1)?,
        session_id: row.get(2)?,
        kind: SnapshotKind::parse(&kind).unwrap_or(SnapshotKind::Progress),
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}
