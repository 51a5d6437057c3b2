//! Session store - durable CRUD for sessions and recordings
//!
//! Owns the `sessions` and `session_recordings` tables. Sessions are
//! mutated only through these operations; status transitions into a
//! terminal state (`ended`, `destroyed`) happen at most once, and
//! re-invoking a transition on an already-terminal session is a no-op
//! success so the two destroy paths (scheduler fire, explicit request)
//! can race harmlessly.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::pool::ConnectionPool;
use super::schema;
use crate::error::{GatewayError, Result};

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Provisioned and reachable.
    Active,
    /// Recording finalized without destruction (terminal).
    Ended,
    /// Torn down (terminal).
    Destroyed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Destroyed => "destroyed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Destroyed)
    }
}

impl FromStr for SessionStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "ended" => Ok(SessionStatus::Ended),
            "destroyed" => Ok(SessionStatus::Destroyed),
            other => Err(GatewayError::Internal(format!("unknown session status: {other}"))),
        }
    }
}

/// Session row from the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub session_id: String,
    pub container_name: String,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<i64>,
    pub ssh_user: Option<String>,
    pub profile: String,
    pub ttl_seconds: i64,
    pub status: SessionStatus,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub user_id: Option<String>,
    pub invited_by: Option<String>,
    #[serde(default)]
    pub allowed_actions: Vec<String>,
}

impl SessionRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        let status_str: String = row.get("status")?;
        let actions_json: Option<String> = row.get("allowed_actions")?;
        Ok(Self {
            session_id: row.get("session_id")?,
            container_name: row.get("container_name")?,
            ssh_host: row.get("ssh_host")?,
            ssh_port: row.get("ssh_port")?,
            ssh_user: row.get("ssh_user")?,
            profile: row.get("profile")?,
            ttl_seconds: row.get("ttl")?,
            status: status_str.parse().unwrap_or(SessionStatus::Active),
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            ended_at: row.get("ended_at")?,
            user_id: row.get("user_id")?,
            invited_by: row.get("invited_by")?,
            allowed_actions: actions_json
                .and_then(|j| serde_json::from_str(&j).ok())
                .unwrap_or_default(),
        })
    }

    /// Parsed creation time, for TTL arithmetic.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Input for creating a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: String,
    pub container_name: String,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<i64>,
    pub ssh_user: Option<String>,
    pub profile: String,
    pub ttl_seconds: i64,
    pub user_id: Option<String>,
    pub invited_by: Option<String>,
    pub allowed_actions: Vec<String>,
}

/// Recording artifact metadata, written once the transcript exists and
/// its size is known.
#[derive(Debug, Clone)]
pub struct RecordingMetadata {
    pub recording_path: PathBuf,
    pub timing_path: Option<PathBuf>,
    pub size_bytes: i64,
    pub duration_seconds: i64,
}

/// Recording row from the database.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingRow {
    pub session_id: String,
    pub recording_path: String,
    pub timing_path: Option<String>,
    pub recording_size: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub created_at: String,
}

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub sessions_purged: usize,
    pub files_removed: usize,
    pub file_warnings: usize,
}

/// Current time in the storage timestamp format.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn fmt_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn store_err(e: rusqlite::Error) -> GatewayError {
    GatewayError::StoreUnavailable(format!("database error: {e}"))
}

/// Durable, transactional CRUD over sessions and recordings.
///
/// Every access goes through the connection pool; there is no shared
/// in-process session cache, so reads reflect committed state.
pub struct SessionStore {
    pool: Arc<ConnectionPool>,
    recordings_dir: PathBuf,
}

impl SessionStore {
    /// Open the store: initialize schema and the recordings directory.
    pub async fn open(pool: Arc<ConnectionPool>, recordings_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&recordings_dir)?;
        let conn = pool.acquire().await?;
        schema::init_schema(&conn)?;
        drop(conn);
        info!(recordings_dir = %recordings_dir.display(), "session store opened");
        Ok(Self { pool, recordings_dir })
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    /// Insert a new session row. Fails with `DuplicateSession` if the
    /// session id already exists.
    pub async fn create_session(&self, new: &NewSession) -> Result<()> {
        let conn = self.pool.acquire().await?;
        let actions_json = if new.allowed_actions.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&new.allowed_actions).map_err(|e| {
                GatewayError::Internal(format!("failed to encode allowed_actions: {e}"))
            })?)
        };

        let result = conn.execute(
            "INSERT INTO sessions
             (session_id, container_name, ssh_host, ssh_port, ssh_user, profile, ttl,
              status, created_at, user_id, invited_by, allowed_actions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                new.session_id,
                new.container_name,
                new.ssh_host,
                new.ssh_port,
                new.ssh_user,
                new.profile,
                new.ttl_seconds,
                SessionStatus::Active.as_str(),
                now_rfc3339(),
                new.user_id,
                new.invited_by,
                actions_json,
            ],
        );

        match result {
            Ok(_) => {
                debug!(session_id = %new.session_id, profile = %new.profile, "session created");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(GatewayError::DuplicateSession(new.session_id.clone()))
            }
            Err(e) => Err(store_err(e)),
        }
    }

    /// Fetch a session by id.
    pub async fn get(&self, session_id: &str) -> Result<Option<SessionRow>> {
        let conn = self.pool.acquire().await?;
        let mut stmt = conn
            .prepare("SELECT * FROM sessions WHERE session_id = ?1")
            .map_err(store_err)?;
        let mut rows = stmt.query(params![session_id]).map_err(store_err)?;
        match rows.next().map_err(store_err)? {
            Some(row) => Ok(Some(SessionRow::from_row(row).map_err(store_err)?)),
            None => Ok(None),
        }
    }

    /// List sessions, newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<SessionStatus>) -> Result<Vec<SessionRow>> {
        let conn = self.pool.acquire().await?;
        let mut out = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn
                    .prepare("SELECT * FROM sessions WHERE status = ?1 ORDER BY created_at DESC")
                    .map_err(store_err)?;
                let mut rows = stmt.query(params![status.as_str()]).map_err(store_err)?;
                while let Some(row) = rows.next().map_err(store_err)? {
                    out.push(SessionRow::from_row(row).map_err(store_err)?);
                }
            }
            None => {
                let mut stmt = conn
                    .prepare("SELECT * FROM sessions ORDER BY created_at DESC")
                    .map_err(store_err)?;
                let mut rows = stmt.query([]).map_err(store_err)?;
                while let Some(row) = rows.next().map_err(store_err)? {
                    out.push(SessionRow::from_row(row).map_err(store_err)?);
                }
            }
        }
        Ok(out)
    }

    /// Stamp `started_at` (first call wins, later calls are no-ops).
    pub async fn mark_started(&self, session_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        let conn = self.pool.acquire().await?;
        conn.execute(
            "UPDATE sessions SET started_at = ?1
             WHERE session_id = ?2 AND started_at IS NULL",
            params![fmt_rfc3339(started_at), session_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Transition to `ended`. No-op success on terminal or missing rows.
    pub async fn mark_ended(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<()> {
        self.transition(session_id, SessionStatus::Ended, ended_at).await
    }

    /// Transition to `destroyed`. No-op success on terminal or missing rows.
    pub async fn mark_destroyed(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<()> {
        self.transition(session_id, SessionStatus::Destroyed, ended_at).await
    }

    async fn transition(
        &self,
        session_id: &str,
        to: SessionStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.pool.acquire().await?;
        let changed = conn
            .execute(
                "UPDATE sessions SET status = ?1, ended_at = ?2
                 WHERE session_id = ?3 AND status = 'active'",
                params![to.as_str(), fmt_rfc3339(ended_at), session_id],
            )
            .map_err(store_err)?;
        if changed > 0 {
            info!(session_id = %session_id, status = to.as_str(), "session transitioned");
        } else {
            debug!(session_id = %session_id, status = to.as_str(), "transition was a no-op");
        }
        Ok(())
    }

    /// Attach recording metadata to a session. Exactly one recording per
    /// session; a second attach is a `DuplicateSession` error.
    pub async fn attach_recording(
        &self,
        session_id: &str,
        metadata: &RecordingMetadata,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let tx = conn.transaction().map_err(store_err)?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM session_recordings WHERE session_id = ?1)",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        if exists {
            return Err(GatewayError::DuplicateSession(format!(
                "recording already attached for {session_id}"
            )));
        }

        tx.execute(
            "INSERT INTO session_recordings
             (session_id, recording_path, timing_path, recording_size, duration_seconds, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                metadata.recording_path.to_string_lossy(),
                metadata.timing_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                metadata.size_bytes,
                metadata.duration_seconds,
                now_rfc3339(),
            ],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(())
    }

    /// Fetch recording metadata for a session.
    pub async fn get_recording(&self, session_id: &str) -> Result<Option<RecordingRow>> {
        let conn = self.pool.acquire().await?;
        let mut stmt = conn
            .prepare(
                "SELECT session_id, recording_path, timing_path, recording_size,
                        duration_seconds, created_at
                 FROM session_recordings WHERE session_id = ?1",
            )
            .map_err(store_err)?;
        let mut rows = stmt.query(params![session_id]).map_err(store_err)?;
        match rows.next().map_err(store_err)? {
            Some(row) => Ok(Some(RecordingRow {
                session_id: row.get(0).map_err(store_err)?,
                recording_path: row.get(1).map_err(store_err)?,
                timing_path: row.get(2).map_err(store_err)?,
                recording_size: row.get(3).map_err(store_err)?,
                duration_seconds: row.get(4).map_err(store_err)?,
                created_at: row.get(5).map_err(store_err)?,
            })),
            None => Ok(None),
        }
    }

    /// Delete terminal sessions (and their recordings) older than the
    /// retention cutoff. Active sessions are never purged regardless of
    /// age. Artifact removal is best effort: a failed unlink is a
    /// warning, never an abort.
    pub async fn purge_older_than(&self, retention_days: u32) -> Result<PurgeReport> {
        let cutoff = fmt_rfc3339(Utc::now() - chrono::Duration::days(i64::from(retention_days)));
        let mut conn = self.pool.acquire().await?;
        let tx = conn.transaction().map_err(store_err)?;

        let old_ids: Vec<String> = {
            let mut stmt = tx
                .prepare(
                    "SELECT session_id FROM sessions
                     WHERE created_at < ?1 AND status IN ('ended', 'destroyed')",
                )
                .map_err(store_err)?;
            let rows = stmt
                .query_map(params![cutoff], |row| row.get(0))
                .map_err(store_err)?;
            rows.collect::<std::result::Result<_, _>>().map_err(store_err)?
        };

        let mut report = PurgeReport::default();
        for session_id in &old_ids {
            for ext in ["cast", "timing", "json"] {
                let path = self.recordings_dir.join(format!("{session_id}.{ext}"));
                match std::fs::remove_file(&path) {
                    Ok(()) => report.files_removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(path = %path.display(), "failed to remove recording artifact: {e}");
                        report.file_warnings += 1;
                    }
                }
            }

            tx.execute(
                "DELETE FROM session_recordings WHERE session_id = ?1",
                params![session_id],
            )
            .map_err(store_err)?;
            tx.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])
                .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)?;

        report.sessions_purged = old_ids.len();
        if report.sessions_purged > 0 {
            info!(
                purged = report.sessions_purged,
                files = report.files_removed,
                warnings = report.file_warnings,
                "retention sweep complete"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::PoolConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let pool = Arc::new(
            ConnectionPool::open(PoolConfig {
                db_path: dir.path().join("sessions.db"),
                max_connections: 4,
                acquire_timeout: Duration::from_secs(1),
                initial_warm: 1,
            })
            .unwrap(),
        );
        let store = SessionStore::open(pool, dir.path().join("recordings"))
            .await
            .unwrap();
        (dir, store)
    }

    fn sample(id: &str) -> NewSession {
        NewSession {
            session_id: id.to_string(),
            container_name: format!("box_{id}"),
            ssh_host: Some("10.0.0.5".to_string()),
            ssh_port: Some(2222),
            ssh_user: Some("box".to_string()),
            profile: "dev".to_string(),
            ttl_seconds: 600,
            user_id: None,
            invited_by: Some("ops".to_string()),
            allowed_actions: vec!["shell".to_string()],
        }
    }

    #[tokio::test]
    async fn create_and_get() {
        let (_dir, store) = test_store().await;
        store.create_session(&sample("s1")).await.unwrap();

        let row = store.get("s1").await.unwrap().unwrap();
        assert_eq!(row.container_name, "box_s1");
        assert_eq!(row.status, SessionStatus::Active);
        assert_eq!(row.allowed_actions, vec!["shell"]);
        assert!(row.created_at_utc().is_some());

        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_session_is_typed() {
        let (_dir, store) = test_store().await;
        store.create_session(&sample("s1")).await.unwrap();
        let err = store.create_session(&sample("s1")).await.unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateSession(_)));
    }

    #[tokio::test]
    async fn terminal_transitions_are_idempotent() {
        let (_dir, store) = test_store().await;
        store.create_session(&sample("s1")).await.unwrap();

        store.mark_destroyed("s1", Utc::now()).await.unwrap();
        let first = store.get("s1").await.unwrap().unwrap();
        assert_eq!(first.status, SessionStatus::Destroyed);
        let first_ended = first.ended_at.clone();

        // Second invocation is a no-op success and changes nothing
        store.mark_destroyed("s1", Utc::now()).await.unwrap();
        let second = store.get("s1").await.unwrap().unwrap();
        assert_eq!(second.status, SessionStatus::Destroyed);
        assert_eq!(second.ended_at, first_ended);

        // An ended session never becomes destroyed
        store.create_session(&sample("s2")).await.unwrap();
        store.mark_ended("s2", Utc::now()).await.unwrap();
        store.mark_destroyed("s2", Utc::now()).await.unwrap();
        let s2 = store.get("s2").await.unwrap().unwrap();
        assert_eq!(s2.status, SessionStatus::Ended);

        // Missing session is also a no-op
        store.mark_destroyed("nope", Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn list_orders_newest_first_and_filters() {
        let (_dir, store) = test_store().await;
        store.create_session(&sample("s1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.create_session(&sample("s2")).await.unwrap();
        store.mark_destroyed("s1", Utc::now()).await.unwrap();

        let all = store.list(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].session_id, "s2");

        let active = store.list(Some(SessionStatus::Active)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "s2");
    }

    #[tokio::test]
    async fn recording_attaches_exactly_once() {
        let (_dir, store) = test_store().await;
        store.create_session(&sample("s1")).await.unwrap();

        let meta = RecordingMetadata {
            recording_path: store.recordings_dir().join("s1.cast"),
            timing_path: Some(store.recordings_dir().join("s1.timing")),
            size_bytes: 1024,
            duration_seconds: 42,
        };
        store.attach_recording("s1", &meta).await.unwrap();

        let rec = store.get_recording("s1").await.unwrap().unwrap();
        assert_eq!(rec.recording_size, Some(1024));
        assert_eq!(rec.duration_seconds, Some(42));

        let err = store.attach_recording("s1", &meta).await.unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateSession(_)));
    }

    #[tokio::test]
    async fn purge_removes_old_terminal_sessions_only() {
        let (_dir, store) = test_store().await;
        store.create_session(&sample("old-destroyed")).await.unwrap();
        store.create_session(&sample("old-active")).await.unwrap();
        store.mark_destroyed("old-destroyed", Utc::now()).await.unwrap();

        // Backdate both rows eight days
        let eight_days_ago = fmt_rfc3339(Utc::now() - chrono::Duration::days(8));
        {
            let conn = store.pool.acquire().await.unwrap();
            conn.execute(
                "UPDATE sessions SET created_at = ?1",
                params![eight_days_ago],
            )
            .unwrap();
        }

        // Leave an artifact behind for the destroyed session
        let cast = store.recordings_dir().join("old-destroyed.cast");
        std::fs::write(&cast, b"transcript").unwrap();

        let report = store.purge_older_than(7).await.unwrap();
        assert_eq!(report.sessions_purged, 1);
        assert_eq!(report.files_removed, 1);
        assert!(!cast.exists());

        assert!(store.get("old-destroyed").await.unwrap().is_none());
        // Same age, but active: retained
        assert!(store.get("old-active").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_retains_recent_terminal_sessions() {
        let (_dir, store) = test_store().await;
        store.create_session(&sample("fresh")).await.unwrap();
        store.mark_destroyed("fresh", Utc::now()).await.unwrap();

        let report = store.purge_older_than(7).await.unwrap();
        assert_eq!(report.sessions_purged, 0);
        assert!(store.get("fresh").await.unwrap().is_some());
    }
}
