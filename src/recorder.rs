//! Session recorder
//!
//! Prepares transcript/timing artifact paths when a session starts and
//! finalizes the recording when it ends. The actual capture happens
//! outside this process (the session is wrapped by `script` on the
//! box); this service owns the metadata: `started_at` on start, and on
//! finish the true artifact size, the duration, and the `ended` status.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::db::{RecordingMetadata, SessionRow, SessionStore};
use crate::error::{GatewayError, Result};

/// Artifact paths handed back when a recording starts.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingPaths {
    pub session_id: String,
    pub recording_file: PathBuf,
    pub timing_file: PathBuf,
}

/// Finalizes session recordings against the store.
pub struct SessionRecorder {
    store: Arc<SessionStore>,
}

impl SessionRecorder {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    fn cast_path(&self, session_id: &str) -> PathBuf {
        self.store.recordings_dir().join(format!("{session_id}.cast"))
    }

    fn timing_path(&self, session_id: &str) -> PathBuf {
        self.store.recordings_dir().join(format!("{session_id}.timing"))
    }

    /// Start recording: the session must exist; stamps `started_at` and
    /// returns the artifact paths the capture should write to.
    pub async fn start(&self, session_id: &str) -> Result<RecordingPaths> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(session_id.to_string()))?;

        self.store.mark_started(session_id, Utc::now()).await?;
        info!(session_id = %session_id, profile = %session.profile, "recording started");

        Ok(RecordingPaths {
            session_id: session_id.to_string(),
            recording_file: self.cast_path(session_id),
            timing_file: self.timing_path(session_id),
        })
    }

    /// Finish recording: stat the transcript for its true size, attach
    /// the metadata, and mark the session ended. The transcript must
    /// exist by the time this is called so the stored size is accurate.
    pub async fn finish(&self, session_id: &str) -> Result<SessionRow> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(session_id.to_string()))?;

        let cast = self.cast_path(session_id);
        let size_bytes = tokio::fs::metadata(&cast)
            .await
            .map_err(|e| {
                GatewayError::NotFound(format!("transcript missing for {session_id}: {e}"))
            })?
            .len() as i64;

        let ended_at = Utc::now();
        let duration_seconds = session
            .started_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|started| (ended_at - started.with_timezone(&Utc)).num_seconds().max(0))
            .unwrap_or(0);

        let timing = self.timing_path(session_id);
        self.store
            .attach_recording(
                session_id,
                &RecordingMetadata {
                    recording_path: cast,
                    timing_path: timing.exists().then_some(timing),
                    size_bytes,
                    duration_seconds,
                },
            )
            .await?;
        self.store.mark_ended(session_id, ended_at).await?;

        info!(
            session_id = %session_id,
            size_bytes,
            duration_seconds,
            "recording finished"
        );
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| GatewayError::Internal(format!("session {session_id} vanished")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConnectionPool, NewSession, PoolConfig, SessionStatus};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Arc<SessionStore>, SessionRecorder) {
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
        let store = Arc::new(
            SessionStore::open(pool, dir.path().join("recordings"))
                .await
                .unwrap(),
        );
        let recorder = SessionRecorder::new(Arc::clone(&store));
        (dir, store, recorder)
    }

    fn sample(id: &str) -> NewSession {
        NewSession {
            session_id: id.to_string(),
            container_name: format!("box_{id}"),
            ssh_host: None,
            ssh_port: None,
            ssh_user: None,
            profile: "dev".to_string(),
            ttl_seconds: 600,
            user_id: None,
            invited_by: None,
            allowed_actions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn start_requires_existing_session() {
        let (_dir, _store, recorder) = setup().await;
        let err = recorder.start("missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn start_then_finish_records_size_and_ends_session() {
        let (_dir, store, recorder) = setup().await;
        store.create_session(&sample("s1")).await.unwrap();

        let paths = recorder.start("s1").await.unwrap();
        assert!(store.get("s1").await.unwrap().unwrap().started_at.is_some());

        tokio::fs::write(&paths.recording_file, b"spawn sh\nexit\n")
            .await
            .unwrap();

        let row = recorder.finish("s1").await.unwrap();
        assert_eq!(row.status, SessionStatus::Ended);

        let rec = store.get_recording("s1").await.unwrap().unwrap();
        assert_eq!(rec.recording_size, Some(14));
    }

    #[tokio::test]
    async fn finish_without_transcript_fails() {
        let (_dir, store, recorder) = setup().await;
        store.create_session(&sample("s1")).await.unwrap();
        recorder.start("s1").await.unwrap();

        let err = recorder.finish("s1").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
        // Session stays active; nothing was attached
        let row = store.get("s1").await.unwrap().unwrap();
        assert_eq!(row.status, SessionStatus::Active);
    }
}
