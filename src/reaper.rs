//! Destruction scheduler
//!
//! Guarantees every granted session is eventually torn down without the
//! requester staying connected. Each armed session gets a one-shot
//! deferred task; entries are held in a map so they can be cancelled and
//! inspected, never bare detached timers.
//!
//! On fire the handler reads current status first and skips the
//! external destroy entirely if the session is already terminal (an
//! explicit destroy won the race). The status transition to `destroyed`
//! happens even when the external call fails: a consistent "not usable"
//! record beats a stuck "active" one, and the failure goes to
//! logs/metrics instead of any caller.
//!
//! Pending entries live in process memory; [`DestructionScheduler::recover`]
//! re-arms `active` sessions after a restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::SessionStore;
use crate::error::Result;
use crate::metrics::GatewayMetrics;
use crate::provision::BoxProvisioner;

/// Schedules one-shot deferred destruction per session.
pub struct DestructionScheduler {
    store: Arc<SessionStore>,
    provisioner: Arc<dyn BoxProvisioner>,
    metrics: Arc<GatewayMetrics>,
    /// session_id -> pending fire task
    pending: DashMap<String, JoinHandle<()>>,
}

impl DestructionScheduler {
    pub fn new(
        store: Arc<SessionStore>,
        provisioner: Arc<dyn BoxProvisioner>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            store,
            provisioner,
            metrics,
            pending: DashMap::new(),
        }
    }

    /// Arm a one-shot destruction for a session, firing after `delay`.
    /// Fire-and-forget: the caller does not await the teardown.
    pub fn arm(self: &Arc<Self>, session_id: &str, container_name: &str, delay: Duration) {
        let scheduler = Arc::clone(self);
        let id = session_id.to_string();
        let container = container_name.to_string();

        debug!(session_id = %id, delay_secs = delay.as_secs(), "destruction armed");
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.fire(&task_id, &container).await;
        });

        // Re-arming replaces any previous schedule for the session
        if let Some(previous) = self.pending.insert(id, handle) {
            previous.abort();
        }
    }

    /// Cancel a pending schedule (explicit destroy completed first).
    pub fn cancel(&self, session_id: &str) {
        if let Some((_, handle)) = self.pending.remove(session_id) {
            handle.abort();
            debug!(session_id = %session_id, "pending destruction cancelled");
        }
    }

    /// Number of armed, not-yet-fired schedules.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Abort every pending schedule (process shutdown).
    pub fn shutdown(&self) {
        let count = self.pending.len();
        for entry in self.pending.iter() {
            entry.value().abort();
        }
        self.pending.clear();
        if count > 0 {
            info!(aborted = count, "destruction scheduler shut down");
        }
    }

    /// Re-arm schedules for all active sessions found in the store.
    /// Sessions already past their deadline are armed with zero delay.
    pub async fn recover(self: &Arc<Self>) -> Result<usize> {
        let active = self.store.list(Some(crate::db::SessionStatus::Active)).await?;
        let now = Utc::now();
        let mut recovered = 0;

        for session in &active {
            let remaining = session
                .created_at_utc()
                .map(|created| {
                    let deadline = created + chrono::Duration::seconds(session.ttl_seconds);
                    (deadline - now).num_seconds().max(0) as u64
                })
                .unwrap_or(0);

            self.arm(
                &session.session_id,
                &session.container_name,
                Duration::from_secs(remaining),
            );
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "re-armed destruction for active sessions");
        }
        Ok(recovered)
    }

    async fn fire(&self, session_id: &str, container_name: &str) {
        self.pending.remove(session_id);
        self.metrics.record_scheduler_fire();

        // Check current status first: if an explicit destroy already
        // ran, skip the external call entirely.
        match self.store.get(session_id).await {
            Ok(Some(session)) if session.status.is_terminal() => {
                debug!(session_id = %session_id, "already terminal, skipping external destroy");
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(session_id = %session_id, "scheduled session vanished before fire");
                return;
            }
            Err(e) => {
                // Proceed with the external destroy anyway; the record
                // can be reconciled by the recovery sweep.
                warn!(session_id = %session_id, "status read failed before fire: {e}");
            }
        }

        info!(session_id = %session_id, container = %container_name, "TTL expired, destroying box");
        if let Err(e) = self.provisioner.destroy(container_name).await {
            self.metrics.record_external_destroy_failure();
            error!(session_id = %session_id, "external destroy failed: {e}");
        }

        if let Err(e) = self.store.mark_destroyed(session_id, Utc::now()).await {
            error!(session_id = %session_id, "failed to mark session destroyed: {e}");
        } else {
            self.metrics.record_session_destroyed();
        }
    }
}
