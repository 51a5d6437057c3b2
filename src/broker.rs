//! Access broker - redeems invites for provisioned boxes
//!
//! Orchestrates the grant pipeline: verify token, provision, persist,
//! arm destruction. Per-session state machine:
//!
//! ```text
//! requested -> provisioning -> active -> (ended | destroyed)
//! ```
//!
//! `requested` and `provisioning` are transient; persistence begins at
//! `active`. Nothing is persisted when provisioning fails, so a failed
//! redemption can simply be retried with a fresh token.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{NewSession, SessionRow, SessionStatus, SessionStore};
use crate::error::{GatewayError, Result};
use crate::metrics::GatewayMetrics;
use crate::provision::BoxProvisioner;
use crate::reaper::DestructionScheduler;
use crate::token;

/// Redemption request: a token plus the client's SSH public key.
#[derive(Debug, Clone, Deserialize)]
pub struct RedeemRequest {
    pub token: String,
    pub pubkey: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_ttl")]
    pub ttl: i64,
}

fn default_profile() -> String {
    "dev".to_string()
}

fn default_ttl() -> i64 {
    1800
}

/// Connection credentials plus the granted session id.
#[derive(Debug, Clone, Serialize)]
pub struct RedeemResponse {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub session_id: String,
}

/// Outcome of an explicit destroy request.
#[derive(Debug, Clone, Serialize)]
pub struct DestroyResponse {
    pub session_id: String,
    pub message: String,
    pub already_destroyed: bool,
}

/// Session summary with derived time remaining.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: SessionRow,
    /// Seconds until scheduled destruction; only present while active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_left: Option<i64>,
}

/// Orchestrates redemption, destruction, and listing.
///
/// All collaborators are injected at construction; the broker holds no
/// mutable state of its own.
pub struct AccessBroker {
    secret: String,
    store: Arc<SessionStore>,
    scheduler: Arc<DestructionScheduler>,
    provisioner: Arc<dyn BoxProvisioner>,
    metrics: Arc<GatewayMetrics>,
}

impl AccessBroker {
    pub fn new(
        secret: String,
        store: Arc<SessionStore>,
        scheduler: Arc<DestructionScheduler>,
        provisioner: Arc<dyn BoxProvisioner>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            secret,
            store,
            scheduler,
            provisioner,
            metrics,
        }
    }

    /// Redeem an invite token for a freshly provisioned box.
    pub async fn redeem(&self, request: &RedeemRequest) -> Result<RedeemResponse> {
        let fields = match token::verify(&self.secret, &request.token) {
            Ok(fields) => fields,
            Err(rejection) => {
                // The reason stays in the logs; the caller learns only
                // that the token was rejected.
                warn!(reason = rejection.as_str(), "token rejected");
                self.metrics.record_redemption_rejected();
                return Err(GatewayError::Unauthorized);
            }
        };

        // The token is authoritative for the TTL; the request field is
        // wire-compat only.
        let ttl_seconds = fields.ttl_seconds;
        if request.ttl != ttl_seconds {
            warn!(
                requested = request.ttl,
                granted = ttl_seconds,
                "request ttl disagrees with token, using token"
            );
        }

        let session_id = generate_session_id();
        let container_name = format!("box_{session_id}");
        info!(
            session_id = %session_id,
            profile = %request.profile,
            ttl = ttl_seconds,
            "redeeming invite"
        );

        let connection = self
            .provisioner
            .provision(&session_id, &request.pubkey, &request.profile, ttl_seconds)
            .await
            .inspect_err(|e| {
                self.metrics.record_provisioning_failure();
                warn!(session_id = %session_id, "provisioning failed: {e}");
            })?;

        self.store
            .create_session(&NewSession {
                session_id: session_id.clone(),
                container_name: container_name.clone(),
                ssh_host: Some(connection.host.clone()),
                ssh_port: Some(i64::from(connection.port)),
                ssh_user: Some(connection.user.clone()),
                profile: request.profile.clone(),
                ttl_seconds,
                user_id: None,
                invited_by: Some(fields.recipient_digest.clone()),
                allowed_actions: Vec::new(),
            })
            .await
            .inspect_err(|e| self.note_store_pressure(e))?;

        self.scheduler.arm(
            &session_id,
            &container_name,
            std::time::Duration::from_secs(ttl_seconds.max(0) as u64),
        );
        self.metrics.record_redemption_ok();

        info!(
            session_id = %session_id,
            host = %connection.host,
            port = connection.port,
            "session granted"
        );
        Ok(RedeemResponse {
            host: connection.host,
            port: connection.port,
            user: connection.user,
            session_id,
        })
    }

    /// Explicitly destroy a session. Idempotent: destroying an already
    /// destroyed session succeeds without side effects.
    pub async fn destroy(&self, session_id: &str) -> Result<DestroyResponse> {
        let session = self
            .store
            .get(session_id)
            .await
            .inspect_err(|e| self.note_store_pressure(e))?
            .ok_or_else(|| GatewayError::NotFound(session_id.to_string()))?;

        if session.status == SessionStatus::Destroyed {
            return Ok(DestroyResponse {
                session_id: session_id.to_string(),
                message: "Session already destroyed".to_string(),
                already_destroyed: true,
            });
        }

        self.scheduler.cancel(session_id);

        // Mirror the scheduler's policy: the record becomes destroyed
        // whatever the external collaborator reports.
        if let Err(e) = self.provisioner.destroy(&session.container_name).await {
            self.metrics.record_external_destroy_failure();
            warn!(session_id = %session_id, "external destroy failed: {e}");
        }
        self.store
            .mark_destroyed(session_id, Utc::now())
            .await
            .inspect_err(|e| self.note_store_pressure(e))?;
        self.metrics.record_session_destroyed();

        Ok(DestroyResponse {
            session_id: session_id.to_string(),
            message: format!("Session {session_id} destroyed successfully"),
            already_destroyed: false,
        })
    }

    /// List sessions with computed time remaining for active ones.
    pub async fn list(&self, status: Option<SessionStatus>) -> Result<Vec<SessionSummary>> {
        let now = Utc::now();
        let sessions = self
            .store
            .list(status)
            .await
            .inspect_err(|e| self.note_store_pressure(e))?;
        Ok(sessions
            .into_iter()
            .map(|session| {
                let time_left = match (session.status, session.created_at_utc()) {
                    (SessionStatus::Active, Some(created)) => {
                        let expires = created + chrono::Duration::seconds(session.ttl_seconds);
                        Some((expires - now).num_seconds().max(0))
                    }
                    _ => None,
                };
                SessionSummary { session, time_left }
            })
            .collect())
    }

    /// Count pool exhaustion wherever a store call reports it.
    fn note_store_pressure(&self, err: &GatewayError) {
        if matches!(err, GatewayError::PoolExhausted(_)) {
            self.metrics.record_pool_exhaustion();
        }
    }
}

/// Microsecond-precision session id, unique and roughly monotonic.
fn generate_session_id() -> String {
    Utc::now().timestamp_micros().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_monotonic_ish() {
        let a = generate_session_id();
        std::thread::sleep(std::time::Duration::from_micros(10));
        let b = generate_session_id();
        assert_ne!(a, b);
        assert!(b.parse::<i64>().unwrap() > a.parse::<i64>().unwrap());
    }
}
