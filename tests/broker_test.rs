//! End-to-end broker tests against a stub provisioner

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use boxgate::config::Args;
use boxgate::context::AppContext;
use boxgate::db::SessionStatus;
use boxgate::error::GatewayError;
use boxgate::provision::{BoxProvisioner, ConnectionInfo};
use boxgate::token;
use clap::Parser;

const SECRET: &str = "integration-secret";

/// Stub collaborator: fixed credentials, counting destroys.
struct StubProvisioner {
    provisions: AtomicUsize,
    destroys: AtomicUsize,
    fail_provision: bool,
}

impl StubProvisioner {
    fn new() -> Self {
        Self {
            provisions: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            fail_provision: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail_provision: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl BoxProvisioner for StubProvisioner {
    async fn provision(
        &self,
        _session_id: &str,
        _pubkey: &str,
        _profile: &str,
        _ttl_seconds: i64,
    ) -> boxgate::Result<ConnectionInfo> {
        if self.fail_provision {
            return Err(GatewayError::ProvisioningFailed("no capacity".to_string()));
        }
        self.provisions.fetch_add(1, Ordering::SeqCst);
        Ok(ConnectionInfo {
            host: "10.0.0.5".to_string(),
            port: 2222,
            user: "box".to_string(),
        })
    }

    async fn destroy(&self, _container_name: &str) -> boxgate::Result<()> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn setup(provisioner: Arc<StubProvisioner>) -> (TempDir, Arc<AppContext>) {
    let dir = TempDir::new().unwrap();
    let args = Args::parse_from([
        "boxgate",
        "--gateway-secret",
        SECRET,
        "--sqlite-path",
        dir.path().join("sessions.db").to_str().unwrap(),
        "--recordings-dir",
        dir.path().join("recordings").to_str().unwrap(),
    ]);
    let ctx = AppContext::open_with_provisioner(&args, provisioner as Arc<dyn BoxProvisioner>)
        .await
        .unwrap();
    (dir, Arc::new(ctx))
}

fn redeem_request(token: &str) -> boxgate::broker::RedeemRequest {
    serde_json::from_value(serde_json::json!({
        "token": token,
        "pubkey": "ssh-ed25519 AAAAC3Nza... tester@example.com",
        "profile": "dev",
        "ttl": 600,
    }))
    .unwrap()
}

#[tokio::test]
async fn redeem_grants_session_and_list_shows_time_left() {
    let provisioner = Arc::new(StubProvisioner::new());
    let (_dir, ctx) = setup(Arc::clone(&provisioner)).await;

    let invite = token::issue(SECRET, "dev", 600, None, None).unwrap();
    let response = ctx.broker.redeem(&redeem_request(&invite)).await.unwrap();

    assert_eq!(response.host, "10.0.0.5");
    assert_eq!(response.port, 2222);
    assert_eq!(response.user, "box");
    assert!(!response.session_id.is_empty());
    assert_eq!(provisioner.provisions.load(Ordering::SeqCst), 1);

    let sessions = ctx.broker.list(None).await.unwrap();
    assert_eq!(sessions.len(), 1);
    let summary = &sessions[0];
    assert_eq!(summary.session.session_id, response.session_id);
    assert_eq!(summary.session.status, SessionStatus::Active);

    let time_left = summary.time_left.unwrap();
    assert!(time_left <= 600, "time_left {time_left} should be <= 600");
    assert!(time_left > 590, "time_left {time_left} should be > 590");

    ctx.close();
}

#[tokio::test]
async fn bad_token_is_unauthorized_and_persists_nothing() {
    let provisioner = Arc::new(StubProvisioner::new());
    let (_dir, ctx) = setup(Arc::clone(&provisioner)).await;

    for bad in [
        "not-a-token",
        "dev:600:1234567890:none:none:deadbeef",
        "",
    ] {
        let err = ctx.broker.redeem(&redeem_request(bad)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unauthorized));
    }

    assert_eq!(provisioner.provisions.load(Ordering::SeqCst), 0);
    assert!(ctx.broker.list(None).await.unwrap().is_empty());
    assert_eq!(ctx.metrics.snapshot().redemptions_rejected, 3);
}

#[tokio::test]
async fn provisioning_failure_persists_nothing() {
    let (_dir, ctx) = setup(Arc::new(StubProvisioner::failing())).await;

    let invite = token::issue(SECRET, "dev", 600, None, None).unwrap();
    let err = ctx.broker.redeem(&redeem_request(&invite)).await.unwrap_err();
    assert!(matches!(err, GatewayError::ProvisioningFailed(_)));

    assert!(ctx.broker.list(None).await.unwrap().is_empty());
    assert_eq!(ctx.scheduler.pending_count(), 0);
}

#[tokio::test]
async fn destroy_is_idempotent_across_calls() {
    let provisioner = Arc::new(StubProvisioner::new());
    let (_dir, ctx) = setup(Arc::clone(&provisioner)).await;

    let invite = token::issue(SECRET, "dev", 600, None, None).unwrap();
    let granted = ctx.broker.redeem(&redeem_request(&invite)).await.unwrap();

    let first = ctx.broker.destroy(&granted.session_id).await.unwrap();
    assert!(!first.already_destroyed);
    let row = ctx.store.get(&granted.session_id).await.unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Destroyed);
    let ended_at = row.ended_at.clone();

    let second = ctx.broker.destroy(&granted.session_id).await.unwrap();
    assert!(second.already_destroyed);
    let row = ctx.store.get(&granted.session_id).await.unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Destroyed);
    assert_eq!(row.ended_at, ended_at);

    assert_eq!(provisioner.destroys.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_pool_surfaces_and_is_counted() {
    let dir = TempDir::new().unwrap();
    let args = Args::parse_from([
        "boxgate",
        "--gateway-secret",
        SECRET,
        "--sqlite-path",
        dir.path().join("sessions.db").to_str().unwrap(),
        "--recordings-dir",
        dir.path().join("recordings").to_str().unwrap(),
        "--db-max-connections",
        "1",
        "--db-initial-warm",
        "1",
        "--db-acquire-timeout-secs",
        "1",
    ]);
    let provisioner = Arc::new(StubProvisioner::new());
    let ctx = AppContext::open_with_provisioner(&args, provisioner as Arc<dyn BoxProvisioner>)
        .await
        .unwrap();

    // Hold the pool's only connection so the broker's store call starves
    let held = ctx.pool.acquire().await.unwrap();
    let err = ctx.broker.list(None).await.unwrap_err();
    assert!(matches!(err, GatewayError::PoolExhausted(_)));
    assert_eq!(ctx.metrics.snapshot().pool_exhaustions, 1);

    // Capacity returns with the release
    drop(held);
    assert!(ctx.broker.list(None).await.unwrap().is_empty());
    assert_eq!(ctx.metrics.snapshot().pool_exhaustions, 1);
}

#[tokio::test]
async fn destroy_unknown_session_is_not_found() {
    let (_dir, ctx) = setup(Arc::new(StubProvisioner::new())).await;
    let err = ctx.broker.destroy("999999").await.unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}

#[tokio::test]
async fn explicit_destroy_races_scheduler_fire_safely() {
    let provisioner = Arc::new(StubProvisioner::new());
    let (_dir, ctx) = setup(Arc::clone(&provisioner)).await;

    let invite = token::issue(SECRET, "dev", 600, None, None).unwrap();
    let granted = ctx.broker.redeem(&redeem_request(&invite)).await.unwrap();

    // Re-arm with an immediate deadline so the fire path and the
    // explicit destroy run concurrently.
    ctx.scheduler
        .arm(&granted.session_id, &format!("box_{}", granted.session_id), Duration::ZERO);

    let explicit = {
        let ctx = Arc::clone(&ctx);
        let id = granted.session_id.clone();
        tokio::spawn(async move { ctx.broker.destroy(&id).await })
    };

    // Neither path may surface an error to its caller
    explicit.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let row = ctx.store.get(&granted.session_id).await.unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Destroyed);

    // The box was destroyed at least once, and the record is terminal
    assert!(provisioner.destroys.load(Ordering::SeqCst) >= 1);
}
