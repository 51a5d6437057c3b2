//! Gateway counters
//!
//! Lock-free counters covering the request, session, and scheduler
//! paths. Exposed as a JSON snapshot on `/metrics`; export beyond that
//! snapshot is out of scope.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters shared across the gateway.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    redemptions_ok: AtomicU64,
    redemptions_rejected: AtomicU64,
    provisioning_failures: AtomicU64,
    sessions_created: AtomicU64,
    sessions_destroyed: AtomicU64,
    scheduler_fires: AtomicU64,
    external_destroy_failures: AtomicU64,
    pool_exhaustions: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub redemptions_ok: u64,
    pub redemptions_rejected: u64,
    pub provisioning_failures: u64,
    pub sessions_created: u64,
    pub sessions_destroyed: u64,
    pub scheduler_fires: u64,
    pub external_destroy_failures: u64,
    pub pool_exhaustions: u64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_redemption_ok(&self) {
        self.redemptions_ok.fetch_add(1, Ordering::Relaxed);
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redemption_rejected(&self) {
        self.redemptions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provisioning_failure(&self) {
        self.provisioning_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_destroyed(&self) {
        self.sessions_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scheduler_fire(&self) {
        self.scheduler_fires.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_external_destroy_failure(&self) {
        self.external_destroy_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_exhaustion(&self) {
        self.pool_exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            redemptions_ok: self.redemptions_ok.load(Ordering::Relaxed),
            redemptions_rejected: self.redemptions_rejected.load(Ordering::Relaxed),
            provisioning_failures: self.provisioning_failures.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_destroyed: self.sessions_destroyed.load(Ordering::Relaxed),
            scheduler_fires: self.scheduler_fires.load(Ordering::Relaxed),
            external_destroy_failures: self.external_destroy_failures.load(Ordering::Relaxed),
            pool_exhaustions: self.pool_exhaustions.load(Ordering::Relaxed),
        }
    }
}
