//! Application context
//!
//! Explicitly constructed wiring for the gateway: pool, store,
//! scheduler, broker, recorder, metrics. Built once at startup and
//! passed where needed; there is no ambient global state. `open`
//! constructs everything, `close` tears it down in order.

use std::sync::Arc;

use tracing::info;

use crate::broker::AccessBroker;
use crate::config::Args;
use crate::db::{ConnectionPool, PoolConfig, SessionStore};
use crate::error::Result;
use crate::metrics::GatewayMetrics;
use crate::provision::{BoxProvisioner, ScriptProvisioner};
use crate::reaper::DestructionScheduler;
use crate::recorder::SessionRecorder;

/// Dependency-injected service graph with explicit lifecycle.
pub struct AppContext {
    pub pool: Arc<ConnectionPool>,
    pub store: Arc<SessionStore>,
    pub scheduler: Arc<DestructionScheduler>,
    pub broker: Arc<AccessBroker>,
    pub recorder: Arc<SessionRecorder>,
    pub metrics: Arc<GatewayMetrics>,
}

impl AppContext {
    /// Wire the full service graph from configuration.
    pub async fn open(args: &Args) -> Result<Self> {
        let provisioner: Arc<dyn BoxProvisioner> = Arc::new(ScriptProvisioner::new(
            args.provisioner_path.clone(),
            args.destroyer_path.clone(),
            args.provision_timeout(),
        ));
        Self::open_with_provisioner(args, provisioner).await
    }

    /// Wire the graph with an injected provisioner (tests use a stub).
    pub async fn open_with_provisioner(
        args: &Args,
        provisioner: Arc<dyn BoxProvisioner>,
    ) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::open(PoolConfig {
            db_path: args.sqlite_path.clone(),
            max_connections: args.db_max_connections,
            acquire_timeout: args.db_acquire_timeout(),
            initial_warm: args.db_initial_warm,
        })?);

        let store = Arc::new(
            SessionStore::open(Arc::clone(&pool), args.recordings_dir.clone()).await?,
        );
        let metrics = Arc::new(GatewayMetrics::new());
        let scheduler = Arc::new(DestructionScheduler::new(
            Arc::clone(&store),
            Arc::clone(&provisioner),
            Arc::clone(&metrics),
        ));
        let broker = Arc::new(AccessBroker::new(
            args.secret(),
            Arc::clone(&store),
            Arc::clone(&scheduler),
            provisioner,
            Arc::clone(&metrics),
        ));
        let recorder = Arc::new(SessionRecorder::new(Arc::clone(&store)));

        info!(db = %args.sqlite_path.display(), "application context opened");
        Ok(Self {
            pool,
            store,
            scheduler,
            broker,
            recorder,
            metrics,
        })
    }

    /// Tear down: abort pending schedules and drain the pool.
    pub fn close(&self) {
        self.scheduler.shutdown();
        self.pool.drain();
        info!("application context closed");
    }
}
