//! Bounded SQLite connection pool
//!
//! Hides connection creation cost behind reuse while capping concurrent
//! database access. Acquisition blocks the calling task (never the
//! process) and fails with `PoolExhausted` once the configured wait
//! bound elapses. Release is scoped: the RAII guard runs on every exit
//! path, rolls back anything uncommitted, and discards any connection
//! it cannot prove clean.
//!
//! Invariant: idle + outstanding <= max_connections, and a connection
//! is never in the idle set while checked out.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// How long a blocked acquirer sleeps between capacity checks.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum connections, idle plus checked out.
    pub max_connections: usize,
    /// How long `acquire` may wait for capacity.
    pub acquire_timeout: Duration,
    /// Connections pre-created at open (capped at `max_connections`).
    pub initial_warm: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/tmp/sshbox_sessions.db"),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            initial_warm: 3,
        }
    }
}

struct PoolInner {
    idle: Vec<Connection>,
    /// Idle plus checked out.
    total: usize,
    accepting: bool,
}

/// Bounded pool of reusable SQLite connections.
pub struct ConnectionPool {
    inner: Arc<Mutex<PoolInner>>,
    config: PoolConfig,
}

impl ConnectionPool {
    /// Open the pool, pre-creating `initial_warm` connections.
    pub fn open(config: PoolConfig) -> Result<Self> {
        if config.max_connections == 0 {
            return Err(GatewayError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }

        let warm = config.initial_warm.min(config.max_connections);
        let mut idle = Vec::with_capacity(warm);
        for _ in 0..warm {
            idle.push(open_connection(&config.db_path)?);
        }
        debug!(warm, max = config.max_connections, "connection pool opened");

        let total = idle.len();
        Ok(Self {
            inner: Arc::new(Mutex::new(PoolInner {
                idle,
                total,
                accepting: true,
            })),
            config,
        })
    }

    /// Acquire a connection, waiting up to `acquire_timeout` for capacity.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        loop {
            enum Checkout {
                Ready(Connection),
                Create,
                Full,
            }

            let state = {
                let mut inner = self.lock()?;
                if !inner.accepting {
                    return Err(GatewayError::StoreUnavailable("pool is draining".to_string()));
                }
                if let Some(conn) = inner.idle.pop() {
                    Checkout::Ready(conn)
                } else if inner.total < self.config.max_connections {
                    // Reserve the slot before creating outside the lock.
                    inner.total += 1;
                    Checkout::Create
                } else {
                    Checkout::Full
                }
            };

            match state {
                Checkout::Ready(conn) => return Ok(self.guard(conn)),
                Checkout::Create => match open_connection(&self.config.db_path) {
                    Ok(conn) => return Ok(self.guard(conn)),
                    Err(e) => {
                        if let Ok(mut inner) = self.lock() {
                            inner.total -= 1;
                        }
                        return Err(e);
                    }
                },
                Checkout::Full => {
                    if Instant::now() >= deadline {
                        return Err(GatewayError::PoolExhausted(self.config.acquire_timeout));
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Close every idle connection and stop accepting acquisitions.
    /// Outstanding guards close their connections on release.
    pub fn drain(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.accepting = false;
            let drained = inner.idle.len();
            inner.total -= drained;
            inner.idle.clear();
            debug!(drained, "connection pool drained");
        }
    }

    /// Current (idle, total) counts. Used by tests and the metrics snapshot.
    pub fn counts(&self) -> (usize, usize) {
        self.lock()
            .map(|inner| (inner.idle.len(), inner.total))
            .unwrap_or((0, 0))
    }

    fn guard(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            max_connections: self.config.max_connections,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PoolInner>> {
        self.inner
            .lock()
            .map_err(|e| GatewayError::Internal(format!("pool lock poisoned: {e}")))
    }
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .map_err(|e| GatewayError::StoreUnavailable(format!("failed to open SQLite: {e}")))?;
    // WAL for concurrent readers alongside the writer
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
        .map_err(|e| GatewayError::StoreUnavailable(format!("failed to set PRAGMA: {e}")))?;
    Ok(conn)
}

/// RAII handle to a checked-out connection.
///
/// On drop: rolls back any open transaction; a connection that cannot
/// be proven clean is closed instead of pooled.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<Mutex<PoolInner>>,
    max_connections: usize,
}

// Manual impl: the raw connection and pool handle are not Debug.
impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("live", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken only in drop")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken only in drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        let clean = if conn.is_autocommit() {
            true
        } else {
            match conn.execute_batch("ROLLBACK") {
                Ok(()) => true,
                Err(e) => {
                    warn!("rollback failed, discarding connection: {e}");
                    false
                }
            }
        };

        let Ok(mut inner) = self.pool.lock() else {
            return;
        };
        if clean && inner.accepting && inner.idle.len() < self.max_connections {
            inner.idle.push(conn);
        } else {
            // Closed, not pooled: dirty, draining, or shrink-after-burst.
            inner.total -= 1;
        }
    }
}
