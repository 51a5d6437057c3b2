//! Configuration for boxgate
//!
//! CLI arguments and environment variable handling using clap. The env
//! names keep the operator surface of the original deployment
//! (`GATEWAY_SECRET`, `PROVISIONER_PATH`, `SQLITE_PATH`, ...).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// boxgate - access broker for ephemeral SSH sandboxes
#[derive(Parser, Debug, Clone)]
#[command(name = "boxgate")]
#[command(about = "Gateway brokering capability-gated access to ephemeral SSH boxes")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Shared secret for invite token signing (required in production)
    #[arg(long, env = "GATEWAY_SECRET")]
    pub gateway_secret: Option<String>,

    /// Enable development mode (allows a default insecure secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Path to the SQLite session database
    #[arg(long, env = "SQLITE_PATH", default_value = "/tmp/sshbox_sessions.db")]
    pub sqlite_path: PathBuf,

    /// Directory for session recording artifacts
    #[arg(long, env = "RECORDINGS_DIR", default_value = "/tmp/sshbox_recordings")]
    pub recordings_dir: PathBuf,

    /// Provisioning script invoked as (session_id, pubkey, profile, ttl)
    #[arg(long, env = "PROVISIONER_PATH", default_value = "./scripts/box-provision.sh")]
    pub provisioner_path: PathBuf,

    /// Destroy script invoked as (container_name)
    #[arg(long, env = "DESTROYER_PATH", default_value = "./scripts/box-destroy.sh")]
    pub destroyer_path: PathBuf,

    /// Provisioner call timeout in milliseconds
    #[arg(long, env = "PROVISION_TIMEOUT_MS", default_value = "30000")]
    pub provision_timeout_ms: u64,

    /// Maximum pooled database connections
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value = "10")]
    pub db_max_connections: usize,

    /// How long a request may wait for a database connection, in seconds
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_SECS", default_value = "30")]
    pub db_acquire_timeout_secs: u64,

    /// Database connections pre-created at startup
    #[arg(long, env = "DB_INITIAL_WARM", default_value = "3")]
    pub db_initial_warm: usize,

    /// Days to keep terminal sessions before the retention sweep
    #[arg(long, env = "RETENTION_DAYS", default_value = "7")]
    pub retention_days: u32,

    /// Interval between retention sweeps, in seconds
    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value = "3600")]
    pub cleanup_interval_secs: u64,

    /// Re-arm destruction for active sessions found at startup
    #[arg(long, env = "RECOVER_ON_START", default_value = "true")]
    pub recover_on_start: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Effective token secret (default only in dev mode).
    pub fn secret(&self) -> String {
        if self.dev_mode {
            self.gateway_secret
                .clone()
                .unwrap_or_else(|| "dev-only-insecure-secret".to_string())
        } else {
            self.gateway_secret.clone().unwrap_or_default()
        }
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_millis(self.provision_timeout_ms)
    }

    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.db_acquire_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.gateway_secret.as_deref().unwrap_or("").is_empty() {
            return Err("GATEWAY_SECRET is required in production mode".to_string());
        }
        if self.db_max_connections == 0 {
            return Err("DB_MAX_CONNECTIONS must be at least 1".to_string());
        }
        if self.db_initial_warm > self.db_max_connections {
            return Err("DB_INITIAL_WARM must not exceed DB_MAX_CONNECTIONS".to_string());
        }
        Ok(())
    }
}
