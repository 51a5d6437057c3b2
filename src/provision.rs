//! External provisioning collaborators
//!
//! The actual sandbox lifecycle is owned by operator-supplied scripts;
//! the gateway only invokes them and interprets exit status plus JSON
//! stdout. [`BoxProvisioner`] is the seam: production wires in
//! [`ScriptProvisioner`], tests wire in an in-process stub.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// Connection credentials returned by the provisioner.
///
/// Extra fields in the script output are tolerated; these three are
/// required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub user: String,
}

/// External sandbox lifecycle collaborator.
#[async_trait]
pub trait BoxProvisioner: Send + Sync {
    /// Provision a sandbox for a session. Returns connection credentials.
    async fn provision(
        &self,
        session_id: &str,
        pubkey: &str,
        profile: &str,
        ttl_seconds: i64,
    ) -> Result<ConnectionInfo>;

    /// Tear down a sandbox by container name.
    async fn destroy(&self, container_name: &str) -> Result<()>;
}

/// Shells out to the operator-configured provision/destroy scripts.
pub struct ScriptProvisioner {
    provision_path: PathBuf,
    destroy_path: PathBuf,
    timeout: Duration,
}

impl ScriptProvisioner {
    pub fn new(provision_path: PathBuf, destroy_path: PathBuf, timeout: Duration) -> Self {
        Self {
            provision_path,
            destroy_path,
            timeout,
        }
    }

    async fn run(&self, program: &Path, args: &[&str]) -> Result<Output> {
        let fut = Command::new(program).args(args).output();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(GatewayError::ProvisioningFailed(format!(
                "failed to spawn {}: {e}",
                program.display()
            ))),
            Err(_) => Err(GatewayError::ProvisioningTimeout(self.timeout)),
        }
    }
}

#[async_trait]
impl BoxProvisioner for ScriptProvisioner {
    async fn provision(
        &self,
        session_id: &str,
        pubkey: &str,
        profile: &str,
        ttl_seconds: i64,
    ) -> Result<ConnectionInfo> {
        let ttl = ttl_seconds.to_string();
        let output = self
            .run(&self.provision_path, &[session_id, pubkey, profile, &ttl])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::ProvisioningFailed(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let info: ConnectionInfo = serde_json::from_str(stdout.trim()).map_err(|e| {
            warn!(session_id = %session_id, "provisioner returned unparsable output: {e}");
            GatewayError::ProvisioningFailed("invalid response from provisioner".to_string())
        })?;

        debug!(session_id = %session_id, host = %info.host, port = info.port, "box provisioned");
        Ok(info)
    }

    async fn destroy(&self, container_name: &str) -> Result<()> {
        let output = self.run(&self.destroy_path, &[container_name]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::ProvisioningFailed(format!(
                "destroy script failed for {container_name}: {}",
                stderr.trim()
            )));
        }
        debug!(container = %container_name, "box destroyed");
        Ok(())
    }
}
