//! boxgate - access broker for ephemeral SSH sandboxes
//!
//! A holder of a signed invite token redeems it once for connection
//! credentials to a freshly provisioned box, which is torn down
//! automatically after a bounded TTL.
//!
//! ## Components
//!
//! - **token**: stateless capability-token codec (HMAC, freshness window)
//! - **db**: pooled SQLite persistence for sessions and recordings
//! - **reaper**: cancellable one-shot destruction scheduling
//! - **broker**: redemption/destruction/listing orchestration
//! - **provision**: external provisioner/destroyer collaborators
//! - **routes**: HTTP surface (axum)

pub mod broker;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod metrics;
pub mod provision;
pub mod reaper;
pub mod recorder;
pub mod routes;
pub mod token;

pub use config::Args;
pub use context::AppContext;
pub use error::{GatewayError, Result};
