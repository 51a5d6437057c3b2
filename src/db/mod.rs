//! Persistence layer
//!
//! SQLite-backed storage behind a bounded connection pool. Every access
//! to the database goes through [`pool::ConnectionPool`]; session CRUD
//! lives in [`sessions::SessionStore`].

pub mod pool;
pub mod schema;
pub mod sessions;

pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use sessions::{
    NewSession, PurgeReport, RecordingMetadata, RecordingRow, SessionRow, SessionStatus,
    SessionStore,
};
