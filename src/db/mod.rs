mod from_row;
pub mod queries;
mod schema;

pub use from_row::*;
pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::rate_limit::SlidingWindowLimiter;
use crate::redeem::CodeHasher;
use crate::tokens::{OfflineTokenIssuer, SessionTokenIssuer, SigningKeyProvider};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub signing: Arc<SigningKeyProvider>,
    pub session_tokens: Arc<SessionTokenIssuer>,
    pub offline_tokens: Arc<OfflineTokenIssuer>,
    pub code_hasher: Arc<CodeHasher>,
    pub redeem_limiter: Arc<SlidingWindowLimiter>,
    /// Auto-resolve reclaim threshold (minutes).
    pub stale_threshold_minutes: i64,
    pub dev_mode: bool,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    // Immediate transactions from concurrent workers need a busy timeout,
    // or a second writer fails instead of waiting for the lock.
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|conn| conn.busy_timeout(std::time::Duration::from_secs(5)));
    Pool::builder().max_size(10).build(manager)
}
