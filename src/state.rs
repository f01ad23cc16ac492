use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::auth::{IdentityVerifier, TokenIssuer};
use crate::config::Config;
use crate::mail::Mailer;
use crate::storage::ObjectStore;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Shared handles built once at startup. Nothing here is mutated afterwards.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub tokens: Arc<TokenIssuer>,
    pub storage: Arc<dyn ObjectStore>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub mailer: Arc<dyn Mailer>,
}
