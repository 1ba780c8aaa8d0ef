use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::{broadcast, Mutex};

use crate::models::realtime::RealtimeEvent;
use crate::utils::clock::Clock;

pub mod chat;
pub mod ledger;
pub mod memory;
pub mod notifications;
pub mod push;
pub mod realtime;
pub mod referrals;
pub mod resources;
pub mod users;
pub mod votes;

pub use chat::ChatRepository;
pub use ledger::LedgerRepository;
pub use notifications::NotificationRepository;
pub use realtime::RealtimeSource;
pub use referrals::ReferralRepository;
pub use resources::ResourceRepository;
pub use users::UserRepository;
pub use votes::VoteRepository;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Insufficient credits: balance {balance}, requested {requested}")]
    InsufficientCredits { balance: i64, requested: i64 },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl RepositoryError {
    /// Maps unique-constraint violations onto `Conflict` so callers can
    /// treat them as no-ops.
    pub(crate) fn from_insert(e: sqlx::Error, what: &str) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("{} already exists", what))
            }
            _ => RepositoryError::Database(e),
        }
    }
}

/// Everything the services need from a backend.
pub trait Store:
    UserRepository
    + LedgerRepository
    + ReferralRepository
    + VoteRepository
    + ResourceRepository
    + ChatRepository
    + NotificationRepository
    + RealtimeSource
{
}

impl<T> Store for T where
    T: UserRepository
        + LedgerRepository
        + ReferralRepository
        + VoteRepository
        + ResourceRepository
        + ChatRepository
        + NotificationRepository
        + RealtimeSource
{
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().hyphenated().to_string()
}

#[derive(Clone)]
pub struct PgStore {
    conn: PgPool,
}

impl PgStore {
    pub fn new(conn: PgPool) -> Self {
        PgStore { conn }
    }

    pub async fn migrate(&self) -> Result<(), anyhow::Error> {
        sqlx::migrate!("./migrations").run(&self.conn).await?;
        Ok(())
    }
}

/// In-process backend with the same semantics as `PgStore`. One mutex
/// guards every table, so each repository call is atomic.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<memory::MemoryState>>,
    events: broadcast::Sender<RealtimeEvent>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(1024);

        MemoryStore {
            state: Arc::new(Mutex::new(memory::MemoryState::default())),
            events,
            clock,
        }
    }

    fn publish(&self, event: RealtimeEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
