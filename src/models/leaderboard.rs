use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Denormalised ranking row. Display only, the users table is authoritative.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub username: String,
    pub credits: i64,
    pub level: String,
    pub updated_at: DateTime<Utc>,
}
