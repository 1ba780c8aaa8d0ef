use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ValidationError;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct Resource {
    pub id: String,
    pub uploader_id: String,
    pub title: String,
    pub price: i64,
    pub download_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewResource {
    pub uploader_id: String,
    pub title: String,
    pub price: i64,
}

impl NewResource {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::Empty("title"));
        }
        if self.price < 0 {
            return Err(ValidationError::NegativePrice);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct Purchase {
    pub id: String,
    pub user_id: String,
    pub resource_id: String,
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PurchaseReceipt {
    pub purchase: Purchase,
    pub balance: i64,
}
