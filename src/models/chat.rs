use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ValidationError;

pub const MAX_MESSAGE_LEN: usize = 4000;
pub const MAX_MESSAGE_ID_LEN: usize = 64;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub is_active: bool,
    pub message_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub content: String,
    pub is_user: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewMessage {
    /// Client-chosen id; resending the same id is a no-op.
    pub id: Option<String>,
    pub content: String,
    pub is_user: bool,
}

impl NewMessage {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.content.trim().is_empty() {
            return Err(ValidationError::Empty("content"));
        }
        if self.content.chars().count() > MAX_MESSAGE_LEN {
            return Err(ValidationError::TooLong("content", MAX_MESSAGE_LEN));
        }
        match self.id.as_deref() {
            Some(id) if id.trim().is_empty() => Err(ValidationError::Empty("id")),
            Some(id) if id.len() > MAX_MESSAGE_ID_LEN => {
                Err(ValidationError::TooLong("id", MAX_MESSAGE_ID_LEN))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AppendedMessage {
    pub message: Message,
    pub inserted: bool,
    pub message_count: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: Option<&str>, content: &str) -> NewMessage {
        NewMessage {
            id: id.map(str::to_string),
            content: content.to_string(),
            is_user: true,
        }
    }

    #[test]
    fn client_ids_are_bounded() {
        assert!(message(Some("m-1"), "hi").validate().is_ok());
        assert!(message(None, "hi").validate().is_ok());
        assert_eq!(
            message(Some(&"x".repeat(MAX_MESSAGE_ID_LEN + 1)), "hi").validate(),
            Err(ValidationError::TooLong("id", MAX_MESSAGE_ID_LEN))
        );
        assert_eq!(
            message(Some(" "), "hi").validate(),
            Err(ValidationError::Empty("id"))
        );
    }
}
