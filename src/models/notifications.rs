use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UnknownVariant;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ReferralCompleted,
    UpvoteReceived,
    DailyStreak,
    ChatMessage,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ReferralCompleted => "referral_completed",
            NotificationKind::UpvoteReceived => "upvote_received",
            NotificationKind::DailyStreak => "daily_streak",
            NotificationKind::ChatMessage => "chat_message",
            NotificationKind::System => "system",
        }
    }
}

impl TryFrom<String> for NotificationKind {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "referral_completed" => Ok(NotificationKind::ReferralCompleted),
            "upvote_received" => Ok(NotificationKind::UpvoteReceived),
            "daily_streak" => Ok(NotificationKind::DailyStreak),
            "chat_message" => Ok(NotificationKind::ChatMessage),
            "system" => Ok(NotificationKind::System),
            _ => Err(UnknownVariant {
                kind: "notification kind",
                value,
            }),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[sqlx(try_from = "String")]
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    /// Opaque JSON handed to the push provider untouched.
    pub payload: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewNotification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
}

/// Body sent to the push provider.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}
