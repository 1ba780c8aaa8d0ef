use serde::{Deserialize, Serialize};

use super::{chat::Message, notifications::Notification};

pub const CHANNEL: &str = "stride_realtime";

/// Postgres rejects `NOTIFY` payloads of 8000 bytes or more.
pub const NOTIFY_PAYLOAD_LIMIT: usize = 8000;

/// Row-insert event delivered to subscribers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum RealtimeEvent {
    Messages { user_id: String, record: Message },
    Notifications { record: Notification },
}

impl RealtimeEvent {
    pub fn user_id(&self) -> &str {
        match self {
            RealtimeEvent::Messages { user_id, .. } => user_id,
            RealtimeEvent::Notifications { record } => &record.user_id,
        }
    }

    /// Key used to collapse duplicate deliveries.
    pub fn record_key(&self) -> String {
        match self {
            RealtimeEvent::Messages { record, .. } => format!("messages:{}", record.id),
            RealtimeEvent::Notifications { record } => format!("notifications:{}", record.id),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeTable {
    Messages,
    Notifications,
}

/// What actually travels through `pg_notify`: a pointer to the inserted row,
/// never the row itself, so the payload size does not depend on message
/// content. The listener loads the row before delivering it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct RowInserted {
    pub table: RealtimeTable,
    pub user_id: String,
    pub id: String,
}

impl From<&RealtimeEvent> for RowInserted {
    fn from(event: &RealtimeEvent) -> Self {
        match event {
            RealtimeEvent::Messages { user_id, record } => RowInserted {
                table: RealtimeTable::Messages,
                user_id: user_id.clone(),
                id: record.id.clone(),
            },
            RealtimeEvent::Notifications { record } => RowInserted {
                table: RealtimeTable::Notifications,
                user_id: record.user_id.clone(),
                id: record.id.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{MAX_MESSAGE_ID_LEN, MAX_MESSAGE_LEN};
    use chrono::Utc;

    #[test]
    fn notice_for_longest_multibyte_message_fits_notify_limit() {
        let event = RealtimeEvent::Messages {
            user_id: "0b9f3a52-5d0c-4a57-9a43-1b7f0e3c2d11".to_string(),
            record: Message {
                id: "m".repeat(MAX_MESSAGE_ID_LEN),
                session_id: "6f1c2d9e-8a43-4e7b-b0a2-3c5d7e9f1a20".to_string(),
                content: "\u{e9}\"".repeat(MAX_MESSAGE_LEN / 2),
                is_user: true,
                created_at: Utc::now(),
            },
        };
        assert!(serde_json::to_string(&event).unwrap().len() >= NOTIFY_PAYLOAD_LIMIT);

        let notice = serde_json::to_string(&RowInserted::from(&event)).unwrap();
        assert!(notice.len() < NOTIFY_PAYLOAD_LIMIT);

        let parsed: RowInserted = serde_json::from_str(&notice).unwrap();
        assert_eq!(parsed.table, RealtimeTable::Messages);
        assert_eq!(parsed.user_id, event.user_id());
    }
}
