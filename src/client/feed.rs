use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::models::{chat::Message, notifications::Notification, realtime::RealtimeEvent};
use crate::repositories::{RealtimeSource, Store};
use crate::services::{
    chat::ChatRequest, notifications::NotificationRequest, request, ServiceChannels,
    ServiceError,
};

/// Re-read window behind the poll cursor so rows sharing a timestamp with
/// the last one seen are not skipped.
const POLL_OVERLAP_SECS: i64 = 1;

/// Client-side view of a user's chat messages and notifications. Events from
/// the subscription and the poll land here; a record id is applied at most
/// once, whichever producer delivers it first.
#[derive(Debug, Default)]
pub struct RealtimeFeed {
    seen: HashSet<String>,
    messages: Vec<Message>,
    notifications: Vec<Notification>,
}

impl RealtimeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` for a duplicate delivery.
    pub fn apply(&mut self, event: RealtimeEvent) -> bool {
        if !self.seen.insert(event.record_key()) {
            return false;
        }

        match event {
            RealtimeEvent::Messages { record, .. } => self.messages.push(record),
            RealtimeEvent::Notifications { record } => self.notifications.push(record),
        }
        true
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn session_messages<'a>(&'a self, session_id: &'a str) -> impl Iterator<Item = &'a Message> {
        self.messages.iter().filter(move |m| m.session_id == session_id)
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn unread(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    /// Drains whatever the producers have delivered so far. Returns the
    /// number of new records applied.
    pub fn drain(&mut self, events: &mut mpsc::Receiver<RealtimeEvent>) -> usize {
        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            if self.apply(event) {
                applied += 1;
            }
        }
        applied
    }
}

/// Starts both producers for `user_id` and merges them into one channel:
/// the store's push subscription, and a poll through the chat and
/// notification services every `poll_interval`. When the subscription closes
/// the poll keeps the feed alive on its own.
pub async fn start_feed(
    source: Arc<dyn Store>,
    channels: ServiceChannels,
    user_id: &str,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<mpsc::Receiver<RealtimeEvent>, ServiceError> {
    let mut subscription = source
        .subscribe(user_id)
        .await
        .map_err(|e| ServiceError::repository("RealtimeFeed", e))?;
    let (tx, rx) = mpsc::channel(256);
    let user_id = user_id.to_string();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        let mut cursor: Option<DateTime<Utc>> = None;
        let mut subscribed = true;

        loop {
            tokio::select! {
                event = subscription.recv(), if subscribed => match event {
                    Some(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        log::warn!("Realtime subscription for {} closed, falling back to polling.", user_id);
                        subscribed = false;
                    }
                },
                _ = ticker.tick() => {
                    let events = match poll(&channels, timeout, &user_id, cursor).await {
                        Ok(events) => events,
                        Err(e) => {
                            log::warn!("Realtime poll for {} failed: {}", user_id, e);
                            continue;
                        }
                    };

                    for event in events {
                        let created_at = match &event {
                            RealtimeEvent::Messages { record, .. } => record.created_at,
                            RealtimeEvent::Notifications { record } => record.created_at,
                        };
                        cursor = Some(cursor.map_or(created_at, |c| c.max(created_at)));

                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });

    Ok(rx)
}

/// One poll round: everything newer than the cursor, minus a small overlap.
pub async fn poll(
    channels: &ServiceChannels,
    timeout: Duration,
    user_id: &str,
    cursor: Option<DateTime<Utc>>,
) -> Result<Vec<RealtimeEvent>, ServiceError> {
    let since = cursor.map(|c| c - chrono::Duration::seconds(POLL_OVERLAP_SECS));

    let id = user_id.to_string();
    let messages = request(&channels.chat, timeout, "ChatService", |response| {
        ChatRequest::PollMessages {
            user_id: id,
            since,
            response,
        }
    })
    .await?;

    let id = user_id.to_string();
    let notifications = request(
        &channels.notifications,
        timeout,
        "NotificationService",
        |response| NotificationRequest::ListSince {
            user_id: id,
            since,
            response,
        },
    )
    .await?;

    let mut events: Vec<RealtimeEvent> = messages
        .into_iter()
        .map(|record| RealtimeEvent::Messages {
            user_id: user_id.to_string(),
            record,
        })
        .collect();
    events.extend(
        notifications
            .into_iter()
            .map(|record| RealtimeEvent::Notifications { record }),
    );

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notifications::NotificationKind;

    fn message(id: &str) -> RealtimeEvent {
        RealtimeEvent::Messages {
            user_id: "u1".to_string(),
            record: Message {
                id: id.to_string(),
                session_id: "s1".to_string(),
                content: "hello".to_string(),
                is_user: true,
                created_at: Utc::now(),
            },
        }
    }

    fn notification(id: &str) -> RealtimeEvent {
        RealtimeEvent::Notifications {
            record: Notification {
                id: id.to_string(),
                user_id: "u1".to_string(),
                kind: NotificationKind::System,
                title: "t".to_string(),
                body: "b".to_string(),
                payload: "{}".to_string(),
                read: false,
                created_at: Utc::now(),
            },
        }
    }

    #[test]
    fn duplicate_deliveries_collapse() {
        let mut feed = RealtimeFeed::new();

        assert!(feed.apply(message("m1")));
        assert!(!feed.apply(message("m1")));
        assert!(feed.apply(message("m2")));

        assert_eq!(feed.messages().len(), 2);
    }

    #[test]
    fn keys_are_scoped_per_table() {
        let mut feed = RealtimeFeed::new();

        assert!(feed.apply(message("same")));
        assert!(feed.apply(notification("same")));

        assert_eq!(feed.messages().len(), 1);
        assert_eq!(feed.notifications().len(), 1);
        assert_eq!(feed.unread(), 1);
    }

    #[tokio::test]
    async fn drain_merges_both_producers() {
        let (tx, mut rx) = mpsc::channel(16);
        // subscription delivers first, poll repeats it
        tx.send(message("m1")).await.unwrap();
        tx.send(notification("n1")).await.unwrap();
        tx.send(message("m1")).await.unwrap();
        tx.send(notification("n1")).await.unwrap();
        tx.send(message("m2")).await.unwrap();

        let mut feed = RealtimeFeed::new();
        assert_eq!(feed.drain(&mut rx), 3);
        assert_eq!(feed.session_messages("s1").count(), 2);
    }
}
