use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::{broadcast, mpsc};

use super::{MemoryStore, PgStore, RepositoryError};
use crate::models::{
    chat::Message,
    notifications::Notification,
    realtime::{RealtimeEvent, RealtimeTable, RowInserted, CHANNEL},
};

/// Push side of the realtime feed: row-insert events on `messages` and
/// `notifications`, filtered to one user.
#[async_trait]
pub trait RealtimeSource: Send + Sync + 'static {
    async fn subscribe(
        &self,
        user_id: &str,
    ) -> Result<mpsc::Receiver<RealtimeEvent>, RepositoryError>;
}

#[async_trait]
impl RealtimeSource for PgStore {
    async fn subscribe(
        &self,
        user_id: &str,
    ) -> Result<mpsc::Receiver<RealtimeEvent>, RepositoryError> {
        let mut listener = PgListener::connect_with(&self.conn).await?;
        listener.listen(CHANNEL).await?;

        let (tx, rx) = mpsc::channel(256);
        let user_id = user_id.to_string();
        let conn = self.conn.clone();

        tokio::spawn(async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(notification) => notification,
                    Err(e) => {
                        log::error!("Realtime listener for {} failed: {}", user_id, e);
                        break;
                    }
                };

                let notice: RowInserted = match serde_json::from_str(notification.payload()) {
                    Ok(notice) => notice,
                    Err(e) => {
                        log::warn!("Dropping malformed realtime payload: {}", e);
                        continue;
                    }
                };
                if notice.user_id != user_id {
                    continue;
                }

                let event = match load_event(&conn, notice).await {
                    Ok(Some(event)) => event,
                    Ok(None) => continue,
                    Err(e) => {
                        // The poll fallback picks the row up later.
                        log::warn!("Could not load realtime row for {}: {}", user_id, e);
                        continue;
                    }
                };

                if tx.send(event).await.is_err() {
                    log::debug!("Realtime subscriber for {} went away.", user_id);
                    break;
                }
            }
        });

        Ok(rx)
    }
}

/// Loads the row a notice points at. `None` when it is gone again, e.g. the
/// account was deleted in between.
async fn load_event(
    conn: &PgPool,
    notice: RowInserted,
) -> Result<Option<RealtimeEvent>, RepositoryError> {
    let event = match notice.table {
        RealtimeTable::Messages => {
            sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
                .bind(&notice.id)
                .fetch_optional(conn)
                .await?
                .map(|record| RealtimeEvent::Messages {
                    user_id: notice.user_id,
                    record,
                })
        }
        RealtimeTable::Notifications => {
            sqlx::query_as::<_, Notification>("SELECT * FROM notifications WHERE id = $1")
                .bind(&notice.id)
                .fetch_optional(conn)
                .await?
                .map(|record| RealtimeEvent::Notifications { record })
        }
    };

    Ok(event)
}

#[async_trait]
impl RealtimeSource for MemoryStore {
    async fn subscribe(
        &self,
        user_id: &str,
    ) -> Result<mpsc::Receiver<RealtimeEvent>, RepositoryError> {
        let mut events = self.events.subscribe();
        let (tx, rx) = mpsc::channel(256);
        let user_id = user_id.to_string();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event.user_id() == user_id && tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!(
                            "Realtime subscriber for {} lagged, {} events skipped.",
                            user_id,
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}
