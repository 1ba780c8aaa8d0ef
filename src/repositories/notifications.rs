use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{new_id, MemoryStore, PgStore, RepositoryError};
use crate::models::{
    notifications::{NewNotification, Notification},
    realtime::{RealtimeEvent, RealtimeTable, RowInserted, CHANNEL},
};

#[async_trait]
pub trait NotificationRepository: Send + Sync + 'static {
    async fn insert_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<Notification, RepositoryError>;

    async fn notifications_since(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Notification>, RepositoryError>;

    async fn mark_read(&self, user_id: &str, notification_id: &str)
        -> Result<bool, RepositoryError>;
}

#[async_trait]
impl NotificationRepository for PgStore {
    async fn insert_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<Notification, RepositoryError> {
        let mut tx = self.conn.begin().await?;

        let stored = sqlx::query_as::<_, Notification>(
            r#"
                INSERT INTO notifications (id, user_id, kind, title, body, payload)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(&notification.user_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(notification.payload.to_string())
        .fetch_one(&mut *tx)
        .await?;

        let notice = RowInserted {
            table: RealtimeTable::Notifications,
            user_id: stored.user_id.clone(),
            id: stored.id.clone(),
        };
        let payload =
            serde_json::to_string(&notice).map_err(|e| RepositoryError::Corrupt(e.to_string()))?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANNEL)
            .bind(payload)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(stored)
    }

    async fn notifications_since(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
                SELECT * FROM notifications
                WHERE user_id = $1 AND ($2::TIMESTAMPTZ IS NULL OR created_at > $2)
                ORDER BY created_at, id
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.conn)
        .await?;

        Ok(notifications)
    }

    async fn mark_read(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("UPDATE notifications SET read = true WHERE id = $1 AND user_id = $2")
                .bind(notification_id)
                .bind(user_id)
                .execute(&self.conn)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn insert_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<Notification, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if !state.users.contains_key(&notification.user_id) {
            return Err(RepositoryError::NotFound(format!(
                "user {}",
                notification.user_id
            )));
        }

        let stored = Notification {
            id: new_id(),
            user_id: notification.user_id.clone(),
            kind: notification.kind,
            title: notification.title.clone(),
            body: notification.body.clone(),
            payload: notification.payload.to_string(),
            read: false,
            created_at: now,
        };
        state.notifications.push(stored.clone());
        drop(state);

        self.publish(RealtimeEvent::Notifications {
            record: stored.clone(),
        });

        Ok(stored)
    }

    async fn notifications_since(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && since.map_or(true, |t| n.created_at > t))
            .cloned()
            .collect())
    }

    async fn mark_read(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        match state
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id && n.user_id == user_id)
        {
            Some(notification) => {
                notification.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
