use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{new_id, MemoryStore, PgStore, RepositoryError};
use crate::models::{
    chat::{AppendedMessage, ChatSession, Message, NewMessage},
    realtime::{RealtimeEvent, RealtimeTable, RowInserted, CHANNEL},
};

#[async_trait]
pub trait ChatRepository: Send + Sync + 'static {
    /// Creates a session and makes it the user's only active one.
    async fn create_session(&self, user_id: &str, title: &str)
        -> Result<ChatSession, RepositoryError>;

    async fn activate_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<ChatSession, RepositoryError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>, RepositoryError>;

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>, RepositoryError>;

    /// Inserts the message unless its id is already stored. `message_count`
    /// only moves on a real insert.
    async fn append_message(
        &self,
        session_id: &str,
        message: &NewMessage,
    ) -> Result<AppendedMessage, RepositoryError>;

    async fn list_messages(
        &self,
        session_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// Messages across all of the user's sessions, used by the poll fallback.
    async fn messages_for_user_since(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
impl ChatRepository for PgStore {
    async fn create_session(
        &self,
        user_id: &str,
        title: &str,
    ) -> Result<ChatSession, RepositoryError> {
        let mut tx = self.conn.begin().await?;

        // Session switches for one user queue on the user row, so the
        // one-active-session index is never raced.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE chat_sessions SET is_active = false, updated_at = CURRENT_TIMESTAMP WHERE user_id = $1 AND is_active",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let session = sqlx::query_as::<_, ChatSession>(
            r#"
                INSERT INTO chat_sessions (id, user_id, title, is_active)
                VALUES ($1, $2, $3, true)
                RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(user_id)
        .bind(title)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RepositoryError::from_insert(e, "active chat session"))?;

        tx.commit().await?;

        Ok(session)
    }

    async fn activate_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<ChatSession, RepositoryError> {
        let mut tx = self.conn.begin().await?;

        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE chat_sessions SET is_active = false, updated_at = CURRENT_TIMESTAMP WHERE user_id = $1 AND is_active AND id <> $2",
        )
        .bind(user_id)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        let session = sqlx::query_as::<_, ChatSession>(
            r#"
                UPDATE chat_sessions SET is_active = true, updated_at = CURRENT_TIMESTAMP
                WHERE id = $1 AND user_id = $2
                RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RepositoryError::from_insert(e, "active chat session"))?
        .ok_or_else(|| RepositoryError::NotFound(format!("chat session {}", session_id)))?;

        tx.commit().await?;

        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>, RepositoryError> {
        let session =
            sqlx::query_as::<_, ChatSession>("SELECT * FROM chat_sessions WHERE id = $1")
                .bind(session_id)
                .fetch_optional(&self.conn)
                .await?;

        Ok(session)
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>, RepositoryError> {
        let sessions = sqlx::query_as::<_, ChatSession>(
            "SELECT * FROM chat_sessions WHERE user_id = $1 ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(sessions)
    }

    async fn append_message(
        &self,
        session_id: &str,
        message: &NewMessage,
    ) -> Result<AppendedMessage, RepositoryError> {
        let mut tx = self.conn.begin().await?;
        let message_id = message.id.clone().unwrap_or_else(new_id);

        let owner: Option<String> =
            sqlx::query_scalar("SELECT user_id FROM chat_sessions WHERE id = $1 FOR UPDATE")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;
        let owner =
            owner.ok_or_else(|| RepositoryError::NotFound(format!("chat session {}", session_id)))?;

        let inserted = sqlx::query_as::<_, Message>(
            r#"
                INSERT INTO messages (id, session_id, content, is_user)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO NOTHING
                RETURNING *
            "#,
        )
        .bind(&message_id)
        .bind(session_id)
        .bind(&message.content)
        .bind(message.is_user)
        .fetch_optional(&mut *tx)
        .await?;

        let appended = match inserted {
            Some(stored) => {
                let message_count: i32 = sqlx::query_scalar(
                    r#"
                        UPDATE chat_sessions
                        SET message_count = message_count + 1, updated_at = CURRENT_TIMESTAMP
                        WHERE id = $1
                        RETURNING message_count
                    "#,
                )
                .bind(session_id)
                .fetch_one(&mut *tx)
                .await?;

                let notice = RowInserted {
                    table: RealtimeTable::Messages,
                    user_id: owner,
                    id: stored.id.clone(),
                };
                let payload = serde_json::to_string(&notice)
                    .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;
                sqlx::query("SELECT pg_notify($1, $2)")
                    .bind(CHANNEL)
                    .bind(payload)
                    .execute(&mut *tx)
                    .await?;

                AppendedMessage {
                    message: stored,
                    inserted: true,
                    message_count,
                }
            }
            None => {
                let stored = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
                    .bind(&message_id)
                    .fetch_one(&mut *tx)
                    .await?;
                if stored.session_id != session_id {
                    return Err(RepositoryError::Conflict(format!(
                        "message {} belongs to another session",
                        message_id
                    )));
                }
                let message_count: i32 =
                    sqlx::query_scalar("SELECT message_count FROM chat_sessions WHERE id = $1")
                        .bind(session_id)
                        .fetch_one(&mut *tx)
                        .await?;

                AppendedMessage {
                    message: stored,
                    inserted: false,
                    message_count,
                }
            }
        };

        tx.commit().await?;

        Ok(appended)
    }

    async fn list_messages(
        &self,
        session_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
                SELECT * FROM messages
                WHERE session_id = $1 AND ($2::TIMESTAMPTZ IS NULL OR created_at > $2)
                ORDER BY created_at, id
            "#,
        )
        .bind(session_id)
        .bind(since)
        .fetch_all(&self.conn)
        .await?;

        Ok(messages)
    }

    async fn messages_for_user_since(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
                SELECT m.* FROM messages m
                JOIN chat_sessions s ON s.id = m.session_id
                WHERE s.user_id = $1 AND ($2::TIMESTAMPTZ IS NULL OR m.created_at > $2)
                ORDER BY m.created_at, m.id
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.conn)
        .await?;

        Ok(messages)
    }
}

#[async_trait]
impl ChatRepository for MemoryStore {
    async fn create_session(
        &self,
        user_id: &str,
        title: &str,
    ) -> Result<ChatSession, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if !state.users.contains_key(user_id) {
            return Err(RepositoryError::NotFound(format!("user {}", user_id)));
        }

        for session in state.sessions.values_mut() {
            if session.user_id == user_id && session.is_active {
                session.is_active = false;
                session.updated_at = now;
            }
        }

        let session = ChatSession {
            id: new_id(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            is_active: true,
            message_count: 0,
            created_at: now,
            updated_at: now,
        };
        state.sessions.insert(session.id.clone(), session.clone());

        Ok(session)
    }

    async fn activate_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<ChatSession, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        match state.sessions.get(session_id) {
            Some(session) if session.user_id == user_id => {}
            _ => {
                return Err(RepositoryError::NotFound(format!(
                    "chat session {}",
                    session_id
                )))
            }
        }

        for session in state.sessions.values_mut() {
            if session.user_id == user_id {
                let active = session.id == session_id;
                if session.is_active != active {
                    session.is_active = active;
                    session.updated_at = now;
                }
            }
        }

        state
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("chat session {}", session_id)))
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.sessions.get(session_id).cloned())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>, RepositoryError> {
        let state = self.state.lock().await;
        let mut sessions: Vec<ChatSession> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        Ok(sessions)
    }

    async fn append_message(
        &self,
        session_id: &str,
        message: &NewMessage,
    ) -> Result<AppendedMessage, RepositoryError> {
        let now = self.clock.now();
        let message_id = message.id.clone().unwrap_or_else(new_id);
        let mut state = self.state.lock().await;

        let owner = state
            .session_owner(session_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("chat session {}", session_id)))?;

        if let Some(stored) = state.messages.iter().find(|m| m.id == message_id) {
            if stored.session_id != session_id {
                return Err(RepositoryError::Conflict(format!(
                    "message {} belongs to another session",
                    message_id
                )));
            }
            let stored = stored.clone();
            let message_count = state
                .sessions
                .get(session_id)
                .map(|s| s.message_count)
                .unwrap_or_default();

            return Ok(AppendedMessage {
                message: stored,
                inserted: false,
                message_count,
            });
        }

        let stored = Message {
            id: message_id,
            session_id: session_id.to_string(),
            content: message.content.clone(),
            is_user: message.is_user,
            created_at: now,
        };
        state.messages.push(stored.clone());

        let message_count = match state.sessions.get_mut(session_id) {
            Some(session) => {
                session.message_count += 1;
                session.updated_at = now;
                session.message_count
            }
            None => 0,
        };
        drop(state);

        self.publish(RealtimeEvent::Messages {
            user_id: owner,
            record: stored.clone(),
        });

        Ok(AppendedMessage {
            message: stored,
            inserted: true,
            message_count,
        })
    }

    async fn list_messages(
        &self,
        session_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.session_id == session_id && since.map_or(true, |t| m.created_at > t))
            .cloned()
            .collect())
    }

    async fn messages_for_user_since(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| {
                state.session_owner(&m.session_id).as_deref() == Some(user_id)
                    && since.map_or(true, |t| m.created_at > t)
            })
            .cloned()
            .collect())
    }
}
