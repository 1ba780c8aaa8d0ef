use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::chat::{AppendedMessage, ChatSession, Message, NewMessage};
use crate::repositories::Store;

const SERVICE: &str = "ChatService";
const DEFAULT_TITLE: &str = "New chat";

pub enum ChatRequest {
    CreateSession {
        user_id: String,
        title: Option<String>,
        response: oneshot::Sender<Result<ChatSession, ServiceError>>,
    },
    ActivateSession {
        user_id: String,
        session_id: String,
        response: oneshot::Sender<Result<ChatSession, ServiceError>>,
    },
    ListSessions {
        user_id: String,
        response: oneshot::Sender<Result<Vec<ChatSession>, ServiceError>>,
    },
    SendMessage {
        user_id: String,
        session_id: String,
        message: NewMessage,
        response: oneshot::Sender<Result<AppendedMessage, ServiceError>>,
    },
    ListMessages {
        user_id: String,
        session_id: String,
        since: Option<DateTime<Utc>>,
        response: oneshot::Sender<Result<Vec<Message>, ServiceError>>,
    },
    /// Every message in the user's sessions newer than `since`.
    PollMessages {
        user_id: String,
        since: Option<DateTime<Utc>>,
        response: oneshot::Sender<Result<Vec<Message>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct ChatRequestHandler {
    store: Arc<dyn Store>,
}

impl ChatRequestHandler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        ChatRequestHandler { store }
    }

    async fn create_session(
        &self,
        user_id: &str,
        title: Option<String>,
    ) -> Result<ChatSession, ServiceError> {
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        self.store
            .create_session(user_id, &title)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))
    }

    async fn activate_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<ChatSession, ServiceError> {
        self.store
            .activate_session(user_id, session_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>, ServiceError> {
        self.store
            .list_sessions(user_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))
    }

    /// Sessions are private: someone else's session reads as missing.
    async fn owned_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<ChatSession, ServiceError> {
        self.store
            .get_session(session_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("chat session {}", session_id)))
    }

    async fn send_message(
        &self,
        user_id: &str,
        session_id: &str,
        message: NewMessage,
    ) -> Result<AppendedMessage, ServiceError> {
        message.validate()?;
        self.owned_session(user_id, session_id).await?;

        let appended = self
            .store
            .append_message(session_id, &message)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;
        if !appended.inserted {
            log::debug!("Duplicate message {} ignored.", appended.message.id);
        }

        Ok(appended)
    }

    async fn list_messages(
        &self,
        user_id: &str,
        session_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, ServiceError> {
        self.owned_session(user_id, session_id).await?;

        self.store
            .list_messages(session_id, since)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))
    }

    async fn poll_messages(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, ServiceError> {
        self.store
            .messages_for_user_since(user_id, since)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))
    }
}

#[async_trait]
impl RequestHandler<ChatRequest> for ChatRequestHandler {
    async fn handle_request(&self, request: ChatRequest) {
        match request {
            ChatRequest::CreateSession {
                user_id,
                title,
                response,
            } => {
                let result = self.create_session(&user_id, title).await;
                let _ = response.send(result);
            }
            ChatRequest::ActivateSession {
                user_id,
                session_id,
                response,
            } => {
                let result = self.activate_session(&user_id, &session_id).await;
                let _ = response.send(result);
            }
            ChatRequest::ListSessions { user_id, response } => {
                let result = self.list_sessions(&user_id).await;
                let _ = response.send(result);
            }
            ChatRequest::SendMessage {
                user_id,
                session_id,
                message,
                response,
            } => {
                let result = self.send_message(&user_id, &session_id, message).await;
                let _ = response.send(result);
            }
            ChatRequest::ListMessages {
                user_id,
                session_id,
                since,
                response,
            } => {
                let result = self.list_messages(&user_id, &session_id, since).await;
                let _ = response.send(result);
            }
            ChatRequest::PollMessages {
                user_id,
                since,
                response,
            } => {
                let result = self.poll_messages(&user_id, since).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct ChatService;

impl ChatService {
    pub fn new() -> Self {
        ChatService {}
    }
}

#[async_trait]
impl Service<ChatRequest, ChatRequestHandler> for ChatService {}
