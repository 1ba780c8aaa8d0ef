use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::notifications::{NewNotification, Notification, PushMessage};
use crate::repositories::{push::PushSender, Store};

const SERVICE: &str = "NotificationService";

pub enum NotificationRequest {
    Notify {
        notification: NewNotification,
        response: Option<oneshot::Sender<Result<Notification, ServiceError>>>,
    },
    ListSince {
        user_id: String,
        since: Option<DateTime<Utc>>,
        response: oneshot::Sender<Result<Vec<Notification>, ServiceError>>,
    },
    MarkRead {
        user_id: String,
        notification_id: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
}

#[derive(Clone)]
pub struct NotificationRequestHandler {
    store: Arc<dyn Store>,
    push: Arc<dyn PushSender>,
}

impl NotificationRequestHandler {
    pub fn new(store: Arc<dyn Store>, push: Arc<dyn PushSender>) -> Self {
        NotificationRequestHandler { store, push }
    }

    async fn notify(&self, notification: NewNotification) -> Result<Notification, ServiceError> {
        let stored = self
            .store
            .insert_notification(&notification)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;

        let user = self
            .store
            .get_user_by_id(&notification.user_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;

        if let Some(token) = user
            .filter(|u| u.can_receive_push())
            .and_then(|u| u.push_token)
        {
            let message = PushMessage {
                to: token,
                title: notification.title,
                body: notification.body,
                data: notification.payload,
            };
            self.dispatch(message);
        }

        Ok(stored)
    }

    /// Fire and forget. Delivery failures are logged, never retried.
    fn dispatch(&self, message: PushMessage) {
        let push = self.push.clone();

        tokio::spawn(async move {
            if let Err(e) = push.send(&message).await {
                log::error!("Push delivery to {} failed: {}", message.to, e);
            }
        });
    }

    async fn list_since(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Notification>, ServiceError> {
        self.store
            .notifications_since(user_id, since)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))
    }

    async fn mark_read(&self, user_id: &str, notification_id: &str) -> Result<(), ServiceError> {
        let updated = self
            .store
            .mark_read(user_id, notification_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;

        if updated {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!(
                "notification {}",
                notification_id
            )))
        }
    }
}

#[async_trait]
impl RequestHandler<NotificationRequest> for NotificationRequestHandler {
    async fn handle_request(&self, request: NotificationRequest) {
        match request {
            NotificationRequest::Notify {
                notification,
                response,
            } => {
                let result = self.notify(notification).await;
                match response {
                    Some(response) => {
                        let _ = response.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            log::warn!("Dropped notification: {}", e);
                        }
                    }
                }
            }
            NotificationRequest::ListSince {
                user_id,
                since,
                response,
            } => {
                let result = self.list_since(&user_id, since).await;
                let _ = response.send(result);
            }
            NotificationRequest::MarkRead {
                user_id,
                notification_id,
                response,
            } => {
                let result = self.mark_read(&user_id, &notification_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        NotificationService {}
    }
}

#[async_trait]
impl Service<NotificationRequest, NotificationRequestHandler> for NotificationService {}
