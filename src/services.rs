use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::cache::ProfileCache;
use crate::repositories::{
    push::{DisabledPush, PushApi, PushSender},
    RepositoryError, Store,
};
use crate::settings::Settings;
use crate::utils::{clock::Clock, locks::KeyedLocks};

pub mod chat;
pub mod credits;
pub mod http;
pub mod notifications;
pub mod referrals;
pub mod resources;
pub mod users;
pub mod votes;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Insufficient credits: balance {balance}, requested {requested}")]
    InsufficientCredits { balance: i64, requested: i64 },
    #[error("Backend unavailable: {0} - {1}")]
    BackendUnavailable(String, String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Converts a repository failure, logging anything that is not a
    /// normal business outcome.
    pub(crate) fn repository(service: &str, e: RepositoryError) -> Self {
        match e {
            RepositoryError::InsufficientCredits { balance, requested } => {
                ServiceError::InsufficientCredits { balance, requested }
            }
            RepositoryError::NotFound(what) => ServiceError::NotFound(what),
            RepositoryError::Conflict(what) => ServiceError::Conflict(what),
            RepositoryError::Database(e) => {
                log::error!("[{}] Backend call failed: {}", service, e);
                ServiceError::BackendUnavailable(service.to_string(), e.to_string())
            }
            RepositoryError::Corrupt(what) => {
                log::error!("[{}] Corrupt record: {}", service, what);
                ServiceError::Internal(what)
            }
        }
    }

    /// Whether repeating the same action later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::BackendUnavailable(..)
                | ServiceError::Timeout(_)
                | ServiceError::Communication(..)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation_error",
            ServiceError::InsufficientCredits { .. } => "insufficient_credits",
            ServiceError::BackendUnavailable(..) => "backend_unavailable",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Timeout(_) => "timeout",
            ServiceError::Communication(..) => "communication_error",
            ServiceError::Internal(_) => "internal_error",
        }
    }
}

impl From<crate::models::ValidationError> for ServiceError {
    fn from(e: crate::models::ValidationError) -> Self {
        ServiceError::Validation(e.to_string())
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Sends a request built around a fresh oneshot responder and waits for the
/// answer, giving up after `timeout`.
pub async fn request<R, T>(
    channel: &mpsc::Sender<R>,
    timeout: Duration,
    service: &str,
    build: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
) -> Result<T, ServiceError>
where
    R: Send + 'static,
{
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(build(response_tx))
        .await
        .map_err(|e| ServiceError::Communication(service.to_string(), e.to_string()))?;

    match tokio::time::timeout(timeout, response_rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ServiceError::Communication(
            service.to_string(),
            e.to_string(),
        )),
        Err(_) => {
            log::warn!("[{}] Request timed out after {:?}.", service, timeout);
            Err(ServiceError::Timeout(service.to_string()))
        }
    }
}

/// Senders for every running service.
#[derive(Clone)]
pub struct ServiceChannels {
    pub credits: mpsc::Sender<credits::CreditRequest>,
    pub users: mpsc::Sender<users::UserRequest>,
    pub referrals: mpsc::Sender<referrals::ReferralRequest>,
    pub votes: mpsc::Sender<votes::VoteRequest>,
    pub resources: mpsc::Sender<resources::ResourceRequest>,
    pub chat: mpsc::Sender<chat::ChatRequest>,
    pub notifications: mpsc::Sender<notifications::NotificationRequest>,
}

pub fn push_sender(settings: &Settings) -> Arc<dyn PushSender> {
    if settings.push.enabled {
        Arc::new(PushApi::new(
            settings.push.url.clone(),
            settings.push.access_token.clone(),
        ))
    } else {
        Arc::new(DisabledPush)
    }
}

pub fn start_services(
    store: Arc<dyn Store>,
    settings: &Settings,
    clock: Arc<dyn Clock>,
    push: Arc<dyn PushSender>,
) -> ServiceChannels {
    let (credit_tx, mut credit_rx) = mpsc::channel(512);
    let (user_tx, mut user_rx) = mpsc::channel(512);
    let (referral_tx, mut referral_rx) = mpsc::channel(512);
    let (vote_tx, mut vote_rx) = mpsc::channel(512);
    let (resource_tx, mut resource_rx) = mpsc::channel(512);
    let (chat_tx, mut chat_rx) = mpsc::channel(512);
    let (notification_tx, mut notification_rx) = mpsc::channel(512);

    let locks = KeyedLocks::new();
    let cache = ProfileCache::new(
        Duration::from_secs(settings.cache.profile_ttl_secs),
        clock.clone(),
    );

    log::info!("Starting notification service.");
    let handler = notifications::NotificationRequestHandler::new(store.clone(), push);
    tokio::spawn(async move {
        notifications::NotificationService::new()
            .run(handler, &mut notification_rx)
            .await;
    });

    log::info!("Starting credit service.");
    let handler =
        credits::CreditRequestHandler::new(store.clone(), locks.clone(), cache.clone());
    tokio::spawn(async move {
        credits::CreditService::new()
            .run(handler, &mut credit_rx)
            .await;
    });

    log::info!("Starting referral service.");
    let handler = referrals::ReferralRequestHandler::new(
        store.clone(),
        locks.clone(),
        cache.clone(),
        settings.credits.clone(),
        notification_tx.clone(),
    );
    tokio::spawn(async move {
        referrals::ReferralService::new()
            .run(handler, &mut referral_rx)
            .await;
    });

    log::info!("Starting user service.");
    let handler = users::UserRequestHandler::new(
        store.clone(),
        locks.clone(),
        cache.clone(),
        clock.clone(),
        settings.credits.clone(),
        settings.validation.allowed_email_domains.clone(),
        referral_tx.clone(),
    );
    tokio::spawn(async move {
        users::UserService::new().run(handler, &mut user_rx).await;
    });

    log::info!("Starting vote service.");
    let handler = votes::VoteRequestHandler::new(
        store.clone(),
        locks.clone(),
        settings.credits.upvote_reward,
        credit_tx.clone(),
        notification_tx.clone(),
    );
    tokio::spawn(async move {
        votes::VoteService::new().run(handler, &mut vote_rx).await;
    });

    log::info!("Starting resource service.");
    let handler = resources::ResourceRequestHandler::new(store.clone(), locks, cache);
    tokio::spawn(async move {
        resources::ResourceService::new()
            .run(handler, &mut resource_rx)
            .await;
    });

    log::info!("Starting chat service.");
    let handler = chat::ChatRequestHandler::new(store);
    tokio::spawn(async move {
        chat::ChatService::new().run(handler, &mut chat_rx).await;
    });

    ServiceChannels {
        credits: credit_tx,
        users: user_tx,
        referrals: referral_tx,
        votes: vote_tx,
        resources: resource_tx,
        chat: chat_tx,
        notifications: notification_tx,
    }
}
