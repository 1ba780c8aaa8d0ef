use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use super::notifications::NotificationRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::cache::ProfileCache;
use crate::models::{
    notifications::{NewNotification, NotificationKind},
    referrals::{Referral, ReferralCompletion, ReferralStatus},
    transactions::{NewCreditTransaction, TransactionCategory},
};
use crate::repositories::Store;
use crate::settings::Credits;
use crate::utils::locks::KeyedLocks;

const SERVICE: &str = "ReferralService";

pub enum ReferralRequest {
    /// Answers `None` when the referral was already completed or cancelled.
    Complete {
        referral_id: String,
        response: oneshot::Sender<Result<Option<ReferralCompletion>, ServiceError>>,
    },
    /// Answers `None` when the referral is no longer pending.
    Cancel {
        referral_id: String,
        response: oneshot::Sender<Result<Option<Referral>, ServiceError>>,
    },
    Get {
        referral_id: String,
        response: oneshot::Sender<Result<Referral, ServiceError>>,
    },
    ListForReferrer {
        referrer_id: String,
        response: oneshot::Sender<Result<Vec<Referral>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct ReferralRequestHandler {
    store: Arc<dyn Store>,
    locks: KeyedLocks,
    cache: ProfileCache,
    credits: Credits,
    notification_channel: mpsc::Sender<NotificationRequest>,
}

impl ReferralRequestHandler {
    pub fn new(
        store: Arc<dyn Store>,
        locks: KeyedLocks,
        cache: ProfileCache,
        credits: Credits,
        notification_channel: mpsc::Sender<NotificationRequest>,
    ) -> Self {
        ReferralRequestHandler {
            store,
            locks,
            cache,
            credits,
            notification_channel,
        }
    }

    async fn complete(
        &self,
        referral_id: &str,
    ) -> Result<Option<ReferralCompletion>, ServiceError> {
        let referral = self.get(referral_id).await?;
        if referral.status != ReferralStatus::Pending || referral.bonus_awarded {
            log::debug!(
                "Referral {} is {}, nothing to award.",
                referral.id,
                referral.status.as_str()
            );
            return Ok(None);
        }

        let _guards = self
            .locks
            .lock_many(&[referral.referrer_id.as_str(), referral.referred_id.as_str()])
            .await;

        let mut bonuses = vec![NewCreditTransaction::new(
            referral.referrer_id.clone(),
            self.credits.referral_bonus,
            TransactionCategory::ReferralBonus,
            "Referral bonus",
        )
        .with_reference(referral.id.clone())];
        if self.credits.referred_bonus > 0 {
            bonuses.push(
                NewCreditTransaction::new(
                    referral.referred_id.clone(),
                    self.credits.referred_bonus,
                    TransactionCategory::ReferralBonus,
                    "Joined with a referral code",
                )
                .with_reference(referral.id.clone()),
            );
        }
        for bonus in &bonuses {
            bonus.validate()?;
        }

        let completed = self
            .store
            .complete_referral(referral_id, bonuses)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;

        let (referral, entries) = match completed {
            Some(completed) => completed,
            None => return Ok(None),
        };

        self.cache.invalidate(&referral.referrer_id);
        self.cache.invalidate(&referral.referred_id);
        log::info!(
            "Referral {} completed, bonus awarded to {}.",
            referral.id,
            referral.referrer_id
        );

        let referrer_balance = entries
            .iter()
            .find(|e| e.transaction.user_id == referral.referrer_id)
            .map(|e| e.balance)
            .unwrap_or_default();
        let referred_balance = entries
            .iter()
            .find(|e| e.transaction.user_id == referral.referred_id)
            .map(|e| e.balance);

        self.notify_referrer(&referral);

        Ok(Some(ReferralCompletion {
            referral,
            referrer_balance,
            referred_balance,
        }))
    }

    fn notify_referrer(&self, referral: &Referral) {
        let notification = NewNotification {
            user_id: referral.referrer_id.clone(),
            kind: NotificationKind::ReferralCompleted,
            title: "Referral completed".to_string(),
            body: format!(
                "Someone joined with your code. {} credits are yours.",
                self.credits.referral_bonus
            ),
            payload: json!({ "referral_id": referral.id }),
        };
        let channel = self.notification_channel.clone();

        tokio::spawn(async move {
            let _ = channel
                .send(NotificationRequest::Notify {
                    notification,
                    response: None,
                })
                .await
                .map_err(|e| log::warn!("Failed to queue referral notification: {}", e));
        });
    }

    async fn cancel(&self, referral_id: &str) -> Result<Option<Referral>, ServiceError> {
        let referral = self.get(referral_id).await?;
        if !referral.status.can_transition_to(ReferralStatus::Cancelled) {
            return Ok(None);
        }

        self.store
            .cancel_referral(referral_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))
    }

    async fn get(&self, referral_id: &str) -> Result<Referral, ServiceError> {
        self.store
            .get_referral(referral_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?
            .ok_or_else(|| ServiceError::NotFound(format!("referral {}", referral_id)))
    }

    async fn list_for_referrer(&self, referrer_id: &str) -> Result<Vec<Referral>, ServiceError> {
        self.store
            .list_referrals_by_referrer(referrer_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))
    }
}

#[async_trait]
impl RequestHandler<ReferralRequest> for ReferralRequestHandler {
    async fn handle_request(&self, request: ReferralRequest) {
        match request {
            ReferralRequest::Complete {
                referral_id,
                response,
            } => {
                let result = self.complete(&referral_id).await;
                let _ = response.send(result);
            }
            ReferralRequest::Cancel {
                referral_id,
                response,
            } => {
                let result = self.cancel(&referral_id).await;
                let _ = response.send(result);
            }
            ReferralRequest::Get {
                referral_id,
                response,
            } => {
                let result = self.get(&referral_id).await;
                let _ = response.send(result);
            }
            ReferralRequest::ListForReferrer {
                referrer_id,
                response,
            } => {
                let result = self.list_for_referrer(&referrer_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct ReferralService;

impl ReferralService {
    pub fn new() -> Self {
        ReferralService {}
    }
}

#[async_trait]
impl Service<ReferralRequest, ReferralRequestHandler> for ReferralService {}
