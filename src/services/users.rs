use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};

use super::referrals::ReferralRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::cache::ProfileCache;
use crate::models::{
    leaderboard::LeaderboardEntry,
    transactions::{NewCreditTransaction, TransactionCategory},
    users::{LoginOutcome, NewUser, NewUserRecord, Preferences, User},
};
use crate::repositories::{new_id, RepositoryError, Store};
use crate::settings::Credits;
use crate::utils::{clock::Clock, locks::KeyedLocks};

const SERVICE: &str = "UserService";
const REFERRAL_CODE_LEN: usize = 12;
const SIGN_UP_ATTEMPTS: usize = 3;
const REFERRAL_TIMEOUT: Duration = Duration::from_secs(10);

pub enum UserRequest {
    SignUp {
        user: NewUser,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    GetProfile {
        id: String,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    DailyLogin {
        id: String,
        response: oneshot::Sender<Result<LoginOutcome, ServiceError>>,
    },
    Verify {
        id: String,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    UpdatePreferences {
        id: String,
        preferences: Preferences,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    DeleteAccount {
        id: String,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    Leaderboard {
        limit: i64,
        response: oneshot::Sender<Result<Vec<LeaderboardEntry>, ServiceError>>,
    },
}

/// Short shareable code derived from the user id.
pub fn referral_code_for(user_id: &str) -> String {
    let digest = Sha256::digest(user_id.as_bytes());
    digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<String>()
        .chars()
        .take(REFERRAL_CODE_LEN)
        .collect()
}

#[derive(Clone)]
pub struct UserRequestHandler {
    store: Arc<dyn Store>,
    locks: KeyedLocks,
    cache: ProfileCache,
    clock: Arc<dyn Clock>,
    credits: Credits,
    allowed_domains: Vec<String>,
    referral_channel: mpsc::Sender<ReferralRequest>,
}

impl UserRequestHandler {
    pub fn new(
        store: Arc<dyn Store>,
        locks: KeyedLocks,
        cache: ProfileCache,
        clock: Arc<dyn Clock>,
        credits: Credits,
        allowed_domains: Vec<String>,
        referral_channel: mpsc::Sender<ReferralRequest>,
    ) -> Self {
        UserRequestHandler {
            store,
            locks,
            cache,
            clock,
            credits,
            allowed_domains,
            referral_channel,
        }
    }

    async fn sign_up(&self, new_user: NewUser) -> Result<User, ServiceError> {
        new_user.validate(&self.allowed_domains)?;

        let email = new_user.email.trim().to_ascii_lowercase();
        let existing = self
            .store
            .get_user_by_email(&email)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "email {} is already registered",
                email
            )));
        }

        let referrer_id = match new_user.referral_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                let referrer = self
                    .store
                    .get_user_by_referral_code(&code.to_ascii_uppercase())
                    .await
                    .map_err(|e| ServiceError::repository(SERVICE, e))?;
                if referrer.is_none() {
                    log::warn!("Ignoring unknown referral code {} at sign-up.", code);
                }
                referrer.map(|r| r.id)
            }
            _ => None,
        };

        let mut attempt = 0;
        let user = loop {
            attempt += 1;
            let user_id = new_id();
            let record = NewUserRecord {
                referral_code: referral_code_for(&user_id),
                id: user_id.clone(),
                email: email.clone(),
                username: new_user.username.trim().to_string(),
                signup_date: self.clock.today(),
            };
            let code = record.referral_code.clone();
            let welcome = NewCreditTransaction::new(
                user_id.clone(),
                self.credits.welcome_bonus,
                TransactionCategory::WelcomeBonus,
                "Welcome to Stride Campus",
            );

            match self
                .store
                .insert_user(record, welcome, referrer_id.clone())
                .await
            {
                Ok(user) => break user,
                Err(RepositoryError::Conflict(what)) if attempt < SIGN_UP_ATTEMPTS => {
                    // A fresh id also means a fresh code; only retry when the
                    // code is what collided.
                    let collided = self
                        .store
                        .get_user_by_referral_code(&code)
                        .await
                        .map_err(|e| ServiceError::repository(SERVICE, e))?
                        .is_some();
                    if !collided {
                        return Err(ServiceError::Conflict(what));
                    }
                    log::warn!("Referral code {} collided, retrying sign-up.", code);
                }
                Err(e) => return Err(ServiceError::repository(SERVICE, e)),
            }
        };

        log::info!("Signed up {} ({}).", user.username, user.id);
        self.cache.put(user.clone());

        Ok(user)
    }

    async fn get_profile(&self, id: &str) -> Result<User, ServiceError> {
        if let Some(user) = self.cache.get(id) {
            return Ok(user);
        }

        let generation = self.cache.generation();
        let user = self
            .store
            .get_user_by_id(id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", id)))?;
        if !self.cache.put_fresh(user.clone(), generation) {
            log::debug!("Profile {} changed while it was read, not caching it.", id);
        }

        Ok(user)
    }

    async fn daily_login(&self, id: &str) -> Result<LoginOutcome, ServiceError> {
        let _guard = self.locks.lock(id).await;
        let today = self.clock.today();

        // Always decide from a fresh read, never from the cache.
        let user = self.fetch(id).await?;
        if user.last_login_date == Some(today) {
            return Ok(LoginOutcome {
                streak: user.login_streak,
                user,
                bonus: None,
            });
        }

        let continues = user
            .last_login_date
            .and_then(|last| last.succ_opt())
            .is_some_and(|next| next == today);
        let streak = if continues { user.login_streak + 1 } else { 1 };

        let bonus = NewCreditTransaction::new(
            id,
            self.credits.daily_login_bonus,
            TransactionCategory::DailyLogin,
            format!("Daily login bonus (day {})", streak),
        )
        .with_reference(today.to_string());

        let applied = self
            .store
            .record_login(id, today, streak, bonus)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;
        self.cache.invalidate(id);

        let user = self.fetch(id).await?;
        if applied.is_some() {
            log::info!("Daily login for {}: streak {}.", id, user.login_streak);
        }

        Ok(LoginOutcome {
            streak: user.login_streak,
            user,
            bonus: applied,
        })
    }

    async fn verify(&self, id: &str) -> Result<User, ServiceError> {
        let user = self
            .store
            .set_verified(id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;
        self.cache.invalidate(id);

        let referral = self
            .store
            .get_referral_for_referred(id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;

        if let Some(referral) = referral {
            let completion = super::request(
                &self.referral_channel,
                REFERRAL_TIMEOUT,
                "ReferralService",
                |response| ReferralRequest::Complete {
                    referral_id: referral.id.clone(),
                    response,
                },
            )
            .await;

            // The user is verified either way; a failed completion can be
            // retried through the referral endpoint.
            match completion {
                Ok(Some(_)) => log::info!("Completed referral {} on verification.", referral.id),
                Ok(None) => {}
                Err(e) => log::error!("Could not complete referral {}: {}", referral.id, e),
            }

            return self.fetch(id).await;
        }

        Ok(user)
    }

    async fn update_preferences(
        &self,
        id: &str,
        preferences: Preferences,
    ) -> Result<User, ServiceError> {
        let user = self
            .store
            .update_preferences(id, &preferences)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;
        self.cache.invalidate(id);

        Ok(user)
    }

    async fn delete_account(&self, id: &str) -> Result<(), ServiceError> {
        let _guard = self.locks.lock(id).await;

        let deleted = self
            .store
            .delete_user(id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;
        self.cache.invalidate(id);

        if deleted {
            log::info!("Deleted account {}.", id);
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("user {}", id)))
        }
    }

    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        self.store
            .leaderboard(limit.clamp(1, 100))
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))
    }

    async fn fetch(&self, id: &str) -> Result<User, ServiceError> {
        self.store
            .get_user_by_id(id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", id)))
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::SignUp { user, response } => {
                let result = self.sign_up(user).await;
                let _ = response.send(result);
            }
            UserRequest::GetProfile { id, response } => {
                let result = self.get_profile(&id).await;
                let _ = response.send(result);
            }
            UserRequest::DailyLogin { id, response } => {
                let result = self.daily_login(&id).await;
                let _ = response.send(result);
            }
            UserRequest::Verify { id, response } => {
                let result = self.verify(&id).await;
                let _ = response.send(result);
            }
            UserRequest::UpdatePreferences {
                id,
                preferences,
                response,
            } => {
                let result = self.update_preferences(&id, preferences).await;
                let _ = response.send(result);
            }
            UserRequest::DeleteAccount { id, response } => {
                let result = self.delete_account(&id).await;
                let _ = response.send(result);
            }
            UserRequest::Leaderboard { limit, response } => {
                let result = self.leaderboard(limit).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}
