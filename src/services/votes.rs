use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use super::credits::CreditRequest;
use super::notifications::NotificationRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::models::{
    notifications::{NewNotification, NotificationKind},
    transactions::{NewCreditTransaction, TransactionCategory},
    votes::{NewPost, Post, Vote, VoteDirection, VoteOutcome},
};
use crate::repositories::Store;
use crate::utils::locks::KeyedLocks;

const SERVICE: &str = "VoteService";
const REWARD_TIMEOUT: Duration = Duration::from_secs(5);

pub enum VoteRequest {
    CreatePost {
        post: NewPost,
        response: oneshot::Sender<Result<Post, ServiceError>>,
    },
    GetPost {
        post_id: String,
        response: oneshot::Sender<Result<Post, ServiceError>>,
    },
    GetVote {
        user_id: String,
        post_id: String,
        response: oneshot::Sender<Result<Option<Vote>, ServiceError>>,
    },
    ToggleVote {
        user_id: String,
        post_id: String,
        direction: VoteDirection,
        response: oneshot::Sender<Result<VoteOutcome, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct VoteRequestHandler {
    store: Arc<dyn Store>,
    locks: KeyedLocks,
    upvote_reward: i64,
    credit_channel: mpsc::Sender<CreditRequest>,
    notification_channel: mpsc::Sender<NotificationRequest>,
}

impl VoteRequestHandler {
    pub fn new(
        store: Arc<dyn Store>,
        locks: KeyedLocks,
        upvote_reward: i64,
        credit_channel: mpsc::Sender<CreditRequest>,
        notification_channel: mpsc::Sender<NotificationRequest>,
    ) -> Self {
        VoteRequestHandler {
            store,
            locks,
            upvote_reward,
            credit_channel,
            notification_channel,
        }
    }

    async fn create_post(&self, post: NewPost) -> Result<Post, ServiceError> {
        post.validate()?;

        self.store
            .insert_post(&post)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))
    }

    async fn get_post(&self, post_id: &str) -> Result<Post, ServiceError> {
        self.store
            .get_post(post_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?
            .ok_or_else(|| ServiceError::NotFound(format!("post {}", post_id)))
    }

    async fn get_vote(&self, user_id: &str, post_id: &str) -> Result<Option<Vote>, ServiceError> {
        self.store
            .get_vote(user_id, post_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))
    }

    async fn toggle_vote(
        &self,
        user_id: &str,
        post_id: &str,
        direction: VoteDirection,
    ) -> Result<VoteOutcome, ServiceError> {
        let voter = self
            .store
            .get_user_by_id(user_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))?;

        let outcome = {
            let _guard = self.locks.lock(&format!("vote:{}:{}", user_id, post_id)).await;
            self.store
                .toggle_vote(user_id, post_id, direction)
                .await
                .map_err(|e| ServiceError::repository(SERVICE, e))?
        };

        if outcome.is_new_upvote() && outcome.post.author_id != user_id {
            self.reward_author(&outcome.post, &voter.id, &voter.username)
                .await;
        }

        Ok(outcome)
    }

    /// Credits the author once per (voter, post). A failed reward never
    /// fails the vote itself.
    async fn reward_author(&self, post: &Post, voter_id: &str, voter_name: &str) {
        if self.upvote_reward <= 0 {
            return;
        }

        let entry = NewCreditTransaction::new(
            post.author_id.clone(),
            self.upvote_reward,
            TransactionCategory::UpvoteReward,
            format!("Upvote on \"{}\"", post.title),
        )
        .with_reference(format!("post:{}:voter:{}", post.id, voter_id));

        let rewarded = super::request(&self.credit_channel, REWARD_TIMEOUT, "CreditService", |response| {
            CreditRequest::RecordOnce { entry, response }
        })
        .await;

        match rewarded {
            Ok(Some(_)) => {
                let notification = NewNotification {
                    user_id: post.author_id.clone(),
                    kind: NotificationKind::UpvoteReceived,
                    title: "New upvote".to_string(),
                    body: format!("{} upvoted \"{}\".", voter_name, post.title),
                    payload: json!({ "post_id": post.id }),
                };
                let _ = self
                    .notification_channel
                    .send(NotificationRequest::Notify {
                        notification,
                        response: None,
                    })
                    .await
                    .map_err(|e| log::warn!("Failed to queue upvote notification: {}", e));
            }
            Ok(None) => {}
            Err(e) => log::error!("Upvote reward for post {} failed: {}", post.id, e),
        }
    }
}

#[async_trait]
impl RequestHandler<VoteRequest> for VoteRequestHandler {
    async fn handle_request(&self, request: VoteRequest) {
        match request {
            VoteRequest::CreatePost { post, response } => {
                let result = self.create_post(post).await;
                let _ = response.send(result);
            }
            VoteRequest::GetPost { post_id, response } => {
                let result = self.get_post(&post_id).await;
                let _ = response.send(result);
            }
            VoteRequest::GetVote {
                user_id,
                post_id,
                response,
            } => {
                let result = self.get_vote(&user_id, &post_id).await;
                let _ = response.send(result);
            }
            VoteRequest::ToggleVote {
                user_id,
                post_id,
                direction,
                response,
            } => {
                let result = self.toggle_vote(&user_id, &post_id, direction).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct VoteService;

impl VoteService {
    pub fn new() -> Self {
        VoteService {}
    }
}

#[async_trait]
impl Service<VoteRequest, VoteRequestHandler> for VoteService {}
