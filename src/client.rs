//! In-process client for one signed-in user. Every mutation goes through an
//! [`optimistic::OptimisticStore`] so callers can render the tentative value
//! immediately and fall back to the last confirmed one on failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::models::{
    chat::{AppendedMessage, Message, NewMessage},
    realtime::RealtimeEvent,
    resources::PurchaseReceipt,
    transactions::{LedgerEntry, TransactionCategory},
    votes::{next_vote, vote_delta, VoteDirection, VoteOutcome},
};
use crate::repositories::{new_id, Store};
use crate::services::{
    chat::ChatRequest, credits::CreditRequest, request, resources::ResourceRequest,
    votes::VoteRequest, ServiceChannels, ServiceError,
};
use crate::settings::Realtime;

pub mod feed;
pub mod optimistic;

use optimistic::OptimisticStore;

/// What a post's vote widget shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteView {
    pub direction: Option<VoteDirection>,
    pub vote_count: i64,
}

impl VoteView {
    fn pressed(&self, direction: VoteDirection) -> Self {
        let next = next_vote(self.direction, direction);
        VoteView {
            direction: next,
            vote_count: self.vote_count + vote_delta(self.direction, next),
        }
    }
}

impl From<&VoteOutcome> for VoteView {
    fn from(outcome: &VoteOutcome) -> Self {
        VoteView {
            direction: outcome.current,
            vote_count: outcome.post.vote_count,
        }
    }
}

#[derive(Clone)]
pub struct CampusClient {
    user_id: String,
    channels: ServiceChannels,
    timeout: Duration,
    balance: OptimisticStore<String, i64>,
    votes: OptimisticStore<String, VoteView>,
    chats: OptimisticStore<String, Vec<Message>>,
}

impl CampusClient {
    pub fn new(user_id: impl Into<String>, channels: ServiceChannels, timeout: Duration) -> Self {
        CampusClient {
            user_id: user_id.into(),
            channels,
            timeout,
            balance: OptimisticStore::new(timeout),
            votes: OptimisticStore::new(timeout),
            chats: OptimisticStore::new(timeout),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Opens this user's realtime feed: `source`'s push subscription merged
    /// with a service poll at the configured fallback interval.
    pub async fn start_feed(
        &self,
        source: Arc<dyn Store>,
        settings: &Realtime,
    ) -> Result<mpsc::Receiver<RealtimeEvent>, ServiceError> {
        feed::start_feed(
            source,
            self.channels.clone(),
            &self.user_id,
            settings.poll_interval(),
            self.timeout,
        )
        .await
    }

    /// Balance as currently displayed, tentative while a debit is in flight.
    pub fn balance(&self) -> Option<i64> {
        self.balance.displayed(&self.user_id)
    }

    pub fn balance_state(&self) -> Option<optimistic::Optimistic<i64>> {
        self.balance.get(&self.user_id)
    }

    /// Re-reads the authoritative balance. The backend always wins.
    pub async fn refresh_balance(&self) -> Result<i64, ServiceError> {
        let user_id = self.user_id.clone();
        let balance = request(&self.channels.credits, self.timeout, "CreditService", |response| {
            CreditRequest::GetBalance { user_id, response }
        })
        .await?;

        self.balance.seed(self.user_id.clone(), balance);
        Ok(balance)
    }

    async fn ensure_balance(&self) -> Result<(), ServiceError> {
        if !self.balance.contains(&self.user_id) {
            self.refresh_balance().await?;
        }
        Ok(())
    }

    pub async fn spend(
        &self,
        amount: i64,
        category: TransactionCategory,
        description: impl Into<String>,
        reference_id: Option<String>,
    ) -> Result<LedgerEntry, ServiceError> {
        self.ensure_balance().await?;

        let user_id = self.user_id.clone();
        let description = description.into();
        let action = request(&self.channels.credits, self.timeout, "CreditService", |response| {
            CreditRequest::Spend {
                user_id,
                amount,
                category,
                description,
                reference_id,
                response,
            }
        });

        self.balance
            .run(
                self.user_id.clone(),
                |balance| balance - amount,
                action,
                |entry: &LedgerEntry, _| entry.balance,
            )
            .await
    }

    /// `None` means the resource was already owned and nothing was charged.
    pub async fn purchase(
        &self,
        resource_id: &str,
        price: i64,
    ) -> Result<Option<PurchaseReceipt>, ServiceError> {
        self.ensure_balance().await?;

        let user_id = self.user_id.clone();
        let resource_id = resource_id.to_string();
        let action = request(
            &self.channels.resources,
            self.timeout,
            "ResourceService",
            |response| ResourceRequest::Purchase {
                user_id,
                resource_id,
                response,
            },
        );

        self.balance
            .run(
                self.user_id.clone(),
                |balance| balance - price,
                action,
                |receipt: &Option<PurchaseReceipt>, before| {
                    receipt.as_ref().map_or(*before, |r| r.balance)
                },
            )
            .await
    }

    pub fn vote(&self, post_id: &str) -> Option<VoteView> {
        self.votes.displayed(&post_id.to_string())
    }

    /// Loads the post's count and this user's current vote.
    pub async fn load_vote(&self, post_id: &str) -> Result<VoteView, ServiceError> {
        let id = post_id.to_string();
        let post = request(&self.channels.votes, self.timeout, "VoteService", |response| {
            VoteRequest::GetPost {
                post_id: id,
                response,
            }
        })
        .await?;

        let user_id = self.user_id.clone();
        let id = post_id.to_string();
        let vote = request(&self.channels.votes, self.timeout, "VoteService", |response| {
            VoteRequest::GetVote {
                user_id,
                post_id: id,
                response,
            }
        })
        .await?;

        let view = VoteView {
            direction: vote.map(|v| v.direction),
            vote_count: post.vote_count,
        };
        self.votes.seed(post_id.to_string(), view);
        Ok(view)
    }

    pub async fn toggle_vote(
        &self,
        post_id: &str,
        direction: VoteDirection,
    ) -> Result<VoteOutcome, ServiceError> {
        if !self.votes.contains(&post_id.to_string()) {
            self.load_vote(post_id).await?;
        }

        let user_id = self.user_id.clone();
        let id = post_id.to_string();
        let action = request(&self.channels.votes, self.timeout, "VoteService", |response| {
            VoteRequest::ToggleVote {
                user_id,
                post_id: id,
                direction,
                response,
            }
        });

        self.votes
            .run(
                post_id.to_string(),
                |view| view.pressed(direction),
                action,
                |outcome: &VoteOutcome, _| VoteView::from(outcome),
            )
            .await
    }

    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        self.chats
            .displayed(&session_id.to_string())
            .unwrap_or_default()
    }

    pub async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>, ServiceError> {
        let user_id = self.user_id.clone();
        let id = session_id.to_string();
        let messages = request(&self.channels.chat, self.timeout, "ChatService", |response| {
            ChatRequest::ListMessages {
                user_id,
                session_id: id,
                since: None,
                response,
            }
        })
        .await?;

        self.chats.seed(session_id.to_string(), messages.clone());
        Ok(messages)
    }

    /// Shows the message right away under a client-chosen id, which also
    /// makes a resend after a timeout safe.
    pub async fn send_message(
        &self,
        session_id: &str,
        content: impl Into<String>,
    ) -> Result<AppendedMessage, ServiceError> {
        if !self.chats.contains(&session_id.to_string()) {
            self.load_messages(session_id).await?;
        }

        let message = NewMessage {
            id: Some(new_id()),
            content: content.into(),
            is_user: true,
        };
        let local = Message {
            id: message.id.clone().unwrap_or_default(),
            session_id: session_id.to_string(),
            content: message.content.clone(),
            is_user: true,
            created_at: Utc::now(),
        };

        let user_id = self.user_id.clone();
        let id = session_id.to_string();
        let action = request(&self.channels.chat, self.timeout, "ChatService", |response| {
            ChatRequest::SendMessage {
                user_id,
                session_id: id,
                message,
                response,
            }
        });

        self.chats
            .run(
                session_id.to_string(),
                |messages| {
                    let mut messages = messages.clone();
                    messages.push(local);
                    messages
                },
                action,
                |appended: &AppendedMessage, before| {
                    let mut messages = before.clone();
                    if !messages.iter().any(|m| m.id == appended.message.id) {
                        messages.push(appended.message.clone());
                    }
                    messages
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressing_the_same_direction_clears_the_vote() {
        let view = VoteView {
            direction: Some(VoteDirection::Up),
            vote_count: 4,
        };

        assert_eq!(
            view.pressed(VoteDirection::Up),
            VoteView {
                direction: None,
                vote_count: 3
            }
        );
    }

    #[test]
    fn switching_direction_moves_count_by_two() {
        let view = VoteView {
            direction: Some(VoteDirection::Up),
            vote_count: 4,
        };

        assert_eq!(view.pressed(VoteDirection::Down).vote_count, 2);
    }
}
