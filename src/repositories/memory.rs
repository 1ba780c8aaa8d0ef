use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{new_id, RepositoryError};
use crate::models::{
    chat::{ChatSession, Message},
    leaderboard::LeaderboardEntry,
    notifications::Notification,
    referrals::Referral,
    resources::{Purchase, Resource},
    transactions::{CreditTransaction, LedgerEntry, NewCreditTransaction},
    users::{Level, User},
    votes::{Post, Vote},
};

#[derive(Default)]
pub struct MemoryState {
    pub(super) users: HashMap<String, User>,
    pub(super) transactions: Vec<CreditTransaction>,
    pub(super) referrals: Vec<Referral>,
    pub(super) leaderboard: HashMap<String, LeaderboardEntry>,
    pub(super) posts: HashMap<String, Post>,
    pub(super) votes: HashMap<(String, String), Vote>,
    pub(super) resources: HashMap<String, Resource>,
    pub(super) purchases: Vec<Purchase>,
    pub(super) sessions: HashMap<String, ChatSession>,
    pub(super) messages: Vec<Message>,
    pub(super) notifications: Vec<Notification>,
}

impl MemoryState {
    /// Ledger insert plus floor-checked balance update. Nothing is touched
    /// when the check fails.
    pub(super) fn apply_entry(
        &mut self,
        entry: &NewCreditTransaction,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, RepositoryError> {
        let user = self
            .users
            .get_mut(&entry.user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", entry.user_id)))?;

        let balance = user.credits + entry.amount;
        if balance < 0 {
            return Err(RepositoryError::InsufficientCredits {
                balance: user.credits,
                requested: -entry.amount,
            });
        }

        user.credits = balance;
        user.lifetime_credits += entry.amount.max(0);
        user.updated_at = now;
        let snapshot = user.clone();

        let transaction = CreditTransaction {
            id: new_id(),
            user_id: entry.user_id.clone(),
            amount: entry.amount,
            category: entry.category,
            description: entry.description.clone(),
            reference_id: entry.reference_id.clone(),
            created_at: now,
        };
        self.transactions.push(transaction.clone());
        self.upsert_leaderboard(&snapshot, now);

        Ok(LedgerEntry {
            transaction,
            balance,
        })
    }

    pub(super) fn upsert_leaderboard(&mut self, user: &User, now: DateTime<Utc>) {
        self.leaderboard.insert(
            user.id.clone(),
            LeaderboardEntry {
                user_id: user.id.clone(),
                username: user.username.clone(),
                credits: user.credits,
                level: Level::from_lifetime_credits(user.lifetime_credits)
                    .name()
                    .to_string(),
                updated_at: now,
            },
        );
    }

    pub(super) fn session_owner(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).map(|s| s.user_id.clone())
    }

    pub(super) fn delete_user(&mut self, user_id: &str) -> bool {
        if self.users.remove(user_id).is_none() {
            return false;
        }

        let session_ids: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id.clone())
            .collect();
        let post_ids: Vec<String> = self
            .posts
            .values()
            .filter(|p| p.author_id == user_id)
            .map(|p| p.id.clone())
            .collect();
        let resource_ids: Vec<String> = self
            .resources
            .values()
            .filter(|r| r.uploader_id == user_id)
            .map(|r| r.id.clone())
            .collect();

        self.transactions.retain(|t| t.user_id != user_id);
        self.referrals
            .retain(|r| r.referrer_id != user_id && r.referred_id != user_id);
        self.leaderboard.remove(user_id);
        self.votes
            .retain(|(voter, post), _| voter != user_id && !post_ids.contains(post));
        self.posts.retain(|id, _| !post_ids.contains(id));
        self.purchases
            .retain(|p| p.user_id != user_id && !resource_ids.contains(&p.resource_id));
        self.resources.retain(|id, _| !resource_ids.contains(id));
        self.messages
            .retain(|m| !session_ids.contains(&m.session_id));
        self.sessions.retain(|id, _| !session_ids.contains(id));
        self.notifications.retain(|n| n.user_id != user_id);

        true
    }
}
