use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{UnknownVariant, ValidationError};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteDirection::Up => "up",
            VoteDirection::Down => "down",
        }
    }

    pub fn weight(&self) -> i64 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }
}

impl TryFrom<String> for VoteDirection {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "up" => Ok(VoteDirection::Up),
            "down" => Ok(VoteDirection::Down),
            _ => Err(UnknownVariant {
                kind: "vote direction",
                value,
            }),
        }
    }
}

/// The vote a user holds on a post after pressing `pressed` while holding
/// `current`. Pressing the same button again clears the vote.
pub fn next_vote(current: Option<VoteDirection>, pressed: VoteDirection) -> Option<VoteDirection> {
    match current {
        Some(existing) if existing == pressed => None,
        _ => Some(pressed),
    }
}

/// Change in a post's vote count when a user's vote moves from `from` to `to`.
pub fn vote_delta(from: Option<VoteDirection>, to: Option<VoteDirection>) -> i64 {
    to.map_or(0, |d| d.weight()) - from.map_or(0, |d| d.weight())
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub space_id: String,
    pub title: String,
    pub vote_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewPost {
    pub author_id: String,
    pub space_id: String,
    pub title: String,
}

impl NewPost {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::Empty("title"));
        }
        if self.space_id.trim().is_empty() {
            return Err(ValidationError::Empty("space_id"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct Vote {
    pub user_id: String,
    pub post_id: String,
    #[sqlx(try_from = "String")]
    pub direction: VoteDirection,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct VoteOutcome {
    pub post: Post,
    pub previous: Option<VoteDirection>,
    pub current: Option<VoteDirection>,
}

impl VoteOutcome {
    pub fn is_new_upvote(&self) -> bool {
        self.current == Some(VoteDirection::Up) && self.previous != Some(VoteDirection::Up)
    }
}
