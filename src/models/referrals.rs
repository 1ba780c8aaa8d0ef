use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UnknownVariant;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    Pending,
    Completed,
    Cancelled,
}

impl ReferralStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralStatus::Pending => "pending",
            ReferralStatus::Completed => "completed",
            ReferralStatus::Cancelled => "cancelled",
        }
    }

    /// Only pending referrals move, and only forward.
    pub fn can_transition_to(&self, next: ReferralStatus) -> bool {
        matches!(
            (self, next),
            (ReferralStatus::Pending, ReferralStatus::Completed)
                | (ReferralStatus::Pending, ReferralStatus::Cancelled)
        )
    }
}

impl TryFrom<String> for ReferralStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(ReferralStatus::Pending),
            "completed" => Ok(ReferralStatus::Completed),
            "cancelled" => Ok(ReferralStatus::Cancelled),
            _ => Err(UnknownVariant {
                kind: "referral status",
                value,
            }),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct Referral {
    pub id: String,
    pub referrer_id: String,
    pub referred_id: String,
    pub referral_code: String,
    #[sqlx(try_from = "String")]
    pub status: ReferralStatus,
    pub bonus_awarded: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReferralCompletion {
    pub referral: Referral,
    pub referrer_balance: i64,
    pub referred_balance: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::ReferralStatus::*;

    #[test]
    fn transitions_are_one_directional() {
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Pending));
    }
}
