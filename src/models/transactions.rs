use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{UnknownVariant, ValidationError};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionCategory {
    Earned,
    Spent,
    Bonus,
    Refund,
    DailyLogin,
    WelcomeBonus,
    ReferralBonus,
    ResourcePurchase,
    UpvoteReward,
}

/// Which way an entry of a given category is allowed to move a balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Credit,
    Debit,
}

impl TransactionCategory {
    pub const ALL: [TransactionCategory; 9] = [
        TransactionCategory::Earned,
        TransactionCategory::Spent,
        TransactionCategory::Bonus,
        TransactionCategory::Refund,
        TransactionCategory::DailyLogin,
        TransactionCategory::WelcomeBonus,
        TransactionCategory::ReferralBonus,
        TransactionCategory::ResourcePurchase,
        TransactionCategory::UpvoteReward,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionCategory::Earned => "earned",
            TransactionCategory::Spent => "spent",
            TransactionCategory::Bonus => "bonus",
            TransactionCategory::Refund => "refund",
            TransactionCategory::DailyLogin => "daily_login",
            TransactionCategory::WelcomeBonus => "welcome_bonus",
            TransactionCategory::ReferralBonus => "referral_bonus",
            TransactionCategory::ResourcePurchase => "resource_purchase",
            TransactionCategory::UpvoteReward => "upvote_reward",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            TransactionCategory::Spent | TransactionCategory::ResourcePurchase => Direction::Debit,
            _ => Direction::Credit,
        }
    }
}

impl std::fmt::Display for TransactionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for TransactionCategory {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TransactionCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == value)
            .ok_or(UnknownVariant {
                kind: "transaction category",
                value,
            })
    }
}

/// One immutable row of the ledger.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct CreditTransaction {
    pub id: String,
    pub user_id: String,
    pub amount: i64,
    #[sqlx(rename = "transaction_type", try_from = "String")]
    #[serde(rename = "transaction_type")]
    pub category: TransactionCategory,
    pub description: String,
    pub reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NewCreditTransaction {
    pub user_id: String,
    pub amount: i64,
    #[serde(rename = "transaction_type")]
    pub category: TransactionCategory,
    pub description: String,
    pub reference_id: Option<String>,
}

impl NewCreditTransaction {
    pub fn new(
        user_id: impl Into<String>,
        amount: i64,
        category: TransactionCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            amount,
            category,
            description: description.into(),
            reference_id: None,
        }
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::Empty("user_id"));
        }
        if self.amount == 0 {
            return Err(ValidationError::ZeroAmount);
        }

        let sign_ok = match self.category.direction() {
            Direction::Credit => self.amount > 0,
            Direction::Debit => self.amount < 0,
        };
        if !sign_ok {
            return Err(ValidationError::AmountSign {
                category: self.category.as_str(),
                expected: match self.category.direction() {
                    Direction::Credit => "positive",
                    Direction::Debit => "negative",
                },
                amount: self.amount,
            });
        }

        Ok(())
    }

    pub fn is_debit(&self) -> bool {
        self.amount < 0
    }
}

/// A committed ledger row together with the balance it produced.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LedgerEntry {
    pub transaction: CreditTransaction,
    pub balance: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Reconciliation {
    pub user_id: String,
    pub stored_balance: i64,
    pub ledger_balance: i64,
    pub corrected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_text() {
        for category in TransactionCategory::ALL {
            let parsed = TransactionCategory::try_from(category.as_str().to_string()).unwrap();
            assert_eq!(parsed, category);
        }
        assert!(TransactionCategory::try_from("cashback".to_string()).is_err());
    }

    #[test]
    fn zero_amount_is_rejected() {
        let entry = NewCreditTransaction::new("u1", 0, TransactionCategory::Bonus, "nothing");
        assert_eq!(entry.validate(), Err(ValidationError::ZeroAmount));
    }

    #[test]
    fn debit_categories_require_negative_amounts() {
        let purchase =
            NewCreditTransaction::new("u1", 30, TransactionCategory::ResourcePurchase, "notes");
        assert!(matches!(
            purchase.validate(),
            Err(ValidationError::AmountSign { expected: "negative", .. })
        ));

        let refund = NewCreditTransaction::new("u1", -30, TransactionCategory::Refund, "notes");
        assert!(matches!(
            refund.validate(),
            Err(ValidationError::AmountSign { expected: "positive", .. })
        ));

        let spend = NewCreditTransaction::new("u1", -30, TransactionCategory::Spent, "boost");
        assert!(spend.validate().is_ok());
        assert!(spend.is_debit());
    }

    #[test]
    fn serializes_category_as_transaction_type() {
        let entry = NewCreditTransaction::new("u1", 5, TransactionCategory::DailyLogin, "streak")
            .with_reference("2026-10-16");
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["transaction_type"], "daily_login");
        assert_eq!(json["reference_id"], "2026-10-16");
    }
}
