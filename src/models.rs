pub mod chat;
pub mod leaderboard;
pub mod notifications;
pub mod realtime;
pub mod referrals;
pub mod resources;
pub mod transactions;
pub mod users;
pub mod votes;

/// Raised when a stored text column does not map onto a known enum value.
#[derive(Debug, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{0} is too long (max {1} characters)")]
    TooLong(&'static str, usize),
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),
    #[error("Email domain not allowed: {0}")]
    EmailDomain(String),
    #[error("Invalid username: {0}")]
    InvalidUsername(String),
    #[error("Amount must not be zero")]
    ZeroAmount,
    #[error("{category} entries must be {expected}, got {amount}")]
    AmountSign {
        category: &'static str,
        expected: &'static str,
        amount: i64,
    },
    #[error("Price must not be negative")]
    NegativePrice,
}
