use async_trait::async_trait;
use sqlx::PgConnection;

use super::{new_id, MemoryStore, PgStore, RepositoryError};
use crate::models::{
    transactions::{CreditTransaction, LedgerEntry, NewCreditTransaction, TransactionCategory},
    users::Level,
};

#[async_trait]
pub trait LedgerRepository: Send + Sync + 'static {
    /// Appends `entry` and moves the user's balance by its amount in one
    /// atomic step. Debits that would take the balance below zero fail with
    /// `InsufficientCredits` and leave both the log and the balance alone.
    async fn commit(&self, entry: &NewCreditTransaction) -> Result<LedgerEntry, RepositoryError>;

    async fn has_transaction(
        &self,
        user_id: &str,
        category: TransactionCategory,
        reference_id: &str,
    ) -> Result<bool, RepositoryError>;

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, RepositoryError>;

    /// Sum of every amount and of every positive amount in the user's log.
    async fn ledger_totals(&self, user_id: &str) -> Result<(i64, i64), RepositoryError>;

    /// Overwrites the denormalised balance fields. Only the reconciler
    /// calls this, with totals freshly summed from the log.
    async fn set_balance(
        &self,
        user_id: &str,
        balance: i64,
        lifetime_credits: i64,
    ) -> Result<(), RepositoryError>;
}

/// Shared by every Postgres path that moves credits, so a composite write
/// (purchase, referral completion, sign-up) can apply its ledger entry
/// inside its own transaction.
pub(super) async fn apply_entry(
    conn: &mut PgConnection,
    entry: &NewCreditTransaction,
) -> Result<LedgerEntry, RepositoryError> {
    let updated: Option<(String, i64, i64)> = sqlx::query_as(
        r#"
            UPDATE users
            SET credits = credits + $1,
                lifetime_credits = lifetime_credits + GREATEST($1, 0),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $2 AND credits + $1 >= 0
            RETURNING username, credits, lifetime_credits
        "#,
    )
    .bind(entry.amount)
    .bind(&entry.user_id)
    .fetch_optional(&mut *conn)
    .await?;

    let (username, balance, lifetime_credits) = match updated {
        Some(row) => row,
        None => {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT credits FROM users WHERE id = $1")
                    .bind(&entry.user_id)
                    .fetch_optional(&mut *conn)
                    .await?;

            return Err(match current {
                Some(balance) => RepositoryError::InsufficientCredits {
                    balance,
                    requested: -entry.amount,
                },
                None => RepositoryError::NotFound(format!("user {}", entry.user_id)),
            });
        }
    };

    let transaction = sqlx::query_as::<_, CreditTransaction>(
        r#"
            INSERT INTO credit_transactions
            (id, user_id, amount, transaction_type, description, reference_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
        "#,
    )
    .bind(new_id())
    .bind(&entry.user_id)
    .bind(entry.amount)
    .bind(entry.category.as_str())
    .bind(&entry.description)
    .bind(&entry.reference_id)
    .fetch_one(&mut *conn)
    .await?;

    upsert_leaderboard(conn, &entry.user_id, &username, balance, lifetime_credits).await?;

    Ok(LedgerEntry {
        transaction,
        balance,
    })
}

pub(super) async fn upsert_leaderboard(
    conn: &mut PgConnection,
    user_id: &str,
    username: &str,
    credits: i64,
    lifetime_credits: i64,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
            INSERT INTO leaderboard (user_id, username, credits, level, updated_at)
            VALUES ($1, $2, $3, $4, CURRENT_TIMESTAMP)
            ON CONFLICT (user_id) DO UPDATE
            SET username = EXCLUDED.username,
                credits = EXCLUDED.credits,
                level = EXCLUDED.level,
                updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(user_id)
    .bind(username)
    .bind(credits)
    .bind(Level::from_lifetime_credits(lifetime_credits).name())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn commit(&self, entry: &NewCreditTransaction) -> Result<LedgerEntry, RepositoryError> {
        let mut tx = self.conn.begin().await?;
        let applied = apply_entry(&mut tx, entry).await?;
        tx.commit().await?;

        Ok(applied)
    }

    async fn has_transaction(
        &self,
        user_id: &str,
        category: TransactionCategory,
        reference_id: &str,
    ) -> Result<bool, RepositoryError> {
        let exists: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (
                SELECT 1 FROM credit_transactions
                WHERE user_id = $1 AND transaction_type = $2 AND reference_id = $3
            )"#,
        )
        .bind(user_id)
        .bind(category.as_str())
        .bind(reference_id)
        .fetch_one(&self.conn)
        .await?;

        Ok(exists)
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, RepositoryError> {
        let transactions = sqlx::query_as::<_, CreditTransaction>(
            r#"SELECT * FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.conn)
        .await?;

        Ok(transactions)
    }

    async fn ledger_totals(&self, user_id: &str) -> Result<(i64, i64), RepositoryError> {
        let totals: (i64, i64) = sqlx::query_as(
            r#"SELECT
                COALESCE(SUM(amount), 0)::BIGINT,
                COALESCE(SUM(GREATEST(amount, 0)), 0)::BIGINT
            FROM credit_transactions WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_one(&self.conn)
        .await?;

        Ok(totals)
    }

    async fn set_balance(
        &self,
        user_id: &str,
        balance: i64,
        lifetime_credits: i64,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.conn.begin().await?;

        let username: Option<String> = sqlx::query_scalar(
            r#"UPDATE users
            SET credits = $1, lifetime_credits = $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3
            RETURNING username"#,
        )
        .bind(balance)
        .bind(lifetime_credits)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let username =
            username.ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))?;
        upsert_leaderboard(&mut tx, user_id, &username, balance, lifetime_credits).await?;
        tx.commit().await?;

        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn commit(&self, entry: &NewCreditTransaction) -> Result<LedgerEntry, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.apply_entry(entry, now)
    }

    async fn has_transaction(
        &self,
        user_id: &str,
        category: TransactionCategory,
        reference_id: &str,
    ) -> Result<bool, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.transactions.iter().any(|t| {
            t.user_id == user_id
                && t.category == category
                && t.reference_id.as_deref() == Some(reference_id)
        }))
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn ledger_totals(&self, user_id: &str) -> Result<(i64, i64), RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .fold((0, 0), |(sum, lifetime), t| {
                (sum + t.amount, lifetime + t.amount.max(0))
            }))
    }

    async fn set_balance(
        &self,
        user_id: &str,
        balance: i64,
        lifetime_credits: i64,
    ) -> Result<(), RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))?;
        user.credits = balance;
        user.lifetime_credits = lifetime_credits;
        user.updated_at = now;
        let snapshot = user.clone();
        state.upsert_leaderboard(&snapshot, now);

        Ok(())
    }
}
