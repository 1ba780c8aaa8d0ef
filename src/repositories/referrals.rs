use async_trait::async_trait;

use super::{ledger, MemoryStore, PgStore, RepositoryError};
use crate::models::{
    referrals::{Referral, ReferralStatus},
    transactions::{LedgerEntry, NewCreditTransaction},
};

#[async_trait]
pub trait ReferralRepository: Send + Sync + 'static {
    async fn get_referral(&self, referral_id: &str) -> Result<Option<Referral>, RepositoryError>;

    async fn get_referral_for_referred(
        &self,
        referred_id: &str,
    ) -> Result<Option<Referral>, RepositoryError>;

    async fn list_referrals_by_referrer(
        &self,
        referrer_id: &str,
    ) -> Result<Vec<Referral>, RepositoryError>;

    /// Moves a pending referral to completed, flips `bonus_awarded` and
    /// applies every bonus entry, all or nothing. Returns `None` when the
    /// referral is no longer pending or its bonus was already awarded.
    async fn complete_referral(
        &self,
        referral_id: &str,
        bonuses: Vec<NewCreditTransaction>,
    ) -> Result<Option<(Referral, Vec<LedgerEntry>)>, RepositoryError>;

    /// Returns `None` when the referral is no longer pending.
    async fn cancel_referral(&self, referral_id: &str)
        -> Result<Option<Referral>, RepositoryError>;
}

#[async_trait]
impl ReferralRepository for PgStore {
    async fn get_referral(&self, referral_id: &str) -> Result<Option<Referral>, RepositoryError> {
        let referral = sqlx::query_as::<_, Referral>("SELECT * FROM referrals WHERE id = $1")
            .bind(referral_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(referral)
    }

    async fn get_referral_for_referred(
        &self,
        referred_id: &str,
    ) -> Result<Option<Referral>, RepositoryError> {
        let referral =
            sqlx::query_as::<_, Referral>("SELECT * FROM referrals WHERE referred_id = $1")
                .bind(referred_id)
                .fetch_optional(&self.conn)
                .await?;

        Ok(referral)
    }

    async fn list_referrals_by_referrer(
        &self,
        referrer_id: &str,
    ) -> Result<Vec<Referral>, RepositoryError> {
        let referrals = sqlx::query_as::<_, Referral>(
            "SELECT * FROM referrals WHERE referrer_id = $1 ORDER BY created_at DESC",
        )
        .bind(referrer_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(referrals)
    }

    async fn complete_referral(
        &self,
        referral_id: &str,
        bonuses: Vec<NewCreditTransaction>,
    ) -> Result<Option<(Referral, Vec<LedgerEntry>)>, RepositoryError> {
        let mut tx = self.conn.begin().await?;

        let referral = sqlx::query_as::<_, Referral>(
            r#"
                UPDATE referrals
                SET status = 'completed', bonus_awarded = true, completed_at = CURRENT_TIMESTAMP
                WHERE id = $1 AND status = 'pending' AND bonus_awarded = false
                RETURNING *
            "#,
        )
        .bind(referral_id)
        .fetch_optional(&mut *tx)
        .await?;

        let referral = match referral {
            Some(referral) => referral,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        let mut entries = Vec::with_capacity(bonuses.len());
        for bonus in &bonuses {
            entries.push(ledger::apply_entry(&mut tx, bonus).await?);
        }
        tx.commit().await?;

        Ok(Some((referral, entries)))
    }

    async fn cancel_referral(
        &self,
        referral_id: &str,
    ) -> Result<Option<Referral>, RepositoryError> {
        let referral = sqlx::query_as::<_, Referral>(
            r#"
                UPDATE referrals SET status = 'cancelled'
                WHERE id = $1 AND status = 'pending'
                RETURNING *
            "#,
        )
        .bind(referral_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(referral)
    }
}

#[async_trait]
impl ReferralRepository for MemoryStore {
    async fn get_referral(&self, referral_id: &str) -> Result<Option<Referral>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.referrals.iter().find(|r| r.id == referral_id).cloned())
    }

    async fn get_referral_for_referred(
        &self,
        referred_id: &str,
    ) -> Result<Option<Referral>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .referrals
            .iter()
            .find(|r| r.referred_id == referred_id)
            .cloned())
    }

    async fn list_referrals_by_referrer(
        &self,
        referrer_id: &str,
    ) -> Result<Vec<Referral>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .referrals
            .iter()
            .rev()
            .filter(|r| r.referrer_id == referrer_id)
            .cloned()
            .collect())
    }

    async fn complete_referral(
        &self,
        referral_id: &str,
        bonuses: Vec<NewCreditTransaction>,
    ) -> Result<Option<(Referral, Vec<LedgerEntry>)>, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let index = match state.referrals.iter().position(|r| r.id == referral_id) {
            Some(index) => index,
            None => return Ok(None),
        };
        let referral = &state.referrals[index];
        if !referral.status.can_transition_to(ReferralStatus::Completed) || referral.bonus_awarded
        {
            return Ok(None);
        }

        // Bonuses are credits, so only a missing user can fail here; check
        // up front to keep the whole completion all or nothing.
        if let Some(missing) = bonuses.iter().find(|b| !state.users.contains_key(&b.user_id)) {
            return Err(RepositoryError::NotFound(format!("user {}", missing.user_id)));
        }

        let mut entries = Vec::with_capacity(bonuses.len());
        for bonus in &bonuses {
            entries.push(state.apply_entry(bonus, now)?);
        }

        let referral = &mut state.referrals[index];
        referral.status = ReferralStatus::Completed;
        referral.bonus_awarded = true;
        referral.completed_at = Some(now);

        Ok(Some((referral.clone(), entries)))
    }

    async fn cancel_referral(
        &self,
        referral_id: &str,
    ) -> Result<Option<Referral>, RepositoryError> {
        let mut state = self.state.lock().await;
        match state.referrals.iter_mut().find(|r| r.id == referral_id) {
            Some(referral) if referral.status.can_transition_to(ReferralStatus::Cancelled) => {
                referral.status = ReferralStatus::Cancelled;
                Ok(Some(referral.clone()))
            }
            _ => Ok(None),
        }
    }
}
