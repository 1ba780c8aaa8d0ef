use async_trait::async_trait;
use chrono::NaiveDate;

use super::{ledger, MemoryStore, PgStore, RepositoryError};
use crate::models::{
    leaderboard::LeaderboardEntry,
    referrals::{Referral, ReferralStatus},
    transactions::{LedgerEntry, NewCreditTransaction},
    users::{NewUserRecord, Preferences, User, Visibility},
};

#[async_trait]
pub trait UserRepository: Send + Sync + 'static {
    /// Creates the user with a zero balance, then applies `welcome` through
    /// the ledger. A pending referral is linked when `referrer_id` names an
    /// existing user; a referrer that vanished since the code lookup is
    /// skipped and the sign-up still succeeds.
    async fn insert_user(
        &self,
        user: NewUserRecord,
        welcome: NewCreditTransaction,
        referrer_id: Option<String>,
    ) -> Result<User, RepositoryError>;

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, RepositoryError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    async fn get_user_by_referral_code(&self, code: &str)
        -> Result<Option<User>, RepositoryError>;

    /// Marks `today` as the user's last login with the given streak, and
    /// applies `bonus`. Returns `None` without touching anything when the
    /// user has already logged in on `today`.
    async fn record_login(
        &self,
        user_id: &str,
        today: NaiveDate,
        streak: i32,
        bonus: NewCreditTransaction,
    ) -> Result<Option<LedgerEntry>, RepositoryError>;

    async fn set_verified(&self, user_id: &str) -> Result<User, RepositoryError>;

    async fn update_preferences(
        &self,
        user_id: &str,
        preferences: &Preferences,
    ) -> Result<User, RepositoryError>;

    /// Removes the user and every row that belongs to them.
    async fn delete_user(&self, user_id: &str) -> Result<bool, RepositoryError>;

    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, RepositoryError>;
}

#[async_trait]
impl UserRepository for PgStore {
    async fn insert_user(
        &self,
        user: NewUserRecord,
        welcome: NewCreditTransaction,
        referrer_id: Option<String>,
    ) -> Result<User, RepositoryError> {
        let mut tx = self.conn.begin().await?;

        sqlx::query(
            r#"
                INSERT INTO users
                (id, email, username, referral_code, login_streak, last_login_date)
                VALUES ($1, $2, $3, $4, 1, $5)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.referral_code)
        .bind(user.signup_date)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::from_insert(e, "user"))?;

        ledger::apply_entry(&mut tx, &welcome).await?;

        if let Some(referrer_id) = referrer_id {
            sqlx::query(
                r#"
                    INSERT INTO referrals (id, referrer_id, referred_id, referral_code, status)
                    SELECT $1, $2, $3, referral_code, 'pending' FROM users WHERE id = $2
                "#,
            )
            .bind(super::new_id())
            .bind(&referrer_id)
            .bind(&user.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::from_insert(e, "referral"))?;
        }

        let created = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(&user.id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(created)
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE lower(email) = lower($1)")
            .bind(email)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    async fn get_user_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE referral_code = $1")
            .bind(code)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    async fn record_login(
        &self,
        user_id: &str,
        today: NaiveDate,
        streak: i32,
        bonus: NewCreditTransaction,
    ) -> Result<Option<LedgerEntry>, RepositoryError> {
        let mut tx = self.conn.begin().await?;

        let updated = sqlx::query(
            r#"
                UPDATE users
                SET login_streak = $1, last_login_date = $2, updated_at = CURRENT_TIMESTAMP
                WHERE id = $3 AND last_login_date IS DISTINCT FROM $2
            "#,
        )
        .bind(streak)
        .bind(today)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let entry = ledger::apply_entry(&mut tx, &bonus).await?;
        tx.commit().await?;

        Ok(Some(entry))
    }

    async fn set_verified(&self, user_id: &str) -> Result<User, RepositoryError> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET verified = true, updated_at = CURRENT_TIMESTAMP WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .fetch_optional(&self.conn)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))
    }

    async fn update_preferences(
        &self,
        user_id: &str,
        preferences: &Preferences,
    ) -> Result<User, RepositoryError> {
        sqlx::query_as::<_, User>(
            r#"
                UPDATE users
                SET push_token = COALESCE($1, push_token),
                    push_enabled = COALESCE($2, push_enabled),
                    visibility = COALESCE($3, visibility),
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = $4
                RETURNING *
            "#,
        )
        .bind(&preferences.push_token)
        .bind(preferences.push_enabled)
        .bind(preferences.visibility.map(|v| v.as_str()))
        .bind(user_id)
        .fetch_optional(&self.conn)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))
    }

    async fn delete_user(&self, user_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, RepositoryError> {
        let entries = sqlx::query_as::<_, LeaderboardEntry>(
            "SELECT * FROM leaderboard ORDER BY credits DESC, user_id LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.conn)
        .await?;

        Ok(entries)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert_user(
        &self,
        user: NewUserRecord,
        welcome: NewCreditTransaction,
        referrer_id: Option<String>,
    ) -> Result<User, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let taken = state.users.values().any(|u| {
            u.id == user.id
                || u.email.eq_ignore_ascii_case(&user.email)
                || u.username == user.username
                || u.referral_code == user.referral_code
        });
        if taken {
            return Err(RepositoryError::Conflict("user already exists".to_string()));
        }

        let referrer_code = referrer_id
            .as_ref()
            .and_then(|id| state.users.get(id).map(|u| u.referral_code.clone()));

        let created = User {
            id: user.id.clone(),
            email: user.email,
            username: user.username,
            credits: 0,
            lifetime_credits: 0,
            login_streak: 1,
            last_login_date: Some(user.signup_date),
            verified: false,
            referral_code: user.referral_code,
            push_token: None,
            push_enabled: true,
            visibility: Visibility::Public,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(created.id.clone(), created);

        if let Err(e) = state.apply_entry(&welcome, now) {
            state.users.remove(&user.id);
            return Err(e);
        }

        if let (Some(referrer_id), Some(code)) = (referrer_id, referrer_code) {
            state.referrals.push(Referral {
                id: super::new_id(),
                referrer_id,
                referred_id: user.id.clone(),
                referral_code: code,
                status: ReferralStatus::Pending,
                bonus_awarded: false,
                created_at: now,
                completed_at: None,
            });
        }

        state
            .users
            .get(&user.id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user.id)))
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.users.get(user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn get_user_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.referral_code == code)
            .cloned())
    }

    async fn record_login(
        &self,
        user_id: &str,
        today: NaiveDate,
        streak: i32,
        bonus: NewCreditTransaction,
    ) -> Result<Option<LedgerEntry>, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let user = state
            .users
            .get(user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))?;
        if user.last_login_date == Some(today) {
            return Ok(None);
        }

        let entry = state.apply_entry(&bonus, now)?;
        if let Some(user) = state.users.get_mut(user_id) {
            user.login_streak = streak;
            user.last_login_date = Some(today);
        }

        Ok(Some(entry))
    }

    async fn set_verified(&self, user_id: &str) -> Result<User, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))?;
        user.verified = true;
        user.updated_at = now;

        Ok(user.clone())
    }

    async fn update_preferences(
        &self,
        user_id: &str,
        preferences: &Preferences,
    ) -> Result<User, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))?;

        if let Some(token) = &preferences.push_token {
            user.push_token = Some(token.clone());
        }
        if let Some(enabled) = preferences.push_enabled {
            user.push_enabled = enabled;
        }
        if let Some(visibility) = preferences.visibility {
            user.visibility = visibility;
        }
        user.updated_at = now;

        Ok(user.clone())
    }

    async fn delete_user(&self, user_id: &str) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        Ok(state.delete_user(user_id))
    }

    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, RepositoryError> {
        let state = self.state.lock().await;
        let mut entries: Vec<LeaderboardEntry> = state.leaderboard.values().cloned().collect();
        entries.sort_by(|a, b| b.credits.cmp(&a.credits).then(a.user_id.cmp(&b.user_id)));
        entries.truncate(limit.max(0) as usize);

        Ok(entries)
    }
}
