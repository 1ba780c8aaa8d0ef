use async_trait::async_trait;

use super::{ledger, new_id, MemoryStore, PgStore, RepositoryError};
use crate::models::{
    resources::{NewResource, Purchase, PurchaseReceipt, Resource},
    transactions::NewCreditTransaction,
};

#[async_trait]
pub trait ResourceRepository: Send + Sync + 'static {
    async fn insert_resource(&self, resource: &NewResource) -> Result<Resource, RepositoryError>;

    async fn get_resource(&self, resource_id: &str) -> Result<Option<Resource>, RepositoryError>;

    async fn has_purchased(&self, user_id: &str, resource_id: &str)
        -> Result<bool, RepositoryError>;

    /// Records the purchase and applies `debit` together. A repeat purchase
    /// fails with `Conflict`, an unaffordable one with `InsufficientCredits`;
    /// either way nothing is written.
    async fn purchase_resource(
        &self,
        resource: &Resource,
        debit: &NewCreditTransaction,
    ) -> Result<PurchaseReceipt, RepositoryError>;
}

#[async_trait]
impl ResourceRepository for PgStore {
    async fn insert_resource(&self, resource: &NewResource) -> Result<Resource, RepositoryError> {
        let resource = sqlx::query_as::<_, Resource>(
            r#"
                INSERT INTO resources (id, uploader_id, title, price)
                VALUES ($1, $2, $3, $4)
                RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(&resource.uploader_id)
        .bind(&resource.title)
        .bind(resource.price)
        .fetch_one(&self.conn)
        .await?;

        Ok(resource)
    }

    async fn get_resource(&self, resource_id: &str) -> Result<Option<Resource>, RepositoryError> {
        let resource = sqlx::query_as::<_, Resource>("SELECT * FROM resources WHERE id = $1")
            .bind(resource_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(resource)
    }

    async fn has_purchased(
        &self,
        user_id: &str,
        resource_id: &str,
    ) -> Result<bool, RepositoryError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM resource_purchases WHERE user_id = $1 AND resource_id = $2)",
        )
        .bind(user_id)
        .bind(resource_id)
        .fetch_one(&self.conn)
        .await?;

        Ok(exists)
    }

    async fn purchase_resource(
        &self,
        resource: &Resource,
        debit: &NewCreditTransaction,
    ) -> Result<PurchaseReceipt, RepositoryError> {
        let mut tx = self.conn.begin().await?;

        let purchase = sqlx::query_as::<_, Purchase>(
            r#"
                INSERT INTO resource_purchases (id, user_id, resource_id, price)
                VALUES ($1, $2, $3, $4)
                RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(&debit.user_id)
        .bind(&resource.id)
        .bind(resource.price)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RepositoryError::from_insert(e, "purchase"))?;

        let balance = if debit.amount != 0 {
            ledger::apply_entry(&mut tx, debit).await?.balance
        } else {
            sqlx::query_scalar("SELECT credits FROM users WHERE id = $1")
                .bind(&debit.user_id)
                .fetch_one(&mut *tx)
                .await?
        };

        sqlx::query("UPDATE resources SET download_count = download_count + 1 WHERE id = $1")
            .bind(&resource.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(PurchaseReceipt { purchase, balance })
    }
}

#[async_trait]
impl ResourceRepository for MemoryStore {
    async fn insert_resource(&self, resource: &NewResource) -> Result<Resource, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if !state.users.contains_key(&resource.uploader_id) {
            return Err(RepositoryError::NotFound(format!(
                "user {}",
                resource.uploader_id
            )));
        }

        let created = Resource {
            id: new_id(),
            uploader_id: resource.uploader_id.clone(),
            title: resource.title.clone(),
            price: resource.price,
            download_count: 0,
            created_at: now,
        };
        state.resources.insert(created.id.clone(), created.clone());

        Ok(created)
    }

    async fn get_resource(&self, resource_id: &str) -> Result<Option<Resource>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.resources.get(resource_id).cloned())
    }

    async fn has_purchased(
        &self,
        user_id: &str,
        resource_id: &str,
    ) -> Result<bool, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .purchases
            .iter()
            .any(|p| p.user_id == user_id && p.resource_id == resource_id))
    }

    async fn purchase_resource(
        &self,
        resource: &Resource,
        debit: &NewCreditTransaction,
    ) -> Result<PurchaseReceipt, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if state
            .purchases
            .iter()
            .any(|p| p.user_id == debit.user_id && p.resource_id == resource.id)
        {
            return Err(RepositoryError::Conflict("purchase already exists".to_string()));
        }

        let balance = if debit.amount != 0 {
            state.apply_entry(debit, now)?.balance
        } else {
            state
                .users
                .get(&debit.user_id)
                .map(|u| u.credits)
                .ok_or_else(|| RepositoryError::NotFound(format!("user {}", debit.user_id)))?
        };

        let purchase = Purchase {
            id: new_id(),
            user_id: debit.user_id.clone(),
            resource_id: resource.id.clone(),
            price: resource.price,
            created_at: now,
        };
        state.purchases.push(purchase.clone());
        if let Some(stored) = state.resources.get_mut(&resource.id) {
            stored.download_count += 1;
        }

        Ok(PurchaseReceipt { purchase, balance })
    }
}
