use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::cache::ProfileCache;
use crate::models::transactions::{
    CreditTransaction, LedgerEntry, NewCreditTransaction, Reconciliation, TransactionCategory,
};
use crate::repositories::Store;
use crate::utils::locks::KeyedLocks;

const SERVICE: &str = "CreditService";

pub enum CreditRequest {
    Record {
        entry: NewCreditTransaction,
        response: oneshot::Sender<Result<LedgerEntry, ServiceError>>,
    },
    /// Records `entry` unless the user already holds an entry with the same
    /// category and reference id. Answers `None` in that case.
    RecordOnce {
        entry: NewCreditTransaction,
        response: oneshot::Sender<Result<Option<LedgerEntry>, ServiceError>>,
    },
    Spend {
        user_id: String,
        amount: i64,
        category: TransactionCategory,
        description: String,
        reference_id: Option<String>,
        response: oneshot::Sender<Result<LedgerEntry, ServiceError>>,
    },
    GetBalance {
        user_id: String,
        response: oneshot::Sender<Result<i64, ServiceError>>,
    },
    ListTransactions {
        user_id: String,
        limit: i64,
        response: oneshot::Sender<Result<Vec<CreditTransaction>, ServiceError>>,
    },
    Reconcile {
        user_id: String,
        response: oneshot::Sender<Result<Reconciliation, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct CreditRequestHandler {
    store: Arc<dyn Store>,
    locks: KeyedLocks,
    cache: ProfileCache,
}

impl CreditRequestHandler {
    pub fn new(store: Arc<dyn Store>, locks: KeyedLocks, cache: ProfileCache) -> Self {
        CreditRequestHandler {
            store,
            locks,
            cache,
        }
    }

    async fn record(&self, entry: NewCreditTransaction) -> Result<LedgerEntry, ServiceError> {
        entry.validate()?;

        let _guard = self.locks.lock(&entry.user_id).await;
        self.commit(&entry).await
    }

    async fn record_once(
        &self,
        entry: NewCreditTransaction,
    ) -> Result<Option<LedgerEntry>, ServiceError> {
        entry.validate()?;
        let reference_id = entry.reference_id.clone().ok_or_else(|| {
            ServiceError::Validation("reference_id is required for one-off entries".to_string())
        })?;

        let _guard = self.locks.lock(&entry.user_id).await;
        let exists = self
            .store
            .has_transaction(&entry.user_id, entry.category, &reference_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;
        if exists {
            log::debug!(
                "Skipping {} for {}: {} already recorded.",
                entry.category,
                entry.user_id,
                reference_id
            );
            return Ok(None);
        }

        self.commit(&entry).await.map(Some)
    }

    async fn spend(
        &self,
        user_id: String,
        amount: i64,
        category: TransactionCategory,
        description: String,
        reference_id: Option<String>,
    ) -> Result<LedgerEntry, ServiceError> {
        if amount <= 0 {
            return Err(ServiceError::Validation(
                "spend amount must be positive".to_string(),
            ));
        }

        let entry = NewCreditTransaction {
            user_id,
            amount: -amount,
            category,
            description,
            reference_id,
        };
        self.record(entry).await
    }

    /// Caller holds the user's lock.
    async fn commit(&self, entry: &NewCreditTransaction) -> Result<LedgerEntry, ServiceError> {
        let result = self.store.commit(entry).await;
        match &result {
            Ok(applied) => {
                self.cache.invalidate(&entry.user_id);
                log::info!(
                    "Recorded {} of {} for {} (balance {}).",
                    entry.category,
                    entry.amount,
                    entry.user_id,
                    applied.balance
                );
            }
            Err(e) => {
                log::warn!(
                    "Rejected {} of {} for {}: {}",
                    entry.category,
                    entry.amount,
                    entry.user_id,
                    e
                );
            }
        }

        result.map_err(|e| ServiceError::repository(SERVICE, e))
    }

    async fn get_balance(&self, user_id: &str) -> Result<i64, ServiceError> {
        self.store
            .get_user_by_id(user_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?
            .map(|user| user.credits)
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, ServiceError> {
        self.store
            .list_transactions(user_id, limit.clamp(1, 500))
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))
    }

    /// Recomputes the stored balance from the ledger and rewrites it if the
    /// two disagree.
    async fn reconcile(&self, user_id: &str) -> Result<Reconciliation, ServiceError> {
        let _guard = self.locks.lock(user_id).await;

        let user = self
            .store
            .get_user_by_id(user_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))?;
        let (ledger_balance, lifetime_credits) = self
            .store
            .ledger_totals(user_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;

        if ledger_balance < 0 {
            log::error!(
                "Ledger for {} sums to {}, refusing to write a negative balance.",
                user_id,
                ledger_balance
            );
            return Err(ServiceError::Internal(format!(
                "ledger for user {} sums to a negative balance",
                user_id
            )));
        }

        let corrected =
            user.credits != ledger_balance || user.lifetime_credits != lifetime_credits;
        if corrected {
            log::warn!(
                "Balance drift for {}: stored {}, ledger {}. Correcting.",
                user_id,
                user.credits,
                ledger_balance
            );
            self.store
                .set_balance(user_id, ledger_balance, lifetime_credits)
                .await
                .map_err(|e| ServiceError::repository(SERVICE, e))?;
            self.cache.invalidate(user_id);
        }

        Ok(Reconciliation {
            user_id: user_id.to_string(),
            stored_balance: user.credits,
            ledger_balance,
            corrected,
        })
    }
}

#[async_trait]
impl RequestHandler<CreditRequest> for CreditRequestHandler {
    async fn handle_request(&self, request: CreditRequest) {
        match request {
            CreditRequest::Record { entry, response } => {
                let result = self.record(entry).await;
                let _ = response.send(result);
            }
            CreditRequest::RecordOnce { entry, response } => {
                let result = self.record_once(entry).await;
                let _ = response.send(result);
            }
            CreditRequest::Spend {
                user_id,
                amount,
                category,
                description,
                reference_id,
                response,
            } => {
                let result = self
                    .spend(user_id, amount, category, description, reference_id)
                    .await;
                let _ = response.send(result);
            }
            CreditRequest::GetBalance { user_id, response } => {
                let result = self.get_balance(&user_id).await;
                let _ = response.send(result);
            }
            CreditRequest::ListTransactions {
                user_id,
                limit,
                response,
            } => {
                let result = self.list_transactions(&user_id, limit).await;
                let _ = response.send(result);
            }
            CreditRequest::Reconcile { user_id, response } => {
                let result = self.reconcile(&user_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct CreditService;

impl CreditService {
    pub fn new() -> Self {
        CreditService {}
    }
}

#[async_trait]
impl Service<CreditRequest, CreditRequestHandler> for CreditService {}
