use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::services::ServiceError;

/// One user-visible entity whose value may run ahead of the backend.
#[derive(Clone, Debug, PartialEq)]
pub enum Optimistic<T> {
    Idle {
        value: T,
    },
    Pending {
        confirmed: T,
        tentative: T,
    },
    Committed {
        value: T,
    },
    RolledBack {
        value: T,
        error: String,
        retryable: bool,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event<T> {
    Begin(T),
    Confirm(T),
    Fail { error: String, retryable: bool },
    TimedOut,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("another change is still pending")]
    AlreadyPending,
    #[error("no change is pending")]
    NotPending,
}

impl<T: Clone> Optimistic<T> {
    pub fn new(value: T) -> Self {
        Optimistic::Idle { value }
    }

    /// What the UI should show right now.
    pub fn displayed(&self) -> &T {
        match self {
            Optimistic::Pending { tentative, .. } => tentative,
            _ => self.confirmed(),
        }
    }

    /// Last value the backend agreed to.
    pub fn confirmed(&self) -> &T {
        match self {
            Optimistic::Idle { value }
            | Optimistic::Committed { value }
            | Optimistic::RolledBack { value, .. } => value,
            Optimistic::Pending { confirmed, .. } => confirmed,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Optimistic::Pending { .. })
    }

    /// Pure transition function. Only one change may be in flight: a
    /// `Begin` while pending is rejected rather than queued.
    pub fn reduce(&self, event: Event<T>) -> Result<Self, TransitionError> {
        match (self, event) {
            (Optimistic::Pending { .. }, Event::Begin(_)) => Err(TransitionError::AlreadyPending),
            (state, Event::Begin(tentative)) => Ok(Optimistic::Pending {
                confirmed: state.confirmed().clone(),
                tentative,
            }),
            (Optimistic::Pending { .. }, Event::Confirm(authoritative)) => {
                Ok(Optimistic::Committed {
                    value: authoritative,
                })
            }
            (Optimistic::Pending { confirmed, .. }, Event::Fail { error, retryable }) => {
                Ok(Optimistic::RolledBack {
                    value: confirmed.clone(),
                    error,
                    retryable,
                })
            }
            (Optimistic::Pending { confirmed, .. }, Event::TimedOut) => {
                Ok(Optimistic::RolledBack {
                    value: confirmed.clone(),
                    error: "request timed out".to_string(),
                    retryable: true,
                })
            }
            (_, _) => Err(TransitionError::NotPending),
        }
    }
}

/// One state machine per key, e.g. a post id for votes or a user id for a
/// balance display.
#[derive(Clone)]
pub struct OptimisticStore<K, T>
where
    K: Eq + Hash,
{
    entries: Arc<DashMap<K, Optimistic<T>>>,
    timeout: Duration,
}

impl<K, T> OptimisticStore<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(timeout: Duration) -> Self {
        OptimisticStore {
            entries: Arc::new(DashMap::new()),
            timeout,
        }
    }

    pub fn get(&self, key: &K) -> Option<Optimistic<T>> {
        self.entries.get(key).map(|state| state.clone())
    }

    pub fn displayed(&self, key: &K) -> Option<T> {
        self.entries.get(key).map(|state| state.displayed().clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Replaces the entry with a fresh authoritative value. Ignored while a
    /// change is pending; the confirmation will carry the backend's value.
    pub fn seed(&self, key: K, authoritative: T) -> bool {
        let mut entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Optimistic::new(authoritative.clone()));
        if entry.is_pending() {
            return false;
        }
        *entry = Optimistic::new(authoritative);
        true
    }

    pub fn dispatch(&self, key: &K, event: Event<T>) -> Result<Optimistic<T>, TransitionError> {
        let mut entry = self
            .entries
            .get_mut(key)
            .ok_or(TransitionError::NotPending)?;
        let next = entry.reduce(event)?;
        *entry = next.clone();
        Ok(next)
    }

    /// Moves `key` to pending with the value `begin` derives from the last
    /// confirmed one, awaits `action` under the store timeout, then commits
    /// the value `confirm` derives from the answer or rolls back.
    pub async fn run<R, Fut>(
        &self,
        key: K,
        begin: impl FnOnce(&T) -> T,
        action: Fut,
        confirm: impl FnOnce(&R, &T) -> T,
    ) -> Result<R, ServiceError>
    where
        Fut: Future<Output = Result<R, ServiceError>>,
    {
        let confirmed = {
            let mut entry = self.entries.get_mut(&key).ok_or_else(|| {
                ServiceError::Internal(format!("no optimistic state for {:?}", key))
            })?;
            let confirmed = entry.confirmed().clone();
            let next = entry
                .reduce(Event::Begin(begin(&confirmed)))
                .map_err(|e| ServiceError::Conflict(format!("{:?}: {}", key, e)))?;
            *entry = next;
            confirmed
        };
        let mut guard = PendingGuard {
            entries: &self.entries,
            key: Some(key.clone()),
        };

        let event;
        let result = match tokio::time::timeout(self.timeout, action).await {
            Ok(Ok(answer)) => {
                event = Event::Confirm(confirm(&answer, &confirmed));
                Ok(answer)
            }
            Ok(Err(e)) => {
                event = Event::Fail {
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                };
                Err(e)
            }
            Err(_) => {
                log::warn!("Optimistic change on {:?} timed out, rolling back.", key);
                event = Event::TimedOut;
                Err(ServiceError::Timeout(format!("{:?}", key)))
            }
        };

        guard.key = None;
        if let Err(e) = self.dispatch(&key, event) {
            log::error!("Optimistic state for {:?} lost its pending change: {}", key, e);
        }

        result
    }
}

/// Rolls a pending change back when `run` is dropped before it finishes,
/// e.g. a cancelled UI task or the losing branch of a `select!`.
struct PendingGuard<'a, K, T>
where
    K: Eq + Hash + Debug,
    T: Clone,
{
    entries: &'a DashMap<K, Optimistic<T>>,
    key: Option<K>,
}

impl<K, T> Drop for PendingGuard<'_, K, T>
where
    K: Eq + Hash + Debug,
    T: Clone,
{
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        if let Some(mut entry) = self.entries.get_mut(&key) {
            let cancelled = Event::Fail {
                error: "request cancelled".to_string(),
                retryable: true,
            };
            if let Ok(next) = entry.reduce(cancelled) {
                log::warn!("Optimistic change on {:?} was cancelled, rolling back.", key);
                *entry = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_then_confirm_commits_authoritative_value() {
        let state = Optimistic::new(10);

        let pending = state.reduce(Event::Begin(11)).unwrap();
        assert_eq!(*pending.displayed(), 11);
        assert_eq!(*pending.confirmed(), 10);

        let committed = pending.reduce(Event::Confirm(12)).unwrap();
        assert_eq!(committed, Optimistic::Committed { value: 12 });
    }

    #[test]
    fn failure_restores_last_confirmed_value() {
        let pending = Optimistic::new(100).reduce(Event::Begin(0)).unwrap();

        let rolled_back = pending
            .reduce(Event::Fail {
                error: "insufficient credits".to_string(),
                retryable: false,
            })
            .unwrap();

        assert_eq!(*rolled_back.displayed(), 100);
        assert!(!rolled_back.is_pending());
    }

    #[test]
    fn timeout_rolls_back_as_retryable() {
        let pending = Optimistic::new(5).reduce(Event::Begin(6)).unwrap();

        match pending.reduce(Event::TimedOut).unwrap() {
            Optimistic::RolledBack {
                value, retryable, ..
            } => {
                assert_eq!(value, 5);
                assert!(retryable);
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn second_begin_while_pending_is_rejected() {
        let pending = Optimistic::new(1).reduce(Event::Begin(2)).unwrap();

        assert_eq!(
            pending.reduce(Event::Begin(3)),
            Err(TransitionError::AlreadyPending)
        );
    }

    #[test]
    fn outcome_without_pending_change_is_rejected() {
        let idle = Optimistic::new(1);

        assert_eq!(idle.reduce(Event::Confirm(2)), Err(TransitionError::NotPending));
        assert_eq!(idle.reduce(Event::TimedOut), Err(TransitionError::NotPending));
    }

    #[test]
    fn new_change_starts_from_rolled_back_value() {
        let rolled_back = Optimistic::new(7)
            .reduce(Event::Begin(8))
            .unwrap()
            .reduce(Event::TimedOut)
            .unwrap();

        let pending = rolled_back.reduce(Event::Begin(9)).unwrap();
        assert_eq!(*pending.confirmed(), 7);
    }

    #[tokio::test]
    async fn run_commits_on_success() {
        let store = OptimisticStore::new(Duration::from_secs(1));
        store.seed("balance".to_string(), 120i64);

        let result = store
            .run(
                "balance".to_string(),
                |balance| balance - 20,
                async { Ok::<i64, ServiceError>(100) },
                |answer, _| *answer,
            )
            .await;

        assert_eq!(result.unwrap(), 100);
        assert_eq!(
            store.get(&"balance".to_string()),
            Some(Optimistic::Committed { value: 100 })
        );
    }

    #[tokio::test]
    async fn run_rolls_back_on_error() {
        let store = OptimisticStore::new(Duration::from_secs(1));
        store.seed("balance".to_string(), 100i64);

        let result = store
            .run(
                "balance".to_string(),
                |balance| balance - 300,
                async {
                    Err::<i64, ServiceError>(ServiceError::InsufficientCredits {
                        balance: 100,
                        requested: 300,
                    })
                },
                |answer, _| *answer,
            )
            .await;

        assert!(matches!(
            result,
            Err(ServiceError::InsufficientCredits { .. })
        ));
        assert_eq!(store.displayed(&"balance".to_string()), Some(100));
    }

    #[tokio::test]
    async fn run_rolls_back_on_timeout() {
        let store = OptimisticStore::new(Duration::from_millis(50));
        store.seed("post".to_string(), 3i64);

        let result = store
            .run(
                "post".to_string(),
                |count| count + 1,
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<i64, ServiceError>(4)
                },
                |answer, _| *answer,
            )
            .await;

        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.displayed(&"post".to_string()), Some(3));
        assert!(!store.get(&"post".to_string()).unwrap().is_pending());
    }

    #[tokio::test]
    async fn run_rejects_a_second_change_while_pending() {
        let store = OptimisticStore::new(Duration::from_secs(1));
        store.seed("post".to_string(), 0i64);
        store
            .dispatch(&"post".to_string(), Event::Begin(1))
            .unwrap();

        let result = store
            .run(
                "post".to_string(),
                |count| count + 1,
                async { Ok::<i64, ServiceError>(2) },
                |answer, _| *answer,
            )
            .await;

        assert!(matches!(result, Err(ServiceError::Conflict(_))));
        assert_eq!(store.displayed(&"post".to_string()), Some(1));
    }

    #[tokio::test]
    async fn dropped_run_does_not_stay_pending() {
        let store = OptimisticStore::new(Duration::from_secs(3600));
        store.seed("balance".to_string(), 100i64);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            store.run(
                "balance".to_string(),
                |balance| balance - 10,
                async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok::<i64, ServiceError>(90)
                },
                |answer, _| *answer,
            ),
        )
        .await;
        assert!(abandoned.is_err());

        match store.get(&"balance".to_string()).unwrap() {
            Optimistic::RolledBack {
                value, retryable, ..
            } => {
                assert_eq!(value, 100);
                assert!(retryable);
            }
            other => panic!("unexpected state {:?}", other),
        }

        let retried = store
            .run(
                "balance".to_string(),
                |balance| balance - 10,
                async { Ok::<i64, ServiceError>(90) },
                |answer, _| *answer,
            )
            .await;
        assert_eq!(retried.unwrap(), 90);
        assert!(store.seed("balance".to_string(), 90));
    }

    #[test]
    fn seed_is_ignored_while_pending() {
        let store: OptimisticStore<String, i64> = OptimisticStore::new(Duration::from_secs(1));
        store.seed("k".to_string(), 1);
        store.dispatch(&"k".to_string(), Event::Begin(2)).unwrap();

        assert!(!store.seed("k".to_string(), 5));
        assert_eq!(store.displayed(&"k".to_string()), Some(2));
    }
}
