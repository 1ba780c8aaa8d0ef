#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use stride_campus::models::users::{NewUser, User};
use stride_campus::repositories::{push::DisabledPush, LedgerRepository, MemoryStore};
use stride_campus::services::{
    request, start_services, users::UserRequest, ServiceChannels, ServiceError,
};
use stride_campus::settings::Settings;
use stride_campus::utils::clock::ManualClock;

pub const TIMEOUT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub channels: ServiceChannels,
    pub settings: Settings,
}

pub fn start() -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap(),
    ));
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let settings = Settings::default_values().unwrap();
    let channels = start_services(
        store.clone(),
        &settings,
        clock.clone(),
        Arc::new(DisabledPush),
    );

    Harness {
        store,
        clock,
        channels,
        settings,
    }
}

impl Harness {
    pub async fn sign_up(&self, name: &str, referral_code: Option<&str>) -> Result<User, ServiceError> {
        let user = NewUser {
            email: format!("{}@stride.edu", name),
            username: name.to_string(),
            referral_code: referral_code.map(str::to_string),
        };

        request(&self.channels.users, TIMEOUT, "UserService", |response| {
            UserRequest::SignUp { user, response }
        })
        .await
    }

    pub async fn profile(&self, id: &str) -> Result<User, ServiceError> {
        let id = id.to_string();
        request(&self.channels.users, TIMEOUT, "UserService", |response| {
            UserRequest::GetProfile { id, response }
        })
        .await
    }

    /// Balance straight from the store, bypassing every cache.
    pub async fn stored_balance(&self, id: &str) -> i64 {
        use stride_campus::repositories::UserRepository;

        self.store
            .get_user_by_id(id)
            .await
            .unwrap()
            .map(|u| u.credits)
            .unwrap()
    }

    pub async fn ledger_sum(&self, id: &str) -> i64 {
        self.store.ledger_totals(id).await.unwrap().0
    }

    pub async fn transaction_count(&self, id: &str) -> usize {
        self.store.list_transactions(id, 1000).await.unwrap().len()
    }

    /// The ledger and the stored balance agree.
    pub async fn assert_balanced(&self, id: &str) {
        assert_eq!(self.ledger_sum(id).await, self.stored_balance(id).await);
    }
}
