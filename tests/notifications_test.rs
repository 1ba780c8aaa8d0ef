use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use stride_campus::models::{
    notifications::{NewNotification, NotificationKind, PushMessage},
    users::{NewUser, Preferences},
};
use stride_campus::repositories::{push::PushSender, MemoryStore};
use stride_campus::services::{
    notifications::NotificationRequest, request, start_services, users::UserRequest,
    ServiceChannels, ServiceError,
};
use stride_campus::settings::Settings;
use stride_campus::utils::clock::ManualClock;

const TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Default)]
struct RecordingPush {
    sent: Arc<Mutex<Vec<PushMessage>>>,
}

#[async_trait]
impl PushSender for RecordingPush {
    async fn send(&self, message: &PushMessage) -> Result<(), anyhow::Error> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct FailingPush;

#[async_trait]
impl PushSender for FailingPush {
    async fn send(&self, _message: &PushMessage) -> Result<(), anyhow::Error> {
        anyhow::bail!("provider unreachable")
    }
}

fn start(push: Arc<dyn PushSender>) -> ServiceChannels {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap(),
    ));
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let settings = Settings::default_values().unwrap();

    start_services(store, &settings, clock, push)
}

async fn sign_up(channels: &ServiceChannels, name: &str) -> Result<String> {
    let user = NewUser {
        email: format!("{}@stride.edu", name),
        username: name.to_string(),
        referral_code: None,
    };
    let user = request(&channels.users, TIMEOUT, "UserService", |response| {
        UserRequest::SignUp { user, response }
    })
    .await?;
    Ok(user.id)
}

async fn set_token(channels: &ServiceChannels, id: &str, token: &str) -> Result<()> {
    let id = id.to_string();
    let preferences = Preferences {
        push_token: Some(token.to_string()),
        ..Default::default()
    };
    request(&channels.users, TIMEOUT, "UserService", |response| {
        UserRequest::UpdatePreferences {
            id,
            preferences,
            response,
        }
    })
    .await?;
    Ok(())
}

async fn notify(channels: &ServiceChannels, user_id: &str) -> Result<(), ServiceError> {
    let notification = NewNotification {
        user_id: user_id.to_string(),
        kind: NotificationKind::System,
        title: "Heads up".to_string(),
        body: "Library closes early today.".to_string(),
        payload: serde_json::json!({ "screen": "library" }),
    };
    request(&channels.notifications, TIMEOUT, "NotificationService", |response| {
        NotificationRequest::Notify {
            notification,
            response: Some(response),
        }
    })
    .await
    .map(|_| ())
}

#[tokio::test]
async fn test_push_goes_to_users_with_a_token() -> Result<()> {
    let push = RecordingPush::default();
    let channels = start(Arc::new(push.clone()));
    let with_token = sign_up(&channels, "alice").await?;
    let without_token = sign_up(&channels, "bob").await?;
    set_token(&channels, &with_token, "ExponentPushToken[alice]").await?;

    notify(&channels, &with_token).await?;
    notify(&channels, &without_token).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = push.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ExponentPushToken[alice]");
    assert_eq!(sent[0].data["screen"], "library");

    Ok(())
}

#[tokio::test]
async fn test_push_failure_does_not_fail_the_notification() -> Result<()> {
    let channels = start(Arc::new(FailingPush));
    let user_id = sign_up(&channels, "carol").await?;
    set_token(&channels, &user_id, "ExponentPushToken[carol]").await?;

    notify(&channels, &user_id).await?;

    let id = user_id.clone();
    let listed = request(&channels.notifications, TIMEOUT, "NotificationService", |response| {
        NotificationRequest::ListSince {
            user_id: id,
            since: None,
            response,
        }
    })
    .await?;
    assert_eq!(listed.len(), 1);

    let notification_id = listed[0].id.clone();
    request(&channels.notifications, TIMEOUT, "NotificationService", |response| {
        NotificationRequest::MarkRead {
            user_id,
            notification_id,
            response,
        }
    })
    .await?;

    Ok(())
}
