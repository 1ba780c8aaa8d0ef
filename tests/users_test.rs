use anyhow::Result;
use chrono::Duration;

use stride_campus::models::{
    referrals::ReferralStatus,
    transactions::{NewCreditTransaction, TransactionCategory},
    users::{NewUser, NewUserRecord, Preferences},
};
use stride_campus::repositories::{LedgerRepository, ReferralRepository, UserRepository};
use stride_campus::services::{
    referrals::ReferralRequest, request, users::UserRequest, ServiceError,
};
use stride_campus::utils::clock::Clock;

mod common;
use common::TIMEOUT;

async fn login(h: &common::Harness, id: &str) -> Result<stride_campus::models::users::LoginOutcome> {
    let id = id.to_string();
    let outcome = request(&h.channels.users, TIMEOUT, "UserService", |response| {
        UserRequest::DailyLogin { id, response }
    })
    .await?;
    Ok(outcome)
}

async fn daily_login_rows(h: &common::Harness, id: &str) -> usize {
    h.store
        .list_transactions(id, 1000)
        .await
        .unwrap()
        .iter()
        .filter(|t| t.category == TransactionCategory::DailyLogin)
        .count()
}

#[tokio::test]
async fn test_consecutive_day_logins_extend_the_streak() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("alice", None).await?;

    // Sign-up day already counts as a login.
    let same_day = login(&h, &user.id).await?;
    assert!(same_day.bonus.is_none());
    assert_eq!(same_day.streak, 1);

    h.clock.advance(Duration::days(1));
    let next_day = login(&h, &user.id).await?;
    assert_eq!(next_day.streak, 2);
    assert_eq!(next_day.bonus.as_ref().map(|b| b.transaction.amount), Some(5));
    assert_eq!(next_day.user.credits, 125);
    assert_eq!(daily_login_rows(&h, &user.id).await, 1);

    let again = login(&h, &user.id).await?;
    assert!(again.bonus.is_none());
    assert_eq!(daily_login_rows(&h, &user.id).await, 1);
    assert_eq!(h.stored_balance(&user.id).await, 125);
    h.assert_balanced(&user.id).await;

    Ok(())
}

#[tokio::test]
async fn test_missed_day_resets_the_streak() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("bob", None).await?;

    h.clock.advance(Duration::days(1));
    assert_eq!(login(&h, &user.id).await?.streak, 2);

    h.clock.advance(Duration::days(2));
    let outcome = login(&h, &user.id).await?;
    assert_eq!(outcome.streak, 1);
    assert!(outcome.bonus.is_some());
    assert_eq!(daily_login_rows(&h, &user.id).await, 2);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_logins_award_one_bonus() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("carol", None).await?;
    h.clock.advance(Duration::days(1));

    let (a, b) = tokio::join!(login(&h, &user.id), login(&h, &user.id));
    let bonuses = [a?, b?].iter().filter(|o| o.bonus.is_some()).count();

    assert_eq!(bonuses, 1);
    assert_eq!(daily_login_rows(&h, &user.id).await, 1);
    h.assert_balanced(&user.id).await;

    Ok(())
}

#[tokio::test]
async fn test_referral_bonus_is_awarded_once() -> Result<()> {
    let h = common::start();
    let referrer = h.sign_up("dave", None).await?;
    let referred = h.sign_up("erin", Some(&referrer.referral_code)).await?;

    let referral = h
        .store
        .get_referral_for_referred(&referred.id)
        .await?
        .expect("referral recorded at sign-up");
    assert_eq!(referral.status, ReferralStatus::Pending);
    assert!(!referral.bonus_awarded);

    // Verification completes the referral.
    let id = referred.id.clone();
    request(&h.channels.users, TIMEOUT, "UserService", |response| {
        UserRequest::Verify { id, response }
    })
    .await?;

    let referral_id = referral.id.clone();
    let second = request(&h.channels.referrals, TIMEOUT, "ReferralService", |response| {
        ReferralRequest::Complete {
            referral_id,
            response,
        }
    })
    .await?;
    assert!(second.is_none());

    let referral = h.store.get_referral(&referral.id).await?.unwrap();
    assert_eq!(referral.status, ReferralStatus::Completed);
    assert!(referral.bonus_awarded);
    assert!(referral.completed_at.is_some());

    assert_eq!(h.stored_balance(&referrer.id).await, 170);
    assert_eq!(h.stored_balance(&referred.id).await, 145);
    h.assert_balanced(&referrer.id).await;
    h.assert_balanced(&referred.id).await;

    Ok(())
}

#[tokio::test]
async fn test_racing_completions_award_once() -> Result<()> {
    let h = common::start();
    let referrer = h.sign_up("frank", None).await?;
    let referred = h.sign_up("grace", Some(&referrer.referral_code)).await?;
    let referral = h
        .store
        .get_referral_for_referred(&referred.id)
        .await?
        .unwrap();

    let complete = |referral_id: String| {
        let channels = h.channels.clone();
        async move {
            request(&channels.referrals, TIMEOUT, "ReferralService", |response| {
                ReferralRequest::Complete {
                    referral_id,
                    response,
                }
            })
            .await
        }
    };

    let (a, b) = tokio::join!(complete(referral.id.clone()), complete(referral.id.clone()));
    let awarded = [a?, b?].iter().filter(|c| c.is_some()).count();

    assert_eq!(awarded, 1);
    assert_eq!(h.stored_balance(&referrer.id).await, 170);

    Ok(())
}

#[tokio::test]
async fn test_cancelled_referral_cannot_complete() -> Result<()> {
    let h = common::start();
    let referrer = h.sign_up("heidi", None).await?;
    let referred = h.sign_up("ivan", Some(&referrer.referral_code)).await?;
    let referral = h
        .store
        .get_referral_for_referred(&referred.id)
        .await?
        .unwrap();

    let referral_id = referral.id.clone();
    let cancelled = request(&h.channels.referrals, TIMEOUT, "ReferralService", |response| {
        ReferralRequest::Cancel {
            referral_id,
            response,
        }
    })
    .await?;
    assert_eq!(cancelled.map(|r| r.status), Some(ReferralStatus::Cancelled));

    let referral_id = referral.id.clone();
    let completed = request(&h.channels.referrals, TIMEOUT, "ReferralService", |response| {
        ReferralRequest::Complete {
            referral_id,
            response,
        }
    })
    .await?;
    assert!(completed.is_none());
    assert_eq!(h.stored_balance(&referrer.id).await, 120);

    Ok(())
}

#[tokio::test]
async fn test_unknown_referral_code_is_ignored() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("judy", Some("NOPE0000")).await?;

    assert_eq!(user.credits, 120);
    assert!(h.store.get_referral_for_referred(&user.id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_vanished_referrer_does_not_block_sign_up() -> Result<()> {
    let h = common::start();
    let record = NewUserRecord {
        id: "user-late".to_string(),
        email: "late@stride.edu".to_string(),
        username: "late".to_string(),
        referral_code: "LATE0000".to_string(),
        signup_date: h.clock.today(),
    };
    let welcome = NewCreditTransaction::new(
        "user-late",
        120,
        TransactionCategory::WelcomeBonus,
        "Welcome to Stride Campus",
    );

    let user = h
        .store
        .insert_user(record, welcome, Some("deleted-referrer".to_string()))
        .await?;

    assert_eq!(user.credits, 120);
    assert!(h.store.get_referral_for_referred(&user.id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_sign_up_validation() -> Result<()> {
    let h = common::start();

    let user = NewUser {
        email: "mallory@gmail.com".to_string(),
        username: "mallory".to_string(),
        referral_code: None,
    };
    let result = request(&h.channels.users, TIMEOUT, "UserService", |response| {
        UserRequest::SignUp { user, response }
    })
    .await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));

    let user = NewUser {
        email: "mallory@stride.edu".to_string(),
        username: "   ".to_string(),
        referral_code: None,
    };
    let result = request(&h.channels.users, TIMEOUT, "UserService", |response| {
        UserRequest::SignUp { user, response }
    })
    .await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));

    h.sign_up("mallory", None).await?;
    let duplicate = h.sign_up("mallory", None).await;
    assert!(matches!(duplicate, Err(ServiceError::Conflict(_))));

    Ok(())
}

#[tokio::test]
async fn test_expired_profile_is_read_fresh() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("niaj", None).await?;
    assert_eq!(h.profile(&user.id).await?.credits, 120);

    // A write behind the service's back leaves the cached copy stale.
    h.store.set_balance(&user.id, 80, 120).await?;
    assert_eq!(h.profile(&user.id).await?.credits, 120);

    h.clock.advance(Duration::seconds(301));
    assert_eq!(h.profile(&user.id).await?.credits, 80);

    Ok(())
}

#[tokio::test]
async fn test_balance_write_invalidates_cached_profile() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("olivia", None).await?;
    assert_eq!(h.profile(&user.id).await?.credits, 120);

    h.clock.advance(Duration::days(1));
    login(&h, &user.id).await?;

    assert_eq!(h.profile(&user.id).await?.credits, 125);

    Ok(())
}

#[tokio::test]
async fn test_preferences_and_account_deletion() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("peggy", None).await?;

    let id = user.id.clone();
    let preferences = Preferences {
        push_token: Some("ExponentPushToken[abc]".to_string()),
        push_enabled: Some(false),
        visibility: None,
    };
    let updated = request(&h.channels.users, TIMEOUT, "UserService", |response| {
        UserRequest::UpdatePreferences {
            id,
            preferences,
            response,
        }
    })
    .await?;
    assert_eq!(updated.push_token.as_deref(), Some("ExponentPushToken[abc]"));
    assert!(!updated.can_receive_push());

    let id = user.id.clone();
    request(&h.channels.users, TIMEOUT, "UserService", |response| {
        UserRequest::DeleteAccount { id, response }
    })
    .await?;

    assert!(h.store.get_user_by_id(&user.id).await?.is_none());
    assert!(matches!(
        h.profile(&user.id).await,
        Err(ServiceError::NotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_leaderboard_tracks_balances() -> Result<()> {
    let h = common::start();
    let rich = h.sign_up("quinn", None).await?;
    let poor = h.sign_up("rupert", None).await?;

    let user_id = poor.id.clone();
    request(&h.channels.credits, TIMEOUT, "CreditService", |response| {
        stride_campus::services::credits::CreditRequest::Spend {
            user_id,
            amount: 100,
            category: TransactionCategory::Spent,
            description: "Merch".to_string(),
            reference_id: None,
            response,
        }
    })
    .await?;

    let board = request(&h.channels.users, TIMEOUT, "UserService", |response| {
        UserRequest::Leaderboard {
            limit: 10,
            response,
        }
    })
    .await?;

    let order: Vec<&str> = board.iter().map(|e| e.user_id.as_str()).collect();
    assert_eq!(order, vec![rich.id.as_str(), poor.id.as_str()]);
    assert_eq!(board[1].credits, 20);

    Ok(())
}
