use anyhow::Result;

use stride_campus::models::{
    resources::{NewResource, Resource},
    transactions::TransactionCategory,
    votes::{NewPost, Post, VoteDirection, VoteOutcome},
};
use stride_campus::repositories::{LedgerRepository, ResourceRepository, VoteRepository};
use stride_campus::services::{
    request, resources::ResourceRequest, votes::VoteRequest, ServiceError,
};

mod common;
use common::TIMEOUT;

async fn create_post(h: &common::Harness, author_id: &str) -> Result<Post> {
    let post = NewPost {
        author_id: author_id.to_string(),
        space_id: "cs-101".to_string(),
        title: "Exam notes".to_string(),
    };
    let post = request(&h.channels.votes, TIMEOUT, "VoteService", |response| {
        VoteRequest::CreatePost { post, response }
    })
    .await?;
    Ok(post)
}

async fn press(
    h: &common::Harness,
    user_id: &str,
    post_id: &str,
    direction: VoteDirection,
) -> Result<VoteOutcome, ServiceError> {
    let user_id = user_id.to_string();
    let post_id = post_id.to_string();
    request(&h.channels.votes, TIMEOUT, "VoteService", |response| {
        VoteRequest::ToggleVote {
            user_id,
            post_id,
            direction,
            response,
        }
    })
    .await
}

async fn upvote_rewards(h: &common::Harness, user_id: &str) -> usize {
    h.store
        .list_transactions(user_id, 1000)
        .await
        .unwrap()
        .iter()
        .filter(|t| t.category == TransactionCategory::UpvoteReward)
        .count()
}

#[tokio::test]
async fn test_upvote_then_unvote_nets_zero() -> Result<()> {
    let h = common::start();
    let author = h.sign_up("alice", None).await?;
    let voter = h.sign_up("bob", None).await?;
    let post = create_post(&h, &author.id).await?;

    let up = press(&h, &voter.id, &post.id, VoteDirection::Up).await?;
    assert_eq!(up.post.vote_count, 1);
    assert_eq!(up.current, Some(VoteDirection::Up));

    let cleared = press(&h, &voter.id, &post.id, VoteDirection::Up).await?;
    assert_eq!(cleared.post.vote_count, 0);
    assert_eq!(cleared.current, None);
    assert!(h.store.get_vote(&voter.id, &post.id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_switching_direction_keeps_one_vote() -> Result<()> {
    let h = common::start();
    let author = h.sign_up("carol", None).await?;
    let voter = h.sign_up("dave", None).await?;
    let post = create_post(&h, &author.id).await?;

    press(&h, &voter.id, &post.id, VoteDirection::Up).await?;
    let down = press(&h, &voter.id, &post.id, VoteDirection::Down).await?;

    assert_eq!(down.post.vote_count, -1);
    let vote = h.store.get_vote(&voter.id, &post.id).await?.unwrap();
    assert_eq!(vote.direction, VoteDirection::Down);

    Ok(())
}

#[tokio::test]
async fn test_author_is_rewarded_once_per_voter() -> Result<()> {
    let h = common::start();
    let author = h.sign_up("erin", None).await?;
    let voter = h.sign_up("frank", None).await?;
    let post = create_post(&h, &author.id).await?;

    press(&h, &voter.id, &post.id, VoteDirection::Up).await?;
    press(&h, &voter.id, &post.id, VoteDirection::Up).await?;
    press(&h, &voter.id, &post.id, VoteDirection::Up).await?;

    assert_eq!(upvote_rewards(&h, &author.id).await, 1);
    assert_eq!(h.stored_balance(&author.id).await, 121);
    h.assert_balanced(&author.id).await;

    Ok(())
}

#[tokio::test]
async fn test_self_votes_earn_nothing() -> Result<()> {
    let h = common::start();
    let author = h.sign_up("grace", None).await?;
    let post = create_post(&h, &author.id).await?;

    let outcome = press(&h, &author.id, &post.id, VoteDirection::Up).await?;

    assert_eq!(outcome.post.vote_count, 1);
    assert_eq!(upvote_rewards(&h, &author.id).await, 0);

    Ok(())
}

#[tokio::test]
async fn test_voting_on_a_missing_post_is_not_found() -> Result<()> {
    let h = common::start();
    let voter = h.sign_up("heidi", None).await?;

    let result = press(&h, &voter.id, "no-such-post", VoteDirection::Up).await;

    assert!(matches!(result, Err(ServiceError::NotFound(_))));

    Ok(())
}

async fn create_resource(h: &common::Harness, uploader_id: &str, price: i64) -> Result<Resource> {
    let resource = NewResource {
        uploader_id: uploader_id.to_string(),
        title: "Organic chemistry flashcards".to_string(),
        price,
    };
    let resource = request(&h.channels.resources, TIMEOUT, "ResourceService", |response| {
        ResourceRequest::CreateResource { resource, response }
    })
    .await?;
    Ok(resource)
}

async fn purchase(
    h: &common::Harness,
    user_id: &str,
    resource_id: &str,
) -> Result<Option<stride_campus::models::resources::PurchaseReceipt>, ServiceError> {
    let user_id = user_id.to_string();
    let resource_id = resource_id.to_string();
    request(&h.channels.resources, TIMEOUT, "ResourceService", |response| {
        ResourceRequest::Purchase {
            user_id,
            resource_id,
            response,
        }
    })
    .await
}

#[tokio::test]
async fn test_resource_is_charged_once() -> Result<()> {
    let h = common::start();
    let uploader = h.sign_up("ivan", None).await?;
    let buyer = h.sign_up("judy", None).await?;
    let resource = create_resource(&h, &uploader.id, 30).await?;

    let first = purchase(&h, &buyer.id, &resource.id).await?;
    assert_eq!(first.map(|r| r.balance), Some(90));

    let second = purchase(&h, &buyer.id, &resource.id).await?;
    assert!(second.is_none());

    assert_eq!(h.stored_balance(&buyer.id).await, 90);
    assert!(h.store.has_purchased(&buyer.id, &resource.id).await?);
    let resource = h.store.get_resource(&resource.id).await?.unwrap();
    assert_eq!(resource.download_count, 1);
    h.assert_balanced(&buyer.id).await;

    Ok(())
}

#[tokio::test]
async fn test_unaffordable_resource_leaves_no_trace() -> Result<()> {
    let h = common::start();
    let uploader = h.sign_up("kim", None).await?;
    let buyer = h.sign_up("leo", None).await?;
    let resource = create_resource(&h, &uploader.id, 500).await?;

    let result = purchase(&h, &buyer.id, &resource.id).await;

    assert!(matches!(
        result,
        Err(ServiceError::InsufficientCredits { balance: 120, requested: 500 })
    ));
    assert!(!h.store.has_purchased(&buyer.id, &resource.id).await?);
    assert_eq!(h.transaction_count(&buyer.id).await, 1);

    Ok(())
}

#[tokio::test]
async fn test_free_resource_adds_no_ledger_row() -> Result<()> {
    let h = common::start();
    let uploader = h.sign_up("mia", None).await?;
    let buyer = h.sign_up("ned", None).await?;
    let resource = create_resource(&h, &uploader.id, 0).await?;

    let receipt = purchase(&h, &buyer.id, &resource.id).await?;

    assert_eq!(receipt.map(|r| r.balance), Some(120));
    assert_eq!(h.transaction_count(&buyer.id).await, 1);

    Ok(())
}

#[tokio::test]
async fn test_uploader_cannot_buy_own_resource() -> Result<()> {
    let h = common::start();
    let uploader = h.sign_up("olga", None).await?;
    let resource = create_resource(&h, &uploader.id, 10).await?;

    let result = purchase(&h, &uploader.id, &resource.id).await;

    assert!(matches!(result, Err(ServiceError::Validation(_))));

    Ok(())
}
