use anyhow::Result;

use stride_campus::models::transactions::{NewCreditTransaction, TransactionCategory};
use stride_campus::repositories::LedgerRepository;
use stride_campus::services::{credits::CreditRequest, request, ServiceError};

mod common;
use common::TIMEOUT;

async fn spend(h: &common::Harness, user_id: &str, amount: i64) -> Result<i64, ServiceError> {
    let user_id = user_id.to_string();
    request(&h.channels.credits, TIMEOUT, "CreditService", |response| {
        CreditRequest::Spend {
            user_id,
            amount,
            category: TransactionCategory::Spent,
            description: "Test spend".to_string(),
            reference_id: None,
            response,
        }
    })
    .await
    .map(|entry| entry.balance)
}

#[tokio::test]
async fn test_sign_up_awards_exactly_one_welcome_bonus() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("alice", None).await?;

    assert_eq!(user.credits, 120);
    let transactions = h.store.list_transactions(&user.id, 100).await?;
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].category, TransactionCategory::WelcomeBonus);
    assert_eq!(transactions[0].amount, 120);
    h.assert_balanced(&user.id).await;

    Ok(())
}

#[tokio::test]
async fn test_overdraft_is_rejected_without_side_effects() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("bob", None).await?;
    assert_eq!(spend(&h, &user.id, 20).await?, 100);
    let rows_before = h.transaction_count(&user.id).await;

    let result = spend(&h, &user.id, 300).await;

    match result {
        Err(ServiceError::InsufficientCredits { balance, requested }) => {
            assert_eq!(balance, 100);
            assert_eq!(requested, 300);
        }
        other => panic!("expected InsufficientCredits, got {:?}", other),
    }
    assert_eq!(h.stored_balance(&user.id).await, 100);
    assert_eq!(h.transaction_count(&user.id).await, rows_before);

    Ok(())
}

#[tokio::test]
async fn test_spending_the_whole_balance_is_allowed() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("carol", None).await?;

    assert_eq!(spend(&h, &user.id, 120).await?, 0);
    assert!(spend(&h, &user.id, 1).await.is_err());
    h.assert_balanced(&user.id).await;

    Ok(())
}

#[tokio::test]
async fn test_concurrent_spends_never_overdraw() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("dave", None).await?;

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let channels = h.channels.clone();
        let user_id = user.id.clone();
        tasks.push(tokio::spawn(async move {
            request(&channels.credits, TIMEOUT, "CreditService", |response| {
                CreditRequest::Spend {
                    user_id,
                    amount: 20,
                    category: TransactionCategory::Spent,
                    description: "Concurrent spend".to_string(),
                    reference_id: None,
                    response,
                }
            })
            .await
        }));
    }

    let mut succeeded = 0;
    for task in tasks {
        if task.await?.is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 6);
    assert_eq!(h.stored_balance(&user.id).await, 0);
    h.assert_balanced(&user.id).await;

    Ok(())
}

#[tokio::test]
async fn test_entries_with_the_wrong_sign_are_rejected() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("erin", None).await?;
    let entry = NewCreditTransaction::new(
        user.id.clone(),
        -10,
        TransactionCategory::Bonus,
        "Negative bonus",
    );

    let result = request(&h.channels.credits, TIMEOUT, "CreditService", |response| {
        CreditRequest::Record { entry, response }
    })
    .await;

    assert!(matches!(result, Err(ServiceError::Validation(_))));
    assert_eq!(h.transaction_count(&user.id).await, 1);

    Ok(())
}

#[tokio::test]
async fn test_record_once_ignores_a_repeated_reference() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("frank", None).await?;

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let entry = NewCreditTransaction::new(
            user.id.clone(),
            10,
            TransactionCategory::Earned,
            "Challenge reward",
        )
        .with_reference("challenge:42");
        let outcome = request(&h.channels.credits, TIMEOUT, "CreditService", |response| {
            CreditRequest::RecordOnce { entry, response }
        })
        .await?;
        outcomes.push(outcome);
    }

    assert!(outcomes[0].is_some());
    assert!(outcomes[1].is_none());
    assert_eq!(h.stored_balance(&user.id).await, 130);
    h.assert_balanced(&user.id).await;

    Ok(())
}

#[tokio::test]
async fn test_reconcile_repairs_a_drifted_balance() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("grace", None).await?;
    spend(&h, &user.id, 20).await?;

    h.store.set_balance(&user.id, 999, 999).await?;

    let user_id = user.id.clone();
    let reconciliation = request(&h.channels.credits, TIMEOUT, "CreditService", |response| {
        CreditRequest::Reconcile { user_id, response }
    })
    .await?;

    assert_eq!(reconciliation.stored_balance, 999);
    assert_eq!(reconciliation.ledger_balance, 100);
    assert!(reconciliation.corrected);
    assert_eq!(h.stored_balance(&user.id).await, 100);

    let user_id = user.id.clone();
    let again = request(&h.channels.credits, TIMEOUT, "CreditService", |response| {
        CreditRequest::Reconcile { user_id, response }
    })
    .await?;
    assert!(!again.corrected);

    Ok(())
}

#[tokio::test]
async fn test_transactions_are_listed_newest_first() -> Result<()> {
    let h = common::start();
    let user = h.sign_up("heidi", None).await?;
    spend(&h, &user.id, 5).await?;
    spend(&h, &user.id, 7).await?;

    let user_id = user.id.clone();
    let transactions = request(&h.channels.credits, TIMEOUT, "CreditService", |response| {
        CreditRequest::ListTransactions {
            user_id,
            limit: 2,
            response,
        }
    })
    .await?;

    let amounts: Vec<i64> = transactions.iter().map(|t| t.amount).collect();
    assert_eq!(amounts, vec![-7, -5]);

    Ok(())
}
