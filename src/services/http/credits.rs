use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::{reply, AppState};
use crate::models::transactions::TransactionCategory;
use crate::services::{credits::CreditRequest, request};

const SERVICE: &str = "CreditService";

#[derive(Deserialize)]
pub struct TransactionsQuery {
    limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct SpendRequest {
    user_id: String,
    amount: i64,
    #[serde(default = "default_spend_category")]
    category: TransactionCategory,
    description: String,
    reference_id: Option<String>,
}

fn default_spend_category() -> TransactionCategory {
    TransactionCategory::Spent
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<TransactionsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50);
    let result = request(&state.channels.credits, state.timeout, SERVICE, |response| {
        CreditRequest::ListTransactions {
            user_id,
            limit,
            response,
        }
    })
    .await;

    reply(StatusCode::OK, result)
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let id = user_id.clone();
    let result = request(&state.channels.credits, state.timeout, SERVICE, |response| {
        CreditRequest::GetBalance { user_id, response }
    })
    .await
    .map(|balance| json!({ "user_id": id, "credits": balance }));

    reply(StatusCode::OK, result)
}

pub async fn reconcile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let result = request(&state.channels.credits, state.timeout, SERVICE, |response| {
        CreditRequest::Reconcile { user_id, response }
    })
    .await;

    reply(StatusCode::OK, result)
}

pub async fn spend(
    State(state): State<AppState>,
    Json(req): Json<SpendRequest>,
) -> impl IntoResponse {
    let result = request(&state.channels.credits, state.timeout, SERVICE, |response| {
        CreditRequest::Spend {
            user_id: req.user_id,
            amount: req.amount,
            category: req.category,
            description: req.description,
            reference_id: req.reference_id,
            response,
        }
    })
    .await;

    reply(StatusCode::CREATED, result)
}
