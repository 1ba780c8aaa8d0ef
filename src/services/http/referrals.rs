use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use super::{reply, AppState};
use crate::services::{referrals::ReferralRequest, request};

const SERVICE: &str = "ReferralService";

pub async fn get_referral(
    State(state): State<AppState>,
    Path(referral_id): Path<String>,
) -> impl IntoResponse {
    let result = request(&state.channels.referrals, state.timeout, SERVICE, |response| {
        ReferralRequest::Get {
            referral_id,
            response,
        }
    })
    .await;

    reply(StatusCode::OK, result)
}

pub async fn list_for_referrer(
    State(state): State<AppState>,
    Path(referrer_id): Path<String>,
) -> impl IntoResponse {
    let result = request(&state.channels.referrals, state.timeout, SERVICE, |response| {
        ReferralRequest::ListForReferrer {
            referrer_id,
            response,
        }
    })
    .await;

    reply(StatusCode::OK, result)
}

/// Completing twice is not an error: the second call reports
/// `"completed": false` and awards nothing.
pub async fn complete(
    State(state): State<AppState>,
    Path(referral_id): Path<String>,
) -> impl IntoResponse {
    let result = request(&state.channels.referrals, state.timeout, SERVICE, |response| {
        ReferralRequest::Complete {
            referral_id,
            response,
        }
    })
    .await
    .map(|completion| match completion {
        Some(completion) => json!({ "completed": true, "result": completion }),
        None => json!({ "completed": false }),
    });

    reply(StatusCode::OK, result)
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(referral_id): Path<String>,
) -> impl IntoResponse {
    let result = request(&state.channels.referrals, state.timeout, SERVICE, |response| {
        ReferralRequest::Cancel {
            referral_id,
            response,
        }
    })
    .await
    .map(|referral| match referral {
        Some(referral) => json!({ "cancelled": true, "referral": referral }),
        None => json!({ "cancelled": false }),
    });

    reply(StatusCode::OK, result)
}
