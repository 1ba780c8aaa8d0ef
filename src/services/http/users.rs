use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::{reply, AppState};
use crate::models::users::{NewUser, Preferences, Profile};
use crate::services::{request, users::UserRequest};

const SERVICE: &str = "UserService";

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    limit: Option<i64>,
}

pub async fn sign_up(
    State(state): State<AppState>,
    Json(user): Json<NewUser>,
) -> impl IntoResponse {
    let result = request(&state.channels.users, state.timeout, SERVICE, |response| {
        UserRequest::SignUp { user, response }
    })
    .await;

    reply(StatusCode::CREATED, result)
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let result = request(&state.channels.users, state.timeout, SERVICE, |response| {
        UserRequest::GetProfile { id, response }
    })
    .await
    .map(|user| Profile::from(&user));

    reply(StatusCode::OK, result)
}

pub async fn daily_login(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let result = request(&state.channels.users, state.timeout, SERVICE, |response| {
        UserRequest::DailyLogin { id, response }
    })
    .await;

    reply(StatusCode::OK, result)
}

pub async fn verify(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let result = request(&state.channels.users, state.timeout, SERVICE, |response| {
        UserRequest::Verify { id, response }
    })
    .await
    .map(|user| Profile::from(&user));

    reply(StatusCode::OK, result)
}

pub async fn update_preferences(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(preferences): Json<Preferences>,
) -> impl IntoResponse {
    let result = request(&state.channels.users, state.timeout, SERVICE, |response| {
        UserRequest::UpdatePreferences {
            id,
            preferences,
            response,
        }
    })
    .await
    .map(|user| Profile::from(&user));

    reply(StatusCode::OK, result)
}

pub async fn delete_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let result = request(&state.channels.users, state.timeout, SERVICE, |response| {
        UserRequest::DeleteAccount { id, response }
    })
    .await;

    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => reply::<()>(StatusCode::NO_CONTENT, Err(e)).into_response(),
    }
}

pub async fn leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(20);
    let result = request(&state.channels.users, state.timeout, SERVICE, |response| {
        UserRequest::Leaderboard { limit, response }
    })
    .await;

    reply(StatusCode::OK, result)
}
