use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::{reply, AppState};
use crate::models::votes::{NewPost, VoteDirection};
use crate::services::{request, votes::VoteRequest};

const SERVICE: &str = "VoteService";

#[derive(Deserialize)]
pub struct VoteBody {
    user_id: String,
    direction: VoteDirection,
}

pub async fn create_post(
    State(state): State<AppState>,
    Json(post): Json<NewPost>,
) -> impl IntoResponse {
    let result = request(&state.channels.votes, state.timeout, SERVICE, |response| {
        VoteRequest::CreatePost { post, response }
    })
    .await;

    reply(StatusCode::CREATED, result)
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> impl IntoResponse {
    let result = request(&state.channels.votes, state.timeout, SERVICE, |response| {
        VoteRequest::GetPost { post_id, response }
    })
    .await;

    reply(StatusCode::OK, result)
}

pub async fn toggle_vote(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Json(vote): Json<VoteBody>,
) -> impl IntoResponse {
    let result = request(&state.channels.votes, state.timeout, SERVICE, |response| {
        VoteRequest::ToggleVote {
            user_id: vote.user_id,
            post_id,
            direction: vote.direction,
            response,
        }
    })
    .await;

    reply(StatusCode::OK, result)
}
