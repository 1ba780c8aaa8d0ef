use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{reply, AppState};
use crate::models::chat::NewMessage;
use crate::services::{chat::ChatRequest, request};

const SERVICE: &str = "ChatService";

#[derive(Deserialize)]
pub struct CreateSessionBody {
    user_id: String,
    title: Option<String>,
}

#[derive(Deserialize)]
pub struct UserQuery {
    user_id: String,
}

#[derive(Deserialize)]
pub struct MessagesQuery {
    user_id: String,
    since: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct SendMessageBody {
    user_id: String,
    #[serde(flatten)]
    message: NewMessage,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> impl IntoResponse {
    let result = request(&state.channels.chat, state.timeout, SERVICE, |response| {
        ChatRequest::CreateSession {
            user_id: body.user_id,
            title: body.title,
            response,
        }
    })
    .await;

    reply(StatusCode::CREATED, result)
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> impl IntoResponse {
    let result = request(&state.channels.chat, state.timeout, SERVICE, |response| {
        ChatRequest::ListSessions {
            user_id: query.user_id,
            response,
        }
    })
    .await;

    reply(StatusCode::OK, result)
}

pub async fn activate_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<UserQuery>,
) -> impl IntoResponse {
    let result = request(&state.channels.chat, state.timeout, SERVICE, |response| {
        ChatRequest::ActivateSession {
            user_id: body.user_id,
            session_id,
            response,
        }
    })
    .await;

    reply(StatusCode::OK, result)
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> impl IntoResponse {
    let result = request(&state.channels.chat, state.timeout, SERVICE, |response| {
        ChatRequest::ListMessages {
            user_id: query.user_id,
            session_id,
            since: query.since,
            response,
        }
    })
    .await;

    reply(StatusCode::OK, result)
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> impl IntoResponse {
    let result = request(&state.channels.chat, state.timeout, SERVICE, |response| {
        ChatRequest::SendMessage {
            user_id: body.user_id,
            session_id,
            message: body.message,
            response,
        }
    })
    .await;

    let status = match &result {
        Ok(appended) if !appended.inserted => StatusCode::OK,
        _ => StatusCode::CREATED,
    };
    reply(status, result)
}
