use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{reply, AppState};
use crate::services::{notifications::NotificationRequest, request};

const SERVICE: &str = "NotificationService";

#[derive(Deserialize)]
pub struct SinceQuery {
    since: Option<DateTime<Utc>>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> impl IntoResponse {
    let result = request(
        &state.channels.notifications,
        state.timeout,
        SERVICE,
        |response| NotificationRequest::ListSince {
            user_id,
            since: query.since,
            response,
        },
    )
    .await;

    reply(StatusCode::OK, result)
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path((user_id, notification_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let result = request(
        &state.channels.notifications,
        state.timeout,
        SERVICE,
        |response| NotificationRequest::MarkRead {
            user_id,
            notification_id,
            response,
        },
    )
    .await
    .map(|()| json!({ "read": true }));

    reply(StatusCode::OK, result)
}
