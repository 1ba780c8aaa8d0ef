use std::time::Duration;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use super::{ServiceChannels, ServiceError};

mod chat;
mod credits;
mod notifications;
mod posts;
mod referrals;
mod resources;
mod users;

#[derive(Clone)]
pub struct AppState {
    pub channels: ServiceChannels,
    pub timeout: Duration,
}

pub(crate) fn status_for(error: &ServiceError) -> StatusCode {
    match error {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Conflict(_) => StatusCode::CONFLICT,
        ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ServiceError::BackendUnavailable(..) => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Communication(..) | ServiceError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_body(error: &ServiceError) -> Value {
    json!({
        "error": error.kind(),
        "description": error.to_string(),
        "retryable": error.is_retryable(),
    })
}

/// Turns a service answer into a JSON response.
pub(crate) fn reply<T: Serialize>(
    success: StatusCode,
    result: Result<T, ServiceError>,
) -> (StatusCode, Json<Value>) {
    match result {
        Ok(value) => (success, Json(json!(value))),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                log::error!("Request failed: {}", e);
            }
            (status, Json(error_body(&e)))
        }
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/users", post(users::sign_up))
        .route(
            "/users/{id}",
            get(users::get_profile).delete(users::delete_account),
        )
        .route("/users/{id}/login", post(users::daily_login))
        .route("/users/{id}/verify", post(users::verify))
        .route("/users/{id}/preferences", put(users::update_preferences))
        .route("/users/{id}/transactions", get(credits::list_transactions))
        .route("/users/{id}/balance", get(credits::get_balance))
        .route("/users/{id}/reconcile", post(credits::reconcile))
        .route("/users/{id}/referrals", get(referrals::list_for_referrer))
        .route(
            "/users/{id}/notifications",
            get(notifications::list_notifications),
        )
        .route(
            "/users/{id}/notifications/{notification_id}/read",
            post(notifications::mark_read),
        )
        .route("/credits/spend", post(credits::spend))
        .route("/leaderboard", get(users::leaderboard))
        .route("/referrals/{id}", get(referrals::get_referral))
        .route("/referrals/{id}/complete", post(referrals::complete))
        .route("/referrals/{id}/cancel", post(referrals::cancel))
        .route("/posts", post(posts::create_post))
        .route("/posts/{id}", get(posts::get_post))
        .route("/posts/{id}/vote", post(posts::toggle_vote))
        .route("/resources", post(resources::create_resource))
        .route("/resources/{id}", get(resources::get_resource))
        .route("/resources/{id}/purchase", post(resources::purchase))
        .route(
            "/chat/sessions",
            post(chat::create_session).get(chat::list_sessions),
        )
        .route("/chat/sessions/{id}/activate", post(chat::activate_session))
        .route(
            "/chat/sessions/{id}/messages",
            get(chat::list_messages).post(chat::send_message),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(
    channels: ServiceChannels,
    listen: &str,
    timeout: Duration,
) -> Result<(), anyhow::Error> {
    let app = router(AppState { channels, timeout });

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
