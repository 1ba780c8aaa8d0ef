use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::{reply, AppState};
use crate::models::resources::NewResource;
use crate::services::{request, resources::ResourceRequest};

const SERVICE: &str = "ResourceService";

#[derive(Deserialize)]
pub struct PurchaseBody {
    user_id: String,
}

pub async fn create_resource(
    State(state): State<AppState>,
    Json(resource): Json<NewResource>,
) -> impl IntoResponse {
    let result = request(&state.channels.resources, state.timeout, SERVICE, |response| {
        ResourceRequest::CreateResource { resource, response }
    })
    .await;

    reply(StatusCode::CREATED, result)
}

pub async fn get_resource(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
) -> impl IntoResponse {
    let result = request(&state.channels.resources, state.timeout, SERVICE, |response| {
        ResourceRequest::GetResource {
            resource_id,
            response,
        }
    })
    .await;

    reply(StatusCode::OK, result)
}

pub async fn purchase(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
    Json(body): Json<PurchaseBody>,
) -> impl IntoResponse {
    let result = request(&state.channels.resources, state.timeout, SERVICE, |response| {
        ResourceRequest::Purchase {
            user_id: body.user_id,
            resource_id,
            response,
        }
    })
    .await
    .map(|receipt| match receipt {
        Some(receipt) => json!({ "purchased": true, "receipt": receipt }),
        None => json!({ "purchased": false }),
    });

    reply(StatusCode::OK, result)
}
