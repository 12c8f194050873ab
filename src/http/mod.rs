pub mod error;
pub mod ws;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::PollError;
use crate::hub::{ServerEvent, SessionHub};
use crate::models::Poll;
use crate::service::{PollOrchestrator, PollWithToken};
use error::{AppError, AppResult};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PollOrchestrator>,
    pub hub: Arc<SessionHub>,
}

impl AppState {
    pub fn new(hub: Arc<SessionHub>) -> Self {
        Self {
            service: Arc::clone(hub.service()),
            hub,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub topic: String,
    pub votes_per_voter: u32,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinPollRequest {
    #[serde(rename = "pollID")]
    pub poll_id: String,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejoinRequest {
    pub access_token: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/polls", post(create_poll))
        .route("/polls/join", post(join_poll))
        .route("/polls/rejoin", post(rejoin_poll))
        .route("/polls/ws", get(ws::websocket_handler))
        .with_state(state)
}

async fn create_poll(
    State(state): State<AppState>,
    payload: Result<Json<CreatePollRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<PollWithToken>)> {
    let Json(req) = payload?;
    let created = state.service.create_poll(&req.topic, &req.name, req.votes_per_voter).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn join_poll(
    State(state): State<AppState>,
    payload: Result<Json<JoinPollRequest>, JsonRejection>,
) -> AppResult<Json<PollWithToken>> {
    let Json(req) = payload?;
    let joined = state.service.join_poll(&req.poll_id, &req.name).await?;
    Ok(Json(joined))
}

/// Token comes from the body's `accessToken`, falling back to a bearer header.
async fn rejoin_poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Poll>> {
    let req: RejoinRequest = if body.is_empty() {
        RejoinRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| PollError::Validation(format!("unreadable request body: {}", e)))?
    };

    let token = req
        .access_token
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| AppError::unauthorized("missing access token"))?;

    let claims = state.service.verify_token(&token)?;
    let poll = state.service.rejoin_poll(&claims).await?;
    state.hub.broadcast(&poll.id, ServerEvent::PollUpdated(poll.clone()));

    Ok(Json(poll))
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
