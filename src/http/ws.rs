use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Deserialize;

use super::{AppState, bearer_token, error::AppError};
use crate::error::PollError;
use crate::hub::{ClientEvent, ServerEvent};
use crate::models::Claims;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// Verifies the token before upgrading so bad credentials get a plain 401.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let token = params
        .token
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| AppError::unauthorized("missing access token"))?;
    let claims = state.service.verify_token(&token)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, claims)))
}

async fn handle_socket(socket: WebSocket, state: AppState, claims: Claims) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (session, mut rx) = match state.hub.connect(claims).await {
        Ok(joined) => joined,
        Err(e) => {
            warn!("Rejected websocket connection: {}", e);
            if let Some(msg) = encode(&ServerEvent::from(&e)) {
                let _ = ws_sender.send(msg).await;
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    // Outgoing events; ends when the room drops this session's sender
    let session_id = session.id;
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Some(msg) = encode(&event) else { continue };
            if ws_sender.send(msg).await.is_err() {
                debug!("Session {} socket closed while sending", session_id);
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => state.hub.handle(&session, event).await,
                Err(e) => reject(&state, &session, e),
            },
            Ok(Message::Binary(bin)) => match serde_json::from_slice::<ClientEvent>(bin.as_ref()) {
                Ok(event) => state.hub.handle(&session, event).await,
                Err(e) => reject(&state, &session, e),
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                error!("WebSocket error on session {}: {}", session.id, e);
                break;
            }
            _ => {}
        }
    }

    state.hub.disconnect(&session);
    writer.abort();
    info!("Session {} closed", session.id);
}

fn reject(state: &AppState, session: &crate::hub::Session, err: serde_json::Error) {
    debug!("Session {} sent an unreadable event: {}", session.id, err);
    let err = PollError::Validation(format!("unreadable event: {}", err));
    state.hub.send_to(session, ServerEvent::from(&err));
}

fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!("Failed to encode outbound event: {}", e);
            None
        }
    }
}
