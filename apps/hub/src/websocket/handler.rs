//! WebSocket upgrade handler
//!
//! Authenticates the upgrade (bearer header first, `?token=` query as the
//! fallback for browser clients), then wires the socket to the session
//! engine: an unbounded channel per connection, split sender/receiver tasks,
//! and centralized cleanup when either side goes away.

use std::borrow::Cow;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Extension, Query,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::services::AuthService;

use super::connection::Outbound;
use super::messages::{ErrorCode, OutboundFrame};
use super::session::SessionEngine;

/// Query parameters for the WebSocket upgrade
#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    /// Bearer token, for clients that cannot set headers
    token: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQueryParams>,
    Extension(auth): Extension<AuthService>,
    Extension(engine): Extension<SessionEngine>,
    headers: HeaderMap,
) -> Response {
    let token = bearer_token(&headers)
        .map(String::from)
        .or(params.token);

    let auth_user = if auth.enabled() {
        let verified = match token.as_deref() {
            Some(token) => auth.verify(token),
            None => Err(crate::services::AuthReason::InvalidToken),
        };
        match verified {
            Ok(claims) => Some(claims.user),
            Err(reason) => {
                tracing::warn!(reason = %reason, "WebSocket auth failed");
                return ws.on_upgrade(move |mut socket| async move {
                    let frame = OutboundFrame::error(
                        ErrorCode::PermissionDenied,
                        format!("authentication failed: {reason}"),
                        None,
                    );
                    if let Ok(json) = serde_json::to_string(&frame) {
                        let _ = socket.send(Message::Text(json)).await;
                    }
                    let _ = socket.close().await;
                });
            }
        }
    } else {
        // No secret configured (development mode): anonymous connections.
        None
    };

    ws.on_upgrade(move |socket| handle_socket(socket, engine, auth_user))
}

/// Pump frames between an established socket and the session engine
async fn handle_socket(socket: WebSocket, engine: SessionEngine, auth_user: Option<String>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let conn_id = engine.accept(tx, auth_user.clone());
    tracing::info!(
        conn_id = %conn_id,
        auth_user = auth_user.as_deref().unwrap_or("<anonymous>"),
        "WebSocket connection established"
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(frame) => match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json)).await.is_err() {
                            tracing::debug!(conn_id = %conn_id, "WebSocket send failed");
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(conn_id = %conn_id, error = %e, "Failed to serialize frame");
                    }
                },
                Outbound::Close { code } => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: Cow::from(""),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let recv_engine = engine.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    recv_engine.handle_raw(conn_id, &text).await;
                }
                Ok(Message::Binary(_)) => {
                    tracing::debug!(conn_id = %conn_id, "Ignoring binary frame");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    tracing::debug!(conn_id = %conn_id, "WebSocket close received");
                    break;
                }
                Err(e) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    });

    // Whichever side finishes first takes the other down with it.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    engine.close(conn_id);
    tracing::info!(conn_id = %conn_id, "WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer abc.def".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn test_bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_ws_query_params() {
        let params: WsQueryParams = serde_json::from_str(r#"{"token":"t"}"#).unwrap();
        assert_eq!(params.token.as_deref(), Some("t"));
        let params: WsQueryParams = serde_json::from_str("{}").unwrap();
        assert!(params.token.is_none());
    }
}
