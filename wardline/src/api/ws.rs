//! WebSocket endpoint bridging clients to the realtime gateway

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::auth::Claims;
use super::middleware::{authorize, bearer_token};
use crate::context::AppContext;
use crate::error::WardlineError;
use crate::gateway::ClientFrame;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// For clients that cannot set headers on the upgrade request
    pub token: Option<String>,
}

/// Upgrade an authenticated request; the token comes from the
/// `Authorization` header or the `token` query parameter
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Result<Response, WardlineError> {
    let token = match params.token {
        Some(token) if !token.is_empty() => token,
        _ => bearer_token(&headers)?,
    };
    let claims = authorize(&ctx, &token).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, ctx, claims)))
}

async fn handle_socket(socket: WebSocket, ctx: Arc<AppContext>, claims: Claims) {
    let (client_id, mut frames) = ctx.gateway.connect();
    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Dropping unserializable frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = {
        let gateway = ctx.gateway.clone();
        let client_id = client_id.clone();

        tokio::spawn(async move {
            while let Some(Ok(message)) = stream.next().await {
                match message {
                    Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(ClientFrame::Join { subject_id }) if subject_id == claims.sub => {
                            gateway.join(&client_id, &subject_id);
                        }
                        Ok(ClientFrame::Join { subject_id }) => warn!(
                            client_id = %client_id,
                            subject_id = %claims.sub,
                            requested = %subject_id,
                            "Refusing join of another subject's room"
                        ),
                        Err(e) => debug!(client_id = %client_id, "Ignoring client frame: {}", e),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        })
    };

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    ctx.gateway.disconnect(&client_id);
}
