use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use compliscan_core::{notify::ClientFeed, types::JobId};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::infra::{app_state::AppState, errors::AppResult, tenant::Tenant};

/// Upgrade to a WebSocket carrying the scan's progress feed.
///
/// The feed is opened before the upgrade so unknown or foreign scans get a
/// plain 404.
pub async fn scan_websocket_handler(
    ws: WebSocketUpgrade,
    Tenant(tenant_id): Tenant,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Response> {
    let feed = state.notifications.connect(tenant_id, job_id).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, feed)))
}

async fn handle_socket(socket: WebSocket, mut feed: ClientFeed) {
    let job_id = feed.job_id();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    loop {
        tokio::select! {
            next = feed.next() => match next {
                Some(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(job_id = %job_id, error = %err, "failed to encode progress message");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    debug!(job_id = %job_id, error = %err, "websocket receive error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(job_id = %job_id, "websocket closed");
}
