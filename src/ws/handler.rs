use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{auth::CurrentIdentity, state::AppState, ws::hub::ServerEvent};

/// Requests a client may send over the socket. Mutations go through the HTTP
/// API; the socket only serves snapshots and receives pushes.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum ClientRequest {
    TripsRequested,
    VehiclesRequested,
}

/// Upgrade handler. The identity is resolved once here, before the upgrade;
/// the viewer keeps it for the lifetime of the connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: crate::auth::Identity) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, user = %identity.username, "viewer connected");

    let mut rx = state.hub.connect(conn_id.clone(), identity.clone()).await;
    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(conn_id = %sender_conn_id, %err, "event serialization failed");
                    continue;
                }
            };
            if sink.send(Message::Text(payload)).await.is_err() {
                debug!(conn_id = %sender_conn_id, "socket sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(raw)) => {
                match serde_json::from_str::<ClientRequest>(&raw) {
                    Ok(ClientRequest::TripsRequested) => {
                        match state.hub.snapshot(&conn_id, state.config.listing_floor()).await {
                            Ok(trips) => {
                                state.hub.send_to(&conn_id, ServerEvent::TripsUpdated(trips)).await;
                            }
                            Err(err) => {
                                warn!(conn_id = %conn_id, %err, "snapshot failed");
                            }
                        }
                    }
                    Ok(ClientRequest::VehiclesRequested) => match state
                        .trips
                        .list_vehicles(&identity)
                        .await
                    {
                        Ok(vehicles) => {
                            state
                                .hub
                                .send_to(&conn_id, ServerEvent::VehiclesUpdated(vehicles))
                                .await;
                        }
                        Err(err) => {
                            warn!(conn_id = %conn_id, %err, "vehicle snapshot failed");
                        }
                    },
                    Err(err) => {
                        debug!(conn_id = %conn_id, %err, "unrecognized client message");
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(conn_id = %conn_id, %err, "socket receive error");
                break;
            }
        }
    }

    state.hub.disconnect(&conn_id).await;
    send_task.abort();
    info!(conn_id = %conn_id, "viewer disconnected");
}
