//! WebSocket and status endpoints.
//!
//! Endpoints:
//! - GET /ws/:room_id/:user_id - participant connection (text control in, binary audio out)
//! - GET /v1/rooms             - per-room status
//! - GET /v1/health            - health check

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use maestro_core::{ParticipantHandle, RoomRegistry, RoomSnapshot};
use serde::Serialize;

pub fn router(registry: RoomRegistry) -> Router {
    Router::new()
        .route("/ws/:room_id/:user_id", get(connect))
        .route("/v1/rooms", get(rooms))
        .route("/v1/health", get(health))
        .with_state(registry)
}

pub async fn serve(bind: &str, registry: RoomRegistry) -> maestro_core::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    rooms: usize,
}

async fn health(State(registry): State<RoomRegistry>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        rooms: registry.room_count(),
    })
}

async fn rooms(State(registry): State<RoomRegistry>) -> Json<Vec<RoomSnapshot>> {
    Json(registry.snapshots())
}

async fn connect(
    ws: WebSocketUpgrade,
    Path((room_id, user_id)): Path<(String, String)>,
    State(registry): State<RoomRegistry>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let participant = registry.join(&room_id, &user_id);
        run_connection(socket, &participant).await;
        participant.leave();
    })
}

/// Pumps one participant connection until either side goes away.
async fn run_connection(mut socket: WebSocket, participant: &ParticipantHandle) {
    let room_id = participant.room().id().to_string();
    let user_id = participant.participant_id().to_string();

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let Some(reply) = participant.handle_text(&text) else {
                        continue;
                    };
                    match reply.to_json() {
                        Ok(reply) => {
                            if socket.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(room = %room_id, participant = %user_id, %error, "encoding reply failed");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    tracing::debug!(room = %room_id, participant = %user_id, %error, "receive failed");
                    break;
                }
            },
            chunk = participant.next_audio() => match chunk {
                Some(chunk) => {
                    if let Err(error) = socket.send(Message::Binary(chunk.to_vec())).await {
                        tracing::debug!(room = %room_id, participant = %user_id, %error, "audio send failed");
                        break;
                    }
                }
                None => break,
            },
        }
    }
    tracing::info!(room = %room_id, participant = %user_id, "connection closed");
}
