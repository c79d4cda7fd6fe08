use crate::handlers::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use coinpulse_core::{BusEvent, PipelineEvent};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(|socket| websocket_connection(socket, state))
}

async fn websocket_connection(mut socket: WebSocket, state: AppState) {
    // Every subscriber starts from a full snapshot.
    let posts = state.store.load().await.unwrap_or_default();
    let snapshot = BusEvent::now(PipelineEvent::InitialSnapshot { posts });
    if send_event(&mut socket, &snapshot).await.is_err() {
        return;
    }

    let mut events = state.bus.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        // No command semantics yet; parse and log only.
                        match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(value) => tracing::info!(message = %value, "client message"),
                            Err(_) => tracing::debug!("client sent non-JSON message: {text}"),
                        }
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    tracing::info!("WebSocket connection closed");
}

async fn send_event(socket: &mut WebSocket, event: &BusEvent) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).unwrap_or_default();
    socket.send(Message::Text(json)).await
}
