//! Websocket event stream
//!
//! Every bus message is forwarded as a text frame. The stream ends when the
//! client goes away or the bus drops the subscriber for falling behind.

use super::handlers::AppState;
use crate::domain::Subscription;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tracing::{debug, info};

/// GET /ws/events
pub async fn event_stream(State(supervisor): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let subscription = supervisor.subscribe();
    let bus = supervisor.bus().clone();
    ws.on_upgrade(move |socket| async move {
        let id = subscription.id();
        info!(subscriber = id, "event stream opened");
        forward(socket, subscription).await;
        bus.unsubscribe(id);
        info!(subscriber = id, "event stream closed");
    })
}

enum Next {
    Event(Option<String>),
    Client(Option<Result<Message, axum::Error>>),
}

async fn forward(mut socket: WebSocket, mut subscription: Subscription) {
    loop {
        let next = tokio::select! {
            event = subscription.recv() => Next::Event(event),
            incoming = socket.recv() => Next::Client(incoming),
        };

        match next {
            Next::Event(Some(message)) => {
                if socket.send(Message::Text(message)).await.is_err() {
                    debug!(subscriber = subscription.id(), "client went away");
                    return;
                }
            }
            Next::Event(None) => {
                debug!(subscriber = subscription.id(), "dropped by the bus");
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            Next::Client(None | Some(Err(_)) | Some(Ok(Message::Close(_)))) => return,
            // Anything the client sends is ignored.
            Next::Client(Some(Ok(_))) => {}
        }
    }
}
