//! One task pair per socket, generalized from `wsrpc::client_connected`:
//! a single writer task drains the session's outbound channel into the
//! socket, and the reader loop feeds raw frames into `Session::handle_frame`.
//! Neither task ever awaits on the other; a slow or gone peer only ever
//! affects its own socket (spec §4.6).

use futures::{SinkExt, StreamExt};
use realtime_core::{Registry, ServerFrame, Session, User};
use tokio::sync::mpsc;
use warp::filters::ws::{Message, WebSocket};

pub async fn handle_connection(ws: WebSocket, user: User, registry: Registry) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("failed to serialize outbound frame: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let session = Session::new(connection_id.clone(), user, registry, outbound_tx);

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, "websocket read error: {}", e);
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        if msg.is_ping() || msg.is_pong() {
            continue;
        }
        match msg.to_str() {
            Ok(text) => session.handle_frame(text).await,
            Err(()) => {
                tracing::warn!(connection_id = %connection_id, "dropping non-text websocket frame");
            }
        }
    }

    session.close();
    drop(session); // drops the outbound sender, letting the writer drain and exit
    let _ = writer.await;
}
