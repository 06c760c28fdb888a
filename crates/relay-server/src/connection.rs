use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use relay_bridge::{Bridge, Connection};
use relay_core::events::ClientEvent;

use crate::protocol::ClientCommand;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Pump one WebSocket: queued events out, client commands in, periodic
/// pings. Unregisters the connection when either side ends.
pub async fn run(socket: WebSocket, conn: Arc<Connection>, mut rx: mpsc::Receiver<String>, bridge: Arc<Bridge>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_conn = Arc::clone(&conn);
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_conn.id, "sent ping");
                }
            }
        }
        writer_conn.mark_disconnected();
    });

    let reader_conn = Arc::clone(&conn);
    let reader_bridge = Arc::clone(&bridge);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => handle_frame(&reader_bridge, &reader_conn, text.as_str()),
                WsMessage::Pong(_) => reader_conn.record_pong(),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever side ends first stops the other.
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    bridge.disconnect(&conn);
    tracing::info!(connection_id = %conn.id, thread_id = %conn.thread_id, "client disconnected");
}

fn handle_frame(bridge: &Arc<Bridge>, conn: &Arc<Connection>, raw: &str) {
    match ClientCommand::parse(raw) {
        Ok(ClientCommand::Ping) => {
            conn.record_pong();
            conn.send(&ClientEvent::Pong);
        }
        Ok(ClientCommand::Send {
            message,
            agent_id,
            message_id,
        }) => {
            let bridge = Arc::clone(bridge);
            let conn = Arc::clone(conn);
            tokio::spawn(async move {
                send_message(&bridge, &conn, &message, &agent_id, message_id).await;
            });
        }
        Err(err) => {
            tracing::debug!(connection_id = %conn.id, error = %err, "malformed client frame");
            conn.send(&ClientEvent::Error {
                message: err.client_message(),
                message_id: None,
            });
        }
    }
}

async fn send_message(
    bridge: &Bridge,
    conn: &Connection,
    message: &str,
    agent_id: &str,
    message_id: Option<String>,
) {
    conn.send(&ClientEvent::Processing {
        message_id: message_id.clone(),
    });

    match bridge
        .dispatch(message, agent_id, &conn.thread_id, message_id.as_deref())
        .await
    {
        Ok(job) => {
            conn.send(&ClientEvent::MessageSent {
                message_id,
                conversation_id: job.conversation_id(),
                thread_id: conn.thread_id.clone(),
            });
        }
        Err(err) => {
            conn.send(&ClientEvent::Error {
                message: err.client_message(),
                message_id,
            });
        }
    }
}
