use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::bridge::{Inbound, Outbound, TerminalBridge};
use crate::routes::BANNER;
use crate::state::AppState;

const INBOUND_CAPACITY: usize = 256;
const OUTBOUND_CAPACITY: usize = 256;

/// How long a finished session waits for queued frames to reach the peer.
const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// `GET /ws`: upgrade to a terminal session.
pub async fn terminal_ws(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = connect.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| handle_terminal_socket(socket, state, peer))
}

/// `GET /`: terminal session for upgrade requests, banner otherwise.
pub async fn root(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    match ws {
        Some(ws) => {
            let peer = connect.map(|ConnectInfo(addr)| addr);
            ws.on_upgrade(move |socket| handle_terminal_socket(socket, state, peer))
        }
        None => BANNER.into_response(),
    }
}

async fn handle_terminal_socket(socket: WebSocket, state: AppState, peer: Option<SocketAddr>) {
    let guard = state.sessions.register(peer);
    let id = guard.id();
    log::info!(
        "terminal connection {id} opened from {}",
        peer.map_or_else(|| "unknown".to_string(), |p| p.to_string())
    );

    let (mut sender, mut receiver) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(INBOUND_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let (msg, last) = match frame {
                Outbound::Text(text) => (WsMessage::Text(text), false),
                Outbound::Binary(bytes) => (WsMessage::Binary(bytes), false),
                Outbound::Close => (WsMessage::Close(None), true),
            };
            if sender.send(msg).await.is_err() || last {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let event = match msg {
                Ok(WsMessage::Text(text)) => Inbound::Frame(text.into_bytes()),
                Ok(WsMessage::Binary(bytes)) => Inbound::Frame(bytes),
                Ok(WsMessage::Close(_)) => Inbound::Closed,
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => continue,
                Err(e) => Inbound::Error(e.to_string()),
            };
            let done = !matches!(event, Inbound::Frame(_));
            if inbound_tx.send(event).await.is_err() || done {
                return;
            }
        }
    });

    TerminalBridge::new(guard, state.attacher.clone(), outbound_tx)
        .run(inbound_rx)
        .await;

    recv_task.abort();
    if !finish_sender(send_task, SEND_DRAIN_TIMEOUT).await {
        log::debug!("terminal connection {id} peer stopped reading, dropping queued frames");
    }
    log::info!("terminal connection {id} closed");
}

/// Wait up to `limit` for the writer to finish; abort it otherwise.
/// Returns whether it finished on its own.
async fn finish_sender(mut task: JoinHandle<()>, limit: Duration) -> bool {
    match tokio::time::timeout(limit, &mut task).await {
        Ok(_) => true,
        Err(_) => {
            task.abort();
            false
        }
    }
}
