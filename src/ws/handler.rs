//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::PlayerId;
use crate::session::{ConnectionId, OutboxReceivers, SessionError, SessionOutbox, SessionRegistry};
use crate::ws::protocol::{decode_client_msg, ClientMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, ws_stream) = socket.split();
    let latency = state.config.game.artificial_latency();
    run_session(&state.sessions, latency, ws_sink, ws_stream).await;
}

/// Drive one connection until either half finishes, then release its player
async fn run_session<S, R, E>(
    sessions: &SessionRegistry,
    latency: Option<Duration>,
    ws_sink: S,
    ws_stream: R,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let connection_id = ConnectionId::new();
    info!(connection_id = %connection_id, "New WebSocket connection");

    let (outbox, receivers) = SessionOutbox::new(connection_id);

    let mut writer = tokio::spawn(run_writer(connection_id, ws_sink, receivers, latency));
    let reader = run_reader(sessions, &outbox, ws_stream);

    // Whichever half finishes first ends the session
    tokio::select! {
        _ = reader => {}
        _ = &mut writer => {
            debug!(connection_id = %connection_id, "Writer finished first");
        }
    }
    writer.abort();

    sessions.leave(connection_id).await;
    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// What one inbound text frame did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameOutcome {
    Joined(PlayerId),
    InputForwarded,
    /// Undecodable or unknown; dropped without a reply
    Malformed,
}

/// Decode one text frame and route it to the session registry
async fn handle_frame(
    sessions: &SessionRegistry,
    outbox: &Arc<SessionOutbox>,
    text: &str,
) -> Result<FrameOutcome, SessionError> {
    let connection_id = outbox.connection_id;

    let msg = match decode_client_msg(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(connection_id = %connection_id, error = %e, "Dropping malformed message");
            return Ok(FrameOutcome::Malformed);
        }
    };

    match msg {
        ClientMsg::Join { name } => sessions.join(outbox, name).await.map(FrameOutcome::Joined),
        ClientMsg::Input {
            player_id,
            seq,
            input,
        } => {
            if sessions.player_for(&connection_id) != Some(player_id) {
                debug!(
                    connection_id = %connection_id,
                    player_id = %player_id,
                    "Applying input for a player not joined on this connection"
                );
            }
            sessions.submit_input(player_id, seq, input).await?;
            Ok(FrameOutcome::InputForwarded)
        }
    }
}

/// Reader loop: WebSocket -> session registry
async fn run_reader<R, E>(sessions: &SessionRegistry, outbox: &Arc<SessionOutbox>, mut ws_stream: R)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let connection_id = outbox.connection_id;

    while let Some(result) = ws_stream.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                debug!(connection_id = %connection_id, "Received binary message, ignoring");
                continue;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        };

        if let Err(e) = handle_frame(sessions, outbox, &text).await {
            warn!(connection_id = %connection_id, error = %e, "Failed to handle client message");
            break;
        }
    }
}

/// Writer task: control replies and latest snapshots -> WebSocket.
///
/// With artificial latency each frame is held until `latency` after it was
/// produced. Snapshots still replace each other while one is held, so a
/// lagged client keeps receiving at the tick rate, just late.
async fn run_writer<S>(
    connection_id: ConnectionId,
    mut ws_sink: S,
    mut receivers: OutboxReceivers,
    latency: Option<Duration>,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let (text, produced_at) = tokio::select! {
            // Welcome always goes out before any snapshot
            biased;

            msg = receivers.control.recv() => {
                let Some(msg) = msg else { break };
                match msg.to_json() {
                    Ok(text) => (text, Instant::now()),
                    Err(e) => {
                        error!(connection_id = %connection_id, error = %e, "Failed to encode reply");
                        continue;
                    }
                }
            }
            changed = receivers.snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = receivers.snapshots.borrow_and_update().clone();
                match frame {
                    Some(frame) => (frame.text.clone(), frame.encoded_at),
                    None => continue,
                }
            }
        };

        if let Some(latency) = latency {
            sleep_until(produced_at + latency).await;
        }

        if let Err(e) = ws_sink.send(Message::Text(text)).await {
            debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}
