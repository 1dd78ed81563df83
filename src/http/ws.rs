use super::state::AppState;
use crate::protocol::Inbound;
use crate::session::{SessionIdentity, VoiceSession};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
pub struct VoiceQuery {
    /// Identity token, validated upstream
    pub token: Option<String>,
}

/// GET /ws/voice
/// Upgrade to a voice session
pub async fn voice_socket(
    ws: WebSocketUpgrade,
    Query(query): Query<VoiceQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_session(socket, query.token, state))
}

/// Bridges one socket to one `VoiceSession` until either side goes away.
///
/// The reader forwards frames in arrival order, the writer drains session
/// events in emission order. The session itself runs on this task.
async fn serve_session(socket: WebSocket, token: Option<String>, state: AppState) {
    let config = (*state.session_config).clone();
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel(config.outbound_queue_len.max(1));
    let (in_tx, in_rx) = mpsc::channel(config.inbound_queue_len.max(1));

    let session = VoiceSession::new(
        SessionIdentity::new(token),
        config,
        state.engines.clone(),
        out_tx,
    );
    let session_id = session.id().to_string();

    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(session_id.clone(), session.subscribe());
    }

    let writer_id = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Session {}: failed to encode {}: {}", writer_id, event.kind(), e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!("Session {}: send failed: {}", writer_id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_id = session_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let inbound = match frame {
                Ok(Message::Text(text)) => Inbound::from_text(&text),
                Ok(Message::Binary(bytes)) => Inbound::Audio(bytes),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Session {}: receive failed: {}", reader_id, e);
                    break;
                }
            };
            if in_tx.send(inbound).await.is_err() {
                break;
            }
        }
        debug!("Session {}: reader finished", reader_id);
    });

    let stats = session.run(in_rx).await;

    reader.abort();
    let _ = writer.await;

    {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&session_id);
    }

    info!(
        "Session {} closed: {} turns, {} protocol errors, {} audio bytes",
        session_id, stats.turns_started, stats.protocol_errors, stats.audio_bytes
    );
}
