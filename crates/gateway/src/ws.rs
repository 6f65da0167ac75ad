//! Telephony WebSocket gateway (C8). SPEC_FULL.md §4.8.
//!
//! Grounded on the teacher's `nodes/ws.rs` split-socket idiom (reader loop +
//! a task that owns the write half), adapted from a node-control-plane
//! protocol to the provider's `start`/`media`/`stop`/`dtmf`/`clear` telephony
//! stream protocol. Unlike the teacher's node socket, only one side (the
//! turn controller) ever produces outbound frames, so the turn task owns
//! the write half directly instead of going through an outbound channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use ringline_audio::{codec, vad};

use crate::executor::CallCustomField;
use crate::state::AppState;
use crate::turn::Turn;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire protocol
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    start: Option<StartPayload>,
    media: Option<MediaPayload>,
    dtmf: Option<DtmfPayload>,
    #[serde(rename = "customField")]
    custom_field: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartPayload {
    call_sid: String,
    stream_sid: String,
    from: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct DtmfPayload {
    digit: String,
}

/// Parsed, decoded event handed from the reader task to the turn task.
/// Media frames that fail barge-in triage are dropped before reaching
/// this boundary (§4.6.2) — they never need to be represented here.
pub enum ProtocolEvent {
    Start {
        call_sid: String,
        stream_sid: String,
        caller: Option<String>,
        lead_ctx: Option<CallCustomField>,
    },
    Media {
        pcm: Vec<u8>,
    },
    Stop,
    Dtmf {
        digit: String,
    },
    Clear,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn telephony_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, mut ws_stream) = socket.split();

    // Shared, connection-scoped (not persisted) flag the turn task raises
    // while it owns the line, so the reader can gate barge-in VAD without
    // waiting for a turn on the session (§4.6.2 "if is_bot_speaking").
    let is_bot_speaking = Arc::new(AtomicBool::new(false));

    let (tx, rx) = mpsc::unbounded_channel::<ProtocolEvent>();

    let turn_state = state.clone();
    let turn_speaking = is_bot_speaking.clone();
    let turn_handle = tokio::spawn(async move {
        let mut turn = Turn::new(turn_state, ws_sink, turn_speaking);
        turn.run(rx).await;
    });

    let mut call_sid: Option<String> = None;

    while let Some(Ok(msg)) = ws_stream.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: RawFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unparseable telephony frame");
                continue;
            }
        };

        match frame.event.as_str() {
            "connected" => {}
            "start" => {
                let Some(start) = frame.start else {
                    tracing::warn!("start event missing start payload");
                    continue;
                };
                call_sid = Some(start.call_sid.clone());
                let lead_ctx = frame
                    .custom_field
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<CallCustomField>(raw).ok());
                if tx
                    .send(ProtocolEvent::Start {
                        call_sid: start.call_sid,
                        stream_sid: start.stream_sid,
                        caller: start.from,
                        lead_ctx,
                    })
                    .is_err()
                {
                    break;
                }
            }
            "media" => {
                let Some(media) = frame.media else { continue };
                let pcm = match codec::decode(&media.payload) {
                    Ok(pcm) => pcm,
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping unparseable media frame");
                        continue;
                    }
                };

                if is_bot_speaking.load(Ordering::SeqCst) {
                    // Barge-in triage happens here, not in the turn task,
                    // so detection latency is independent of whatever the
                    // turn task is currently blocked on (§4.6.2, §4.14).
                    if vad::is_speech(&pcm) {
                        if let Some(sid) = &call_sid {
                            state.interrupt_flags.set(sid);
                        }
                    }
                    continue;
                }

                if tx.send(ProtocolEvent::Media { pcm }).is_err() {
                    break;
                }
            }
            "stop" => {
                let _ = tx.send(ProtocolEvent::Stop);
                break;
            }
            "dtmf" => {
                if let Some(dtmf) = frame.dtmf {
                    if tx.send(ProtocolEvent::Dtmf { digit: dtmf.digit }).is_err() {
                        break;
                    }
                }
            }
            "clear" => {
                if tx.send(ProtocolEvent::Clear).is_err() {
                    break;
                }
            }
            other => {
                tracing::debug!(event = other, "ignoring unknown telephony event");
            }
        }
    }

    drop(tx);
    if let Err(e) = turn_handle.await {
        tracing::warn!(error = %e, "turn task panicked");
    }

    if let Some(sid) = call_sid {
        state.interrupt_flags.cleanup(&sid);
    }
}
