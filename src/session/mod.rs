//! Provider WebSocket sessions.
//!
//! One session per connection. The reader loop processes frames strictly in
//! arrival order; outbound frames go through a per-session writer task so a
//! channel never sees interleaved writes. Long-running work triggered by a
//! frame (chat proxying, provider-initiated tool calls) runs in its own task
//! and replies through the same writer, keeping the reader responsive.

pub mod protocol;

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use axum::{
    Router,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
    routing::get,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::broker::registry::{SessionCommand, SessionHandle};
use crate::types::{CallId, ProviderId};
use self::protocol::{BrokerFrame, ProviderFrame, no_content_placeholder};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Router for the provider channel listener (a single WS route at `/`).
pub fn router(state: AppState) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

/// Serve the provider WebSocket listener.
pub async fn serve_ws(state: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("provider channel listening on ws://{bind}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

async fn handle_session(socket: WebSocket, state: AppState) {
    let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    debug!(session_id, "provider channel opened");

    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(sink, rx));
    let handle = SessionHandle::new(session_id, tx);

    let mut registered: Option<ProviderId> = None;
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(session_id, "channel read error: {err}");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                if handle_frame(&state, &handle, session_id, &mut registered, text.as_str())
                    .await
                    .is_break()
                {
                    break;
                }
            }
            Message::Binary(_) => {
                handle.send(BrokerFrame::Error {
                    message: "Binary frames are not supported".to_string(),
                });
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    if let Some(id) = registered.take() {
        state
            .broker
            .unregister_session(&id, session_id, "connection closed");
    }
    debug!(session_id, "provider channel closed");

    // The writer drains once every handle clone (including those held by
    // spawned reply tasks) is gone.
    drop(handle);
    let _ = writer.await;
}

/// Process one inbound frame. Frames on a session are handled strictly in
/// arrival order; only their replies may be produced asynchronously.
async fn handle_frame(
    state: &AppState,
    handle: &SessionHandle,
    session_id: u64,
    registered: &mut Option<ProviderId>,
    text: &str,
) -> ControlFlow<()> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            handle.send(BrokerFrame::Error {
                message: "Invalid JSON message".to_string(),
            });
            return ControlFlow::Continue(());
        }
    };
    let frame: ProviderFrame = match serde_json::from_value(value.clone()) {
        Ok(frame) => frame,
        Err(_) => {
            let kind = value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("(missing)");
            handle.send(BrokerFrame::Error {
                message: format!("Unknown or malformed message type: {kind}"),
            });
            return ControlFlow::Continue(());
        }
    };

    match frame {
        ProviderFrame::Register { client_id, tools } => {
            if registered.is_some() {
                handle.send(BrokerFrame::Error {
                    message: "Already registered".to_string(),
                });
                return ControlFlow::Continue(());
            }
            // The broker queues the `registered` acknowledgement itself so
            // it is ordered before any dispatch to the new entry.
            let id = state
                .broker
                .register(client_id.as_deref(), tools, handle.clone());
            *registered = Some(id);
        }
        _ if registered.is_none() => {
            handle.send(BrokerFrame::Error {
                message: "Must register before sending other messages".to_string(),
            });
        }
        ProviderFrame::Unregister => {
            if let Some(id) = registered.take() {
                state.broker.unregister_session(&id, session_id, "unregistered");
            }
            handle.close("Unregistered");
            return ControlFlow::Break(());
        }
        ProviderFrame::ToolResult {
            call_id,
            content,
            is_error,
        } => {
            let content = content.unwrap_or_else(no_content_placeholder);
            let completed = state.broker.calls().complete(
                &call_id,
                crate::broker::router::ToolOutput { content, is_error },
            );
            if !completed {
                // Late or duplicate result; the deadline already rejected it.
                debug!(session_id, call_id = %call_id, "dropping result for unknown call id");
            }
        }
        ProviderFrame::ChatRequest {
            request_id,
            payload,
        } => {
            let Some(id) = registered.clone() else {
                return ControlFlow::Continue(());
            };
            let broker = state.broker.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                match broker.proxy_chat(&id, &request_id, payload).await {
                    Ok(reply) => handle.send(BrokerFrame::ChatResponse {
                        request_id,
                        payload: reply,
                    }),
                    Err(error) => {
                        warn!(client_id = %id, "chat proxy failed: {error}");
                        handle.send(BrokerFrame::ChatError { request_id, error })
                    }
                }
            });
        }
        ProviderFrame::Notification { event } => {
            let Some(id) = registered.as_ref() else {
                return ControlFlow::Continue(());
            };
            match state.broker.push_notification(id, session_id, event) {
                Some(timestamp) => handle.send(BrokerFrame::NotificationAck { timestamp }),
                None => handle.send(BrokerFrame::Error {
                    message: "Not registered".to_string(),
                }),
            }
        }
        ProviderFrame::CallTool {
            call_id,
            tool,
            arguments,
        } => {
            let router = state.router.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                let call_id = call_id.unwrap_or_else(|| CallId::generate().into_inner());
                let output = router.route(&tool, arguments).await;
                handle.send(BrokerFrame::CallToolResult {
                    call_id,
                    content: output.content,
                    is_error: output.is_error,
                });
            });
        }
    }
    ControlFlow::Continue(())
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<SessionCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            SessionCommand::Frame(frame) => {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!("failed to encode outbound frame: {err}");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            SessionCommand::Close { reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
}
