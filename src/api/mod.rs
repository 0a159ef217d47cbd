//! Dashboard HTTP surface.
//!
//! Read-only snapshots, the tool invocation endpoint, chat endpoints, and
//! the SSE event streams observers subscribe to. The MCP endpoint is nested
//! separately at `/mcp` (see [`crate::server`]).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        Html, Json,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use rmcp::model::JsonObject;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::broker::Broker;
use crate::broker::events::{ClientStatus, EventFrame, StateSnapshot};
use crate::broker::router::{ToolOutput, ToolRouter};
use crate::config::BrokerConfig;
use crate::tools::{self, standard_builtins};
use crate::types::ProviderId;

const DASHBOARD_HTML: &str = include_str!("../../static/dashboard.html");

/// Shared state for the HTTP and WebSocket surfaces.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub router: Arc<ToolRouter>,
}

impl AppState {
    /// Build the broker core with the standard built-in tool set.
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let broker = Arc::new(Broker::new(config)?);
        let builtins = standard_builtins(broker.clone());
        let router = Arc::new(ToolRouter::new(broker.clone(), builtins));
        Ok(Self { broker, router })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/api/status", get(status))
        .route("/api/activity", get(activity))
        .route("/api/call-tool", post(call_tool))
        .route("/api/events", get(events))
        .route("/api/client/{id}/status", get(client_status))
        .route("/api/client/{id}/activity", get(client_activity))
        .route("/api/client/{id}/events", get(client_events))
        .route("/api/chat", post(chat))
        .route("/api/speak-action", post(speak_action))
        .route("/api/ask-stream", post(ask_stream))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn status(State(state): State<AppState>) -> Json<StateSnapshot> {
    Json(state.broker.snapshot())
}

async fn activity(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.broker.activity()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolRequest {
    #[serde(default)]
    client_id: Option<String>,
    tool: String,
    #[serde(default)]
    arguments: JsonObject,
}

/// Invoke a tool through the same router consumers use.
///
/// With `clientId` the call targets that provider's local tool name;
/// without it the name goes through full resolution (built-ins included).
async fn call_tool(
    State(state): State<AppState>,
    Json(request): Json<CallToolRequest>,
) -> Json<Value> {
    let start = Instant::now();
    let name = match &request.client_id {
        Some(client_id) => format!("{client_id}__{}", request.tool),
        None => request.tool.clone(),
    };
    let output = state.router.route(&name, request.arguments).await;
    Json(tool_response(output, start))
}

fn tool_response(output: ToolOutput, start: Instant) -> Value {
    json!({
        "content": output.content,
        "isError": output.is_error,
        "duration": start.elapsed().as_millis() as u64,
    })
}

async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before snapshotting so no frame falls between the two.
    let mut rx = state.broker.subscribe();
    let snapshot = EventFrame::State(state.broker.snapshot());

    let stream = async_stream::stream! {
        if let Some(event) = frame_event(&snapshot) {
            yield Ok(event);
        }
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    if let Some(event) = frame_event(&frame) {
                        yield Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("event observer lagged, skipped {skipped} frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn frame_event(frame: &EventFrame) -> Option<Event> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(Event::default().data(json)),
        Err(err) => {
            warn!("failed to encode event frame: {err}");
            None
        }
    }
}

async fn client_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClientStatus>, StatusCode> {
    let id = ProviderId::new(id);
    state
        .broker
        .client_status(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn client_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Value> {
    let id = ProviderId::new(id);
    Json(json!(state.broker.client_activity(&id)))
}

/// Per-provider SSE stream: the global fan-out filtered to frames that
/// concern this provider, preceded by its current snapshot when connected.
async fn client_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = ProviderId::new(id);
    let mut rx = state.broker.subscribe();
    let snapshot = state.broker.client_status(&id);

    let stream = async_stream::stream! {
        if let Some(status) = snapshot {
            if let Ok(json) = serde_json::to_string(&json!({"type": "state", "client": status})) {
                yield Ok(Event::default().data(json));
            }
        }
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    if frame.client_id() != Some(id.as_str()) {
                        continue;
                    }
                    if let Some(event) = frame_event(&frame) {
                        yield Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(client_id = %id, "event observer lagged, skipped {skipped} frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct ChatRequestBody {
    message: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    system: Option<String>,
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequestBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let start = Instant::now();
    match state
        .broker
        .generate(
            "dashboard chat",
            &request.message,
            request.system.as_deref(),
            request.model.as_deref(),
        )
        .await
    {
        Ok((response, model)) => Ok(Json(json!({
            "response": response,
            "model": model,
            "duration": start.elapsed().as_millis() as u64,
        }))),
        Err(message) => Err((StatusCode::BAD_GATEWAY, Json(json!({"error": message})))),
    }
}

#[derive(Debug, Deserialize)]
struct SpeakActionBody {
    action: String,
}

async fn speak_action(
    State(state): State<AppState>,
    Json(request): Json<SpeakActionBody>,
) -> Json<Value> {
    let start = Instant::now();
    let output = match tools::speak::speak_action(&state.broker, &request.action).await {
        Ok(output) => output,
        Err(err) => ToolOutput::error_text(format!("Error: {err}")),
    };
    Json(tool_response(output, start))
}

#[derive(Debug, Deserialize)]
struct AskStreamBody {
    prompt: String,
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    speak: bool,
}

/// Streamed ask: one `{token}` event per upstream chunk, then a terminal
/// `{done, fullText}` event. With `speak:true` the full text is additionally
/// sent to the TTS provider, best-effort, before the terminal event.
async fn ask_stream(
    State(state): State<AppState>,
    Json(request): Json<AskStreamBody>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let AskStreamBody {
        prompt,
        system,
        model,
        speak,
    } = request;
    let broker = state.broker.clone();

    let stream = async_stream::stream! {
        broker.note_chat_request("chat request via ask-stream".to_string(), None);
        let upstream = broker
            .chat_proxy()
            .generate_stream(&prompt, system.as_deref(), model.as_deref())
            .await;
        match upstream {
            Ok(mut upstream) => {
                let mut full_text = String::new();
                while let Some(chunk) = upstream.next().await {
                    match chunk {
                        Ok(token) => {
                            full_text.push_str(&token);
                            yield Ok(Event::default().data(json!({"token": token}).to_string()));
                        }
                        Err(err) => {
                            let message = err.to_string();
                            broker.note_chat_error(&message);
                            yield Ok(Event::default().data(json!({"error": message}).to_string()));
                            break;
                        }
                    }
                }
                if speak && !full_text.is_empty() {
                    let mut args = JsonObject::new();
                    args.insert("text".to_string(), json!(full_text.clone()));
                    if let Err(err) = tools::speak::speak_text(&broker, args).await {
                        warn!("ask-stream speech failed: {err}");
                    }
                }
                yield Ok(Event::default().data(
                    json!({"done": true, "fullText": full_text}).to_string(),
                ));
            }
            Err(err) => {
                let message = err.to_string();
                broker.note_chat_error(&message);
                yield Ok(Event::default().data(json!({"error": message}).to_string()));
                yield Ok(Event::default().data(
                    json!({"done": true, "fullText": ""}).to_string(),
                ));
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> AppState {
        AppState::new(BrokerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn call_tool_reports_errors_in_band() {
        let state = test_state();
        let Json(body) = call_tool(
            State(state),
            Json(CallToolRequest {
                client_id: Some("ghost".to_string()),
                tool: "x".to_string(),
                arguments: JsonObject::new(),
            }),
        )
        .await;

        assert_eq!(body["isError"], json!(true));
        assert_eq!(
            body["content"][0]["text"],
            json!("Error: Broker client \"ghost\" not connected")
        );
        assert!(body["duration"].is_u64());
    }

    #[tokio::test]
    async fn unknown_client_status_is_not_found() {
        let state = test_state();
        let result = client_status(State(state), Path("ghost".to_string())).await;
        assert!(matches!(result, Err(StatusCode::NOT_FOUND)));
    }

    #[tokio::test]
    async fn status_snapshot_has_the_expected_shape() {
        let state = test_state();
        let Json(snapshot) = status(State(state)).await;
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value["startedAt"].is_string());
        assert_eq!(value["connectedClients"], json!(0));
        assert_eq!(value["stats"]["totalConnections"], json!(0));
        assert!(value["clients"].as_array().unwrap().is_empty());
    }
}
