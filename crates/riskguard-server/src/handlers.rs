//! API route handlers.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use riskguard_core::{CheckRequest, CheckResult, ContextItem};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ApiError, Result};
use crate::models::{
    BatchCheckBody, BatchCheckResponse, CheckBody, CheckResponse, ContextCheckBody,
    HealthResponse, ReloadRulesResponse, RulesResponse, WordBody, WordsResponse,
};
use crate::state::AppState;

/// In-flight requests buffered per stream connection.
const STREAM_BUFFER: usize = 32;

/// POST /api/v1/check - Check standalone content.
pub async fn check(
    State(state): State<AppState>,
    Json(body): Json<CheckBody>,
) -> Result<Json<CheckResponse>> {
    debug!(content_len = body.content.len(), user_id = %body.user_id, "Checking content");
    let result = state.checker.check_content(body.into()).await?;
    Ok(Json(result.into()))
}

/// POST /api/v1/check_with_context - Check content with its conversation.
pub async fn check_with_context(
    State(state): State<AppState>,
    Json(body): Json<ContextCheckBody>,
) -> Result<Json<CheckResponse>> {
    debug!(
        content_len = body.check.content.len(),
        context_items = body.context_items.len(),
        "Checking content with context"
    );
    let context: Vec<ContextItem> = body.context_items.into_iter().map(Into::into).collect();
    let result = state
        .checker
        .check_content_with_context(body.check.into(), context)
        .await?;
    Ok(Json(result.into()))
}

/// Batch id used when the client sends none.
pub fn default_batch_id() -> String {
    format!("batch_{}", Utc::now().format("%Y%m%d%H%M%S"))
}

/// POST /api/v1/batch_check - Check many items concurrently.
pub async fn batch_check(
    State(state): State<AppState>,
    Json(body): Json<BatchCheckBody>,
) -> Result<Json<BatchCheckResponse>> {
    let batch_id = body
        .batch_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(default_batch_id);
    let items: Vec<CheckRequest> = body.items.into_iter().map(Into::into).collect();
    debug!(batch_id = %batch_id, items = items.len(), "Checking batch");

    let report = state.checker.batch_check(items, batch_id).await?;
    let batch = report.result;
    Ok(Json(BatchCheckResponse {
        success: true,
        batch_id: batch.batch_id,
        results: batch.results,
        total_cost_time: batch.total_cost_time,
        errors: batch.errors,
        error: report.last_error.map(|e| e.to_string()),
    }))
}

/// GET /api/v1/stream - Bidirectional check stream over WebSocket.
pub async fn stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

fn reply_frame(reply: riskguard_core::Result<CheckResult>) -> String {
    match reply {
        Ok(result) => encode_frame(&CheckResponse::from(result)),
        Err(e) => encode_frame(&ApiError::from(e).body()),
    }
}

fn encode_frame<T: serde::Serialize>(body: &T) -> String {
    serde_json::to_string(body).unwrap_or_else(|e| {
        serde_json::json!({"success": false, "error": e.to_string(), "code": "encode_failed"})
            .to_string()
    })
}

/// One reply slot per received text frame, in arrival order.
enum ReplySlot {
    /// Reply comes from the checker.
    Checked,
    /// Frame did not decode; reply with this error body.
    Malformed(String),
}

/// Each text frame is one request and gets exactly one reply, in order.
///
/// Frames that are not valid request JSON are answered with a
/// `bad_request` error frame.
async fn handle_stream(socket: WebSocket, state: AppState) {
    let (mut sink, mut frames) = socket.split();
    let (request_tx, request_rx) = mpsc::channel::<CheckRequest>(STREAM_BUFFER);
    let (reply_tx, mut reply_rx) = mpsc::channel(STREAM_BUFFER);
    let (slot_tx, mut slot_rx) = mpsc::unbounded_channel::<ReplySlot>();

    let checker = state.checker.clone();
    let worker = tokio::spawn(async move { checker.stream_check(request_rx, reply_tx).await });

    let writer = tokio::spawn(async move {
        while let Some(slot) = slot_rx.recv().await {
            let frame = match slot {
                ReplySlot::Checked => match reply_rx.recv().await {
                    Some(reply) => reply_frame(reply),
                    None => break,
                },
                ReplySlot::Malformed(frame) => frame,
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = frames.next().await {
        match frame {
            Message::Text(text) => match serde_json::from_str::<CheckBody>(text.as_str()) {
                Ok(body) => {
                    if slot_tx.send(ReplySlot::Checked).is_err()
                        || request_tx.send(body.into()).await.is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Malformed stream frame");
                    let reply = encode_frame(&ApiError::BadRequest(e.to_string()).body());
                    if slot_tx.send(ReplySlot::Malformed(reply)).is_err() {
                        break;
                    }
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    drop(request_tx);
    drop(slot_tx);
    let handled = worker.await.unwrap_or_default();
    let _ = writer.await;
    debug!(handled, "Stream closed");
}

/// GET /api/v1/health - Service health and detector fallback state.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let checker = &state.checker;
    Json(HealthResponse {
        status: "healthy",
        service: "riskguard",
        time: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        detectors: checker.detector_status(),
        rules_version: checker.rules().snapshot().map(|s| s.version),
        word_count: checker.words().len(),
    })
}

/// GET /api/v1/rules - Active rule set.
pub async fn get_rules(State(state): State<AppState>) -> Result<Json<RulesResponse>> {
    let set = state
        .checker
        .rules()
        .snapshot()
        .ok_or_else(|| ApiError::Internal("rule engine not initialized".to_string()))?;
    Ok(Json(RulesResponse::from(set.as_ref())))
}

/// POST /api/v1/rules/reload - Re-read the rule file.
pub async fn reload_rules(State(state): State<AppState>) -> Result<Json<ReloadRulesResponse>> {
    let set = state.checker.rules().reload()?;
    info!(version = set.version, rules = set.len(), "Rules reloaded via API");
    Ok(Json(ReloadRulesResponse {
        success: true,
        version: set.version,
        rule_count: set.len(),
    }))
}

/// GET /api/v1/words - Current word list.
pub async fn list_words(State(state): State<AppState>) -> Json<WordsResponse> {
    let words = state.checker.words().all_words();
    Json(WordsResponse {
        success: true,
        count: words.len(),
        words: Some(words),
        removed: None,
    })
}

fn validated_word(body: WordBody) -> Result<String> {
    let word = body.word.trim();
    if word.is_empty() {
        return Err(ApiError::BadRequest("word is empty".to_string()));
    }
    Ok(word.to_string())
}

/// POST /api/v1/words - Add a word.
pub async fn add_word(
    State(state): State<AppState>,
    Json(body): Json<WordBody>,
) -> Result<Json<WordsResponse>> {
    let word = validated_word(body)?;
    let words = state.checker.words();
    words.add_word(word);
    Ok(Json(WordsResponse {
        success: true,
        count: words.len(),
        words: None,
        removed: None,
    }))
}

/// DELETE /api/v1/words - Remove a word.
pub async fn remove_word(
    State(state): State<AppState>,
    Json(body): Json<WordBody>,
) -> Result<Json<WordsResponse>> {
    let word = validated_word(body)?;
    let words = state.checker.words();
    let removed = words.remove_word(&word);
    Ok(Json(WordsResponse {
        success: true,
        count: words.len(),
        words: None,
        removed: Some(removed),
    }))
}

/// POST /api/v1/words/reload - Re-read the word files.
pub async fn reload_words(State(state): State<AppState>) -> Json<WordsResponse> {
    let words = state.checker.words();
    let loaded = words.update();
    info!(loaded, "Sensitive words reloaded via API");
    Json(WordsResponse {
        success: true,
        count: words.len(),
        words: None,
        removed: None,
    })
}
