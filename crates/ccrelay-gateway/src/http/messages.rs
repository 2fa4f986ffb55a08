//! POST /v1/messages — the full request lifecycle: credential bind,
//! prompt translation, upstream conversation, completion relay, tool
//! extraction, and the Anthropic event model back out.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

use ccrelay_core::credential::Credential;
use ccrelay_pool::Selection;
use ccrelay_translate::api::MessagesRequest;
use ccrelay_translate::heuristic::looks_like_failed_tool_call;
use ccrelay_translate::{build_prompt, extract_tool_uses, ExtractedResponse};
use ccrelay_upstream::sse::decode_buffered;
use ccrelay_upstream::{classify, CompletionEvent, ConversationHandle, UpstreamError};

use crate::app::AppState;
use crate::emit;
use crate::txlog::TxMeta;

pub async fn messages_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    // dump the request verbatim before any parsing can reject it
    let seq = state.txlog.as_ref().map(|txlog| {
        let seq = txlog.next_seq();
        txlog.log_request(seq, &format_headers(&headers), &body);
        seq
    });

    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            return finish_error(
                &state,
                seq,
                started,
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                &format!("malformed request body: {}", e),
                "-",
                "-",
            );
        }
    };
    if req.messages.is_empty() {
        return finish_error(
            &state,
            seq,
            started,
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "messages must not be empty",
            "-",
            "-",
        );
    }

    let pool = state.pool.load_full();
    let Some(selection) = state.selector.select(&pool).await else {
        return finish_error(
            &state,
            seq,
            started,
            StatusCode::INTERNAL_SERVER_ERROR,
            "api_error",
            "no active credentials",
            "-",
            "-",
        );
    };
    let cred = selection.credential.clone();

    // the per-request routing line: who serves it, how healthy they are
    let record = state.health.get(&cred.id);
    let utilization = record
        .usage
        .as_ref()
        .map(|u| u.five_hour_utilization())
        .unwrap_or(0.0);
    info!(
        credential = %cred.id,
        state = %record.state,
        utilization,
        route = %selection.route,
        stream = req.stream,
        "dispatching /v1/messages"
    );

    let prompt = build_prompt(&req);
    let model = req
        .model
        .clone()
        .unwrap_or_else(|| emit::DEFAULT_MODEL.to_string());

    let conv_name = format!("ccrelay-{}", chrono::Utc::now().timestamp_millis());
    let is_temporary = !state.config.conversations.individual_messages_visible;
    let conv = match state
        .client
        .create_conversation(&cred, &conv_name, is_temporary)
        .await
    {
        Ok(conv) => conv,
        Err(e) => return upstream_error(&state, seq, started, &cred, &selection, e),
    };

    if req.stream {
        stream_response(state, seq, started, req, cred, selection, conv, prompt, model)
    } else {
        buffered_response(state, seq, started, req, cred, selection, conv, prompt, model).await
    }
}

/// POST /v1/complete — the legacy text-completions dialect is not relayed.
pub async fn complete_handler() -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({
            "error": "not_implemented",
            "message": "text completions are not supported; use /v1/messages",
        })),
    )
        .into_response()
}

#[allow(clippy::too_many_arguments)]
async fn buffered_response(
    state: Arc<AppState>,
    seq: Option<u64>,
    started: Instant,
    req: MessagesRequest,
    cred: Credential,
    selection: Selection,
    conv: ConversationHandle,
    prompt: String,
    model: String,
) -> Response {
    let raw = match state
        .client
        .send_completion_buffered(&cred, &conv, &prompt)
        .await
    {
        Ok(raw) => raw,
        Err(e) => return upstream_error(&state, seq, started, &cred, &selection, e),
    };

    let mut full_text = String::new();
    let mut stream_error: Option<String> = None;
    for event in decode_buffered(&raw) {
        match event {
            CompletionEvent::Delta(text) => full_text.push_str(&text),
            CompletionEvent::Stop(_) => break,
            CompletionEvent::Error(message) => {
                stream_error = Some(message);
                break;
            }
        }
    }
    if let Some(message) = stream_error {
        // in-band error frame: classify by its text, same as an HTTP error body
        let err = UpstreamError::Api {
            status: 200,
            body: message,
        };
        return upstream_error(&state, seq, started, &cred, &selection, err);
    }

    state.health.record_success(&cred.id);

    let extraction = extract_tool_uses(&full_text);
    warn_on_silent_tool_failure(&req, &extraction, &full_text);

    let body = emit::message_json(
        &model,
        &extraction,
        emit::estimate_tokens(&prompt),
        emit::estimate_tokens(&full_text),
    );
    if let (Some(txlog), Some(seq)) = (state.txlog.as_ref(), seq) {
        txlog.log_response(
            seq,
            "status: 200\ncontent-type: application/json\n",
            body.to_string().as_bytes(),
        );
        txlog.log_meta(
            seq,
            &TxMeta {
                credential: cred.id.clone(),
                route: selection.route.to_string(),
                status: 200,
                duration_ms: started.elapsed().as_millis(),
            },
        );
    }
    (StatusCode::OK, Json(body)).into_response()
}

/// Streaming path: the upstream relay runs in its own task feeding a
/// channel; the response stream re-frames events in the Anthropic event
/// model. Dropping the client connection drops the receiver, which aborts
/// the upstream read on its next send.
#[allow(clippy::too_many_arguments)]
fn stream_response(
    state: Arc<AppState>,
    seq: Option<u64>,
    started: Instant,
    req: MessagesRequest,
    cred: Credential,
    selection: Selection,
    conv: ConversationHandle,
    prompt: String,
    model: String,
) -> Response {
    let (tx, mut rx) = mpsc::channel::<CompletionEvent>(64);

    let tx_err = tx.clone();
    let task_state = state.clone();
    let task_cred = cred.clone();
    let task_prompt = prompt.clone();
    tokio::spawn(async move {
        match task_state
            .client
            .send_completion_streaming(&task_cred, &conv, &task_prompt, tx)
            .await
        {
            Ok(_) => task_state.health.record_success(&task_cred.id),
            Err(e) => {
                let kind = classify(&e);
                warn!(credential = %task_cred.id, kind = %kind, err = %e, "streaming completion failed");
                task_state.health.record_failure(&task_cred.id, kind);
                let _ = tx_err
                    .send(CompletionEvent::Error("upstream request failed".to_string()))
                    .await;
            }
        }
    });

    let msg_id = format!("msg_{}", chrono::Utc::now().timestamp_millis());
    let input_tokens = emit::estimate_tokens(&prompt);

    let stream = async_stream::stream! {
        yield Ok::<Event, Infallible>(
            emit::message_start(&msg_id, &model, input_tokens).into_axum_event(),
        );
        yield Ok(emit::text_block_start().into_axum_event());

        let mut full_text = String::new();
        let mut failed = false;
        while let Some(event) = rx.recv().await {
            match event {
                CompletionEvent::Delta(text) => {
                    full_text.push_str(&text);
                    yield Ok(emit::text_delta(&text).into_axum_event());
                }
                CompletionEvent::Stop(_) => break,
                CompletionEvent::Error(message) => {
                    // the HTTP status is already on the wire; the error
                    // frame is the terminal signal
                    yield Ok(emit::error_frame(&message).into_axum_event());
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            yield Ok(emit::content_block_stop(0).into_axum_event());

            // tool extraction runs over the accumulated text once upstream
            // is done; each call becomes its own content block
            let extraction = extract_tool_uses(&full_text);
            warn_on_silent_tool_failure(&req, &extraction, &full_text);

            for (offset, tu) in extraction.tool_uses.iter().enumerate() {
                let index = offset + 1;
                yield Ok(emit::tool_block_start(index, tu).into_axum_event());
                yield Ok(emit::content_block_stop(index).into_axum_event());
            }

            yield Ok(emit::message_delta(
                emit::stop_reason(&extraction),
                emit::estimate_tokens(&full_text),
            )
            .into_axum_event());
            yield Ok(emit::message_stop().into_axum_event());
        }

        if let (Some(txlog), Some(seq)) = (state.txlog.as_ref(), seq) {
            txlog.log_response(
                seq,
                "status: 200\ncontent-type: text/event-stream\n",
                full_text.as_bytes(),
            );
            txlog.log_meta(
                seq,
                &TxMeta {
                    credential: cred.id.clone(),
                    route: selection.route.to_string(),
                    status: 200,
                    duration_ms: started.elapsed().as_millis(),
                },
            );
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn warn_on_silent_tool_failure(
    req: &MessagesRequest,
    extraction: &ExtractedResponse,
    full_text: &str,
) {
    if !req.tools.is_empty()
        && !extraction.has_tool_uses()
        && looks_like_failed_tool_call(full_text)
    {
        warn!("tools were offered but the response only announced a call without making one");
    }
}

fn upstream_error(
    state: &AppState,
    seq: Option<u64>,
    started: Instant,
    cred: &Credential,
    selection: &Selection,
    err: UpstreamError,
) -> Response {
    let kind = classify(&err);
    warn!(credential = %cred.id, kind = %kind, err = %err, "upstream call failed");
    state.health.record_failure(&cred.id, kind);

    // credential internals never reach the client
    finish_error(
        state,
        seq,
        started,
        StatusCode::INTERNAL_SERVER_ERROR,
        "api_error",
        "upstream request failed",
        &cred.id,
        &selection.route.to_string(),
    )
}

#[allow(clippy::too_many_arguments)]
fn finish_error(
    state: &AppState,
    seq: Option<u64>,
    started: Instant,
    status: StatusCode,
    error: &str,
    message: &str,
    credential: &str,
    route: &str,
) -> Response {
    let body = json!({"error": error, "message": message});
    if let (Some(txlog), Some(seq)) = (state.txlog.as_ref(), seq) {
        txlog.log_response(
            seq,
            &format!("status: {}\ncontent-type: application/json\n", status.as_u16()),
            body.to_string().as_bytes(),
        );
        txlog.log_meta(
            seq,
            &TxMeta {
                credential: credential.to_string(),
                route: route.to_string(),
                status: status.as_u16(),
                duration_ms: started.elapsed().as_millis(),
            },
        );
    }
    (status, Json(body)).into_response()
}

fn format_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for (name, value) in headers {
        out.push_str(name.as_str());
        out.push_str(": ");
        out.push_str(value.to_str().unwrap_or("<non-utf8>"));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_shape() {
        let body = json!({"error": "invalid_request_error", "message": "messages must not be empty"});
        assert_eq!(body["error"], "invalid_request_error");
        assert_eq!(body["message"], "messages must not be empty");
    }

    #[test]
    fn header_formatting() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("accept", "text/event-stream".parse().unwrap());
        let text = format_headers(&headers);
        assert!(text.contains("content-type: application/json\n"));
        assert!(text.contains("accept: text/event-stream\n"));
    }
}
