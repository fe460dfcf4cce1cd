use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::gateway::CallbackPayload;

use super::state::AppState;
use super::telegram::TelegramUpdate;

const SIGNATURE_HEADER: &str = "upstash-signature";
const MESSAGE_ID_HEADER: &str = "upstash-message-id";
const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

pub(super) async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Scheduler callback. Anything short of an internal error answers 200 so
/// the scheduler does not redeliver a finished operation.
pub(super) async fn scheduler_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = header_value(&headers, SIGNATURE_HEADER);
    if !state.gateway.verify_inbound_signature(signature.as_deref(), &body) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": "invalid_signature"})));
    }

    let payload: CallbackPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!("rejected callback body: {}", err);
            return (StatusCode::BAD_REQUEST, Json(json!({"status": "bad_json"})));
        }
    };
    let delivery_id = header_value(&headers, MESSAGE_ID_HEADER);
    debug!(
        "callback {} for chat {} (delivery {:?})",
        payload.kind.as_str(),
        payload.chat_id,
        delivery_id
    );

    let assistant = state.assistant.clone();
    let result =
        task::spawn_blocking(move || assistant.handle_callback(&payload, delivery_id.as_deref()))
            .await;
    match result {
        Ok(Ok(_)) => (StatusCode::OK, Json(json!({"status": "ok"}))),
        Ok(Err(err)) => {
            error!("callback failed, scheduler will retry: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error"})),
            )
        }
        Err(err) => {
            error!("callback task panicked: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error"})),
            )
        }
    }
}

/// Telegram webhook. Always 200 once authenticated: Telegram retries
/// non-2xx updates, and a reply has either been sent or logged by then.
pub(super) async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = state.telegram_webhook_secret.as_deref() {
        match header_value(&headers, TELEGRAM_SECRET_HEADER) {
            Some(provided) if provided == secret => {}
            Some(_) => {
                return (StatusCode::UNAUTHORIZED, Json(json!({"status": "invalid_token"})))
            }
            None => {
                return (StatusCode::UNAUTHORIZED, Json(json!({"status": "missing_token"})))
            }
        }
    }

    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(json!({"status": "bad_json"}))),
    };
    let update_id = update.update_id;
    let message = match update.into_inbound() {
        Ok(message) => message,
        Err(reason) => {
            debug!("ignoring telegram update {}: {}", update_id, reason.as_str());
            return (StatusCode::OK, Json(json!({"status": "ignored"})));
        }
    };
    info!("telegram update {} from chat {}", update_id, message.chat_id);

    let assistant = state.assistant.clone();
    let result = task::spawn_blocking(move || assistant.handle_user_message(&message)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("failed to handle telegram update {}: {}", update_id, err),
        Err(err) => error!("telegram handler panicked for update {}: {}", update_id, err),
    }
    (StatusCode::OK, Json(json!({"status": "ok"})))
}
