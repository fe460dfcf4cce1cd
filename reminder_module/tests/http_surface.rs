use std::net::SocketAddr;
use std::sync::Arc;

use reminder_module::gateway::{CallbackKind, SchedulingGateway, SigningKeys};
use reminder_module::intent::{Intent, ReminderRequest};
use reminder_module::service::{build_router, AppState, DEFAULT_INBOUND_BODY_MAX_BYTES};
use reminder_module::task_store::NewTask;
use reminder_module::testing::{Harness, TEST_TIMEZONE};
use serde_json::json;
use tokio::sync::oneshot;

struct TestServer {
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn serve(state: AppState) -> TestServer {
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = build_router(state, DEFAULT_INBOUND_BODY_MAX_BYTES);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });
    TestServer {
        base_url: format!("http://{}", addr),
        shutdown: Some(shutdown_tx),
    }
}

fn open_state(harness: &Harness, webhook_secret: Option<&str>) -> AppState {
    AppState::new(
        harness.assistant.clone(),
        harness.gateway.clone(),
        webhook_secret.map(str::to_string),
    )
}

#[tokio::test]
async fn health_answers_ok() {
    let harness = Harness::new();
    let server = serve(open_state(&harness, None)).await;

    let response = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn callback_delivers_reminder() {
    let harness = Harness::new();
    let task = harness
        .campaign
        .schedule_new_task(
            "77",
            &NewTask {
                content: "take vitamins".to_string(),
                is_important: false,
                delay_minutes: 0,
                is_day_only: false,
            },
        )
        .unwrap();
    let message_id = task.qstash_message_id.clone().unwrap();
    let server = serve(open_state(&harness, None)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/callback", server.base_url))
        .header("Upstash-Message-Id", &message_id)
        .json(&json!({"chatId": "77", "taskId": task.id, "type": "reminder"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(harness.transport.texts_to("77").len(), 1);
    assert!(harness.transport.texts_to("77")[0].contains("take vitamins"));
    assert_eq!(harness.delivery.published_of(CallbackKind::FollowUp).len(), 1);
}

#[tokio::test]
async fn callback_for_unknown_task_still_succeeds() {
    let harness = Harness::new();
    let server = serve(open_state(&harness, None)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/callback", server.base_url))
        .json(&json!({"chatId": "77", "taskId": "gone", "type": "nag"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn malformed_callback_is_rejected() {
    let harness = Harness::new();
    let server = serve(open_state(&harness, None)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/callback", server.base_url))
        .header("content-type", "application/json")
        .body(r#"{"chatId": "77", "type": "teleport"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn unsigned_callback_is_rejected_when_keys_are_configured() {
    let harness = Harness::new();
    let gateway = Arc::new(SchedulingGateway::new(
        harness.delivery.clone(),
        TEST_TIMEZONE,
        SigningKeys::new(Some("sig_current".to_string()), Some("sig_next".to_string())),
    ));
    let server = serve(AppState::new(harness.assistant.clone(), gateway, None)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/callback", server.base_url))
        .header("Upstash-Signature", "not-a-jwt")
        .json(&json!({"chatId": "77", "type": "daily_checkin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn telegram_text_reaches_the_assistant() {
    let harness = Harness::new();
    harness.classifier.push(vec![Intent::Reminder(ReminderRequest {
        content: "buy bread".to_string(),
        delay_minutes: 30,
        is_important: false,
        is_day_only: false,
    })]);
    let server = serve(open_state(&harness, Some("hook-secret"))).await;

    let response = reqwest::Client::new()
        .post(format!("{}/telegram/webhook", server.base_url))
        .header("X-Telegram-Bot-Api-Secret-Token", "hook-secret")
        .json(&json!({
            "update_id": 1,
            "message": {
                "message_id": 9,
                "from": {"id": 55, "is_bot": false},
                "chat": {"id": 55, "type": "private"},
                "date": 1760882400,
                "text": "remind me to buy bread in 30 minutes"
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(harness.tasks.get_pending_tasks("55").unwrap().len(), 1);
    assert!(harness.transport.last_text().unwrap().contains("buy bread"));
}

#[tokio::test]
async fn telegram_requires_the_secret_token() {
    let harness = Harness::new();
    let server = serve(open_state(&harness, Some("hook-secret"))).await;

    let response = reqwest::Client::new()
        .post(format!("{}/telegram/webhook", server.base_url))
        .header("X-Telegram-Bot-Api-Secret-Token", "wrong")
        .json(&json!({"update_id": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = reqwest::Client::new()
        .post(format!("{}/telegram/webhook", server.base_url))
        .json(&json!({"update_id": 3}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn telegram_updates_without_content_are_ignored() {
    let harness = Harness::new();
    let server = serve(open_state(&harness, None)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/telegram/webhook", server.base_url))
        .json(&json!({"update_id": 4, "message": {"message_id": 1, "chat": {"id": 55}}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ignored");
    assert!(harness.classifier.calls().is_empty());
}
