use chrono::Weekday;
use std::sync::Arc;

use super::*;
use crate::testing::{DeliveryCall, RecordingDelivery, TEST_TIMEZONE};

fn gateway() -> (Arc<RecordingDelivery>, SchedulingGateway) {
    let delivery = Arc::new(RecordingDelivery::new());
    let gateway = SchedulingGateway::new(delivery.clone(), TEST_TIMEZONE, SigningKeys::default());
    (delivery, gateway)
}

#[test]
fn payload_uses_callback_wire_names() {
    let payload = CallbackPayload {
        chat_id: "42".to_string(),
        task_id: Some("t-1".to_string()),
        kind: CallbackKind::FollowUp,
    };
    let raw = serde_json::to_value(&payload).unwrap();
    assert_eq!(
        raw,
        serde_json::json!({"chatId": "42", "taskId": "t-1", "type": "follow_up"})
    );

    let recurring: CallbackPayload =
        serde_json::from_str(r#"{"chatId":"42","type":"morning_review"}"#).unwrap();
    assert_eq!(recurring.kind, CallbackKind::MorningReview);
    assert!(recurring.task_id.is_none());
    assert!(!recurring.kind.is_task_campaign());

    assert!(serde_json::from_str::<CallbackPayload>(r#"{"chatId":"42","type":"bogus"}"#).is_err());
}

#[test]
fn cron_expressions_bind_timezone_and_weekday() {
    let daily = CronSpec::daily(20, 0);
    assert_eq!(
        daily.qstash_expression(TEST_TIMEZONE),
        "CRON_TZ=America/New_York 0 20 * * *"
    );
    assert_eq!(daily.six_field_expression(), "0 0 20 * * *");

    let weekly = CronSpec::weekly(Weekday::Sun, 21, 30);
    assert_eq!(
        weekly.qstash_expression(TEST_TIMEZONE),
        "CRON_TZ=America/New_York 30 21 * * 0"
    );
    assert_eq!(weekly.six_field_expression(), "0 30 21 * * Sun");
}

#[test]
fn one_shot_clamps_negative_delay() {
    let (delivery, gateway) = gateway();
    let id = gateway
        .schedule_one_shot("42", Some("t-1"), -15, CallbackKind::Reminder)
        .unwrap();

    let published = delivery.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].id, id);
    assert_eq!(published[0].delay, Duration::ZERO);
    assert_eq!(published[0].payload.task_id.as_deref(), Some("t-1"));
}

#[test]
fn recurring_schedule_has_no_task() {
    let (delivery, gateway) = gateway();
    let id = gateway
        .schedule_recurring("42", &CronSpec::daily(8, 0), CallbackKind::MorningReview)
        .unwrap();

    let schedules = delivery.live_schedules();
    assert_eq!(schedules.len(), 1);
    assert_eq!(schedules[0].id, id);
    assert!(schedules[0].payload.task_id.is_none());
    assert_eq!(schedules[0].cron, CronSpec::daily(8, 0));
}

#[test]
fn scheduling_errors_propagate() {
    let (delivery, gateway) = gateway();
    delivery.set_failing(true);
    assert!(gateway
        .schedule_one_shot("42", None, 5, CallbackKind::Nag)
        .is_err());
    assert!(gateway
        .schedule_recurring("42", &CronSpec::daily(8, 0), CallbackKind::EndOfDay)
        .is_err());
}

#[test]
fn cancelling_is_best_effort() {
    let (delivery, gateway) = gateway();
    let id = gateway
        .schedule_one_shot("42", Some("t-1"), 5, CallbackKind::Reminder)
        .unwrap();

    gateway.cancel_one_shot(&id);
    gateway.cancel_one_shot(&id);
    gateway.cancel_recurring("scd_missing");

    assert!(delivery.live_messages().is_empty());
    assert_eq!(
        delivery.calls()[1..].to_vec(),
        vec![
            DeliveryCall::CancelMessage(id.clone()),
            DeliveryCall::CancelMessage(id),
            DeliveryCall::DeleteSchedule("scd_missing".to_string()),
        ]
    );
}

#[test]
fn inbound_signature_is_checked_against_keys() {
    let (_, open) = gateway();
    assert!(open.verify_inbound_signature(None, b"{}"));

    let delivery = Arc::new(RecordingDelivery::new());
    let locked = SchedulingGateway::new(
        delivery,
        TEST_TIMEZONE,
        SigningKeys::new(Some("sig_current".to_string()), None),
    );
    assert!(!locked.verify_inbound_signature(None, b"{}"));
    assert!(!locked.verify_inbound_signature(Some("not-a-jwt"), b"{}"));
}
