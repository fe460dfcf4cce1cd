//! Delayed-delivery scheduling behind an at-least-once transport.
//!
//! Callbacks may arrive twice, late, or after they were cancelled. Nothing in
//! this module tries to prevent that; handlers re-check persisted state.

mod local;
mod qstash;
mod signature;

use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::time_normalizer::clamp_delay_minutes;

pub use local::{JobSchedule, LocalJob, LocalScheduler};
pub use qstash::{QstashClient, DEFAULT_QSTASH_URL};
pub use signature::SigningKeys;

/// Campaign kinds routed to the single callback endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    Reminder,
    Nag,
    FollowUp,
    DailyCheckin,
    WeeklySummary,
    EndOfDay,
    MorningReview,
}

impl CallbackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CallbackKind::Reminder => "reminder",
            CallbackKind::Nag => "nag",
            CallbackKind::FollowUp => "follow_up",
            CallbackKind::DailyCheckin => "daily_checkin",
            CallbackKind::WeeklySummary => "weekly_summary",
            CallbackKind::EndOfDay => "end_of_day",
            CallbackKind::MorningReview => "morning_review",
        }
    }

    pub fn is_task_campaign(self) -> bool {
        matches!(
            self,
            CallbackKind::Reminder | CallbackKind::Nag | CallbackKind::FollowUp
        )
    }
}

/// Body of every scheduled callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(rename = "taskId", default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: CallbackKind,
}

/// Wall-clock recurrence, optionally pinned to one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronSpec {
    pub hour: u32,
    pub minute: u32,
    pub weekday: Option<Weekday>,
}

impl CronSpec {
    pub fn daily(hour: u32, minute: u32) -> Self {
        Self {
            hour,
            minute,
            weekday: None,
        }
    }

    pub fn weekly(weekday: Weekday, hour: u32, minute: u32) -> Self {
        Self {
            hour,
            minute,
            weekday: Some(weekday),
        }
    }

    /// Five-field cron with the zone bound: `CRON_TZ=America/New_York 0 20 * * *`.
    pub fn qstash_expression(&self, timezone: Tz) -> String {
        let weekday = self
            .weekday
            .map(|day| day.num_days_from_sunday().to_string())
            .unwrap_or_else(|| "*".to_string());
        format!(
            "CRON_TZ={} {} {} * * {}",
            timezone.name(),
            self.minute,
            self.hour,
            weekday
        )
    }

    /// Six-field form (leading seconds) understood by the `cron` crate.
    pub fn six_field_expression(&self) -> String {
        let weekday = self
            .weekday
            .map(weekday_abbrev)
            .unwrap_or("*");
        format!("0 {} {} * * {}", self.minute, self.hour, weekday)
    }
}

fn weekday_abbrev(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("scheduler api error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("scheduled delivery not found: {0}")]
    NotFound(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cron parse error: {0}")]
    Cron(#[from] cron::error::Error),
    #[error("no next run available for cron expression {0}")]
    NoNextRun(String),
    #[error("delivery backend unavailable: {0}")]
    Unavailable(String),
}

/// The external delayed-delivery mechanism.
pub trait DelayedDelivery: Send + Sync {
    /// Returns the id of the scheduled message.
    fn publish_delayed(
        &self,
        payload: &CallbackPayload,
        delay: Duration,
    ) -> Result<String, DeliveryError>;
    /// Returns the id of the recurring schedule.
    fn create_schedule(
        &self,
        payload: &CallbackPayload,
        cron: &CronSpec,
        timezone: Tz,
    ) -> Result<String, DeliveryError>;
    fn cancel_message(&self, message_id: &str) -> Result<(), DeliveryError>;
    fn delete_schedule(&self, schedule_id: &str) -> Result<(), DeliveryError>;
}

pub struct SchedulingGateway {
    delivery: Arc<dyn DelayedDelivery>,
    timezone: Tz,
    signing_keys: SigningKeys,
}

impl SchedulingGateway {
    pub fn new(delivery: Arc<dyn DelayedDelivery>, timezone: Tz, signing_keys: SigningKeys) -> Self {
        Self {
            delivery,
            timezone,
            signing_keys,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn schedule_one_shot(
        &self,
        chat_id: &str,
        task_id: Option<&str>,
        delay_minutes: i64,
        kind: CallbackKind,
    ) -> Result<String, DeliveryError> {
        let payload = CallbackPayload {
            chat_id: chat_id.to_string(),
            task_id: task_id.map(str::to_string),
            kind,
        };
        let minutes = clamp_delay_minutes(delay_minutes).max(0);
        let delay = Duration::from_secs(u64::try_from(minutes).unwrap_or(0) * 60);
        let message_id = self.delivery.publish_delayed(&payload, delay)?;
        info!(
            "scheduled {} callback for chat {} in {}m as {}",
            kind.as_str(),
            chat_id,
            minutes,
            message_id
        );
        Ok(message_id)
    }

    pub fn schedule_recurring(
        &self,
        chat_id: &str,
        cron: &CronSpec,
        kind: CallbackKind,
    ) -> Result<String, DeliveryError> {
        let payload = CallbackPayload {
            chat_id: chat_id.to_string(),
            task_id: None,
            kind,
        };
        let schedule_id = self.delivery.create_schedule(&payload, cron, self.timezone)?;
        info!(
            "installed {} schedule {} for chat {} ({})",
            kind.as_str(),
            schedule_id,
            chat_id,
            cron.qstash_expression(self.timezone)
        );
        Ok(schedule_id)
    }

    /// Best effort: an already-delivered or unknown message is not an error.
    pub fn cancel_one_shot(&self, message_id: &str) {
        match self.delivery.cancel_message(message_id) {
            Ok(()) => debug!("cancelled scheduled message {}", message_id),
            Err(DeliveryError::NotFound(_)) => {
                debug!("scheduled message {} already gone", message_id)
            }
            Err(err) => warn!("failed to cancel scheduled message {}: {}", message_id, err),
        }
    }

    /// Best effort, like `cancel_one_shot`.
    pub fn cancel_recurring(&self, schedule_id: &str) {
        match self.delivery.delete_schedule(schedule_id) {
            Ok(()) => debug!("deleted schedule {}", schedule_id),
            Err(DeliveryError::NotFound(_)) => debug!("schedule {} already gone", schedule_id),
            Err(err) => warn!("failed to delete schedule {}: {}", schedule_id, err),
        }
    }

    /// Accepts everything when no signing keys are configured.
    pub fn verify_inbound_signature(&self, signature: Option<&str>, body: &[u8]) -> bool {
        match self.signing_keys.verify(signature, body) {
            Ok(()) => true,
            Err(reason) => {
                warn!("rejected inbound callback: {}", reason);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests;
