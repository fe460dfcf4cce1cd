//! Per-chat state outside individual tasks: registration, recurring campaign
//! schedules, check-ins, brain dumps and the daily/weekly digests.

mod digests;
mod preferences;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::composer::{ComposeContext, MessageComposer};
use crate::gateway::{CallbackKind, SchedulingGateway};
use crate::intent::PreferenceKind;
use crate::kv_store::{get_json, set_json, KvStore, StoreError};
use crate::task_store::{TaskList, TaskStore};
use crate::time_normalizer::local_day_key;
use crate::transport::{MessageTransport, TransportError};

pub use preferences::{ClockTime, UserPreferences, WEEKLY_SUMMARY_DAY};

const CHATS_KEY: &str = "chats";
const AWAITING_CHECKIN_TTL: Duration = Duration::from_secs(3600);
const CHECKIN_TTL: Duration = Duration::from_secs(90 * 24 * 3600);
const BRAIN_DUMP_TTL: Duration = Duration::from_secs(30 * 24 * 3600);
const DELIVERED_MARKER_TTL: Duration = Duration::from_secs(36 * 3600);

fn prefs_key(chat_id: &str) -> String {
    format!("prefs:{}", chat_id)
}

fn awaiting_checkin_key(chat_id: &str) -> String {
    format!("awaiting_checkin:{}", chat_id)
}

pub(crate) fn checkin_key(chat_id: &str, day_key: &str) -> String {
    format!("checkin:{}:{}", chat_id, day_key)
}

pub(crate) fn brain_dump_key(chat_id: &str, day_key: &str) -> String {
    format!("braindump:{}:{}", chat_id, day_key)
}

fn delivered_key(chat_id: &str, kind: CallbackKind, day_key: &str) -> String {
    format!("delivered:{}:{}:{}", chat_id, kind.as_str(), day_key)
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid time {hour}:{minute:02}")]
    InvalidTime { hour: u32, minute: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinRecord {
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrainDump {
    pub items: Vec<String>,
}

/// Which recurring campaigns were (re)installed and which could not be.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub installed: Vec<CallbackKind>,
    pub failed: Vec<CallbackKind>,
}

impl ReconcileReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Human labels of the campaigns that failed to install.
    pub fn failed_labels(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|kind| preferences::campaign_label(*kind).to_string())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// The chat was seen for the first time.
    pub first_contact: bool,
    /// Campaigns this call tried to install. Empty when none were missing.
    pub report: ReconcileReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceUpdate {
    pub preferences: UserPreferences,
    pub report: ReconcileReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurringOutcome {
    Sent,
    /// Already delivered today; a redelivery of the same schedule tick.
    AlreadyDelivered,
    NotRecurring,
}

pub struct PreferenceCoordinator {
    kv: Arc<dyn KvStore>,
    tasks: Arc<TaskStore>,
    gateway: Arc<SchedulingGateway>,
    transport: Arc<dyn MessageTransport>,
    composer: Arc<dyn MessageComposer>,
}

impl PreferenceCoordinator {
    pub fn new(
        kv: Arc<dyn KvStore>,
        tasks: Arc<TaskStore>,
        gateway: Arc<SchedulingGateway>,
        transport: Arc<dyn MessageTransport>,
        composer: Arc<dyn MessageComposer>,
    ) -> Self {
        Self {
            kv,
            tasks,
            gateway,
            transport,
            composer,
        }
    }

    pub fn known_chats(&self) -> Result<Vec<String>, CoordinatorError> {
        Ok(self.kv.set_members(CHATS_KEY)?)
    }

    /// Records the chat and makes sure every recurring campaign has a live
    /// schedule. The first message installs the defaults; later messages
    /// retry whatever an earlier install could not set up.
    pub fn register_chat(&self, chat_id: &str) -> Result<Registration, CoordinatorError> {
        let first_contact = self.kv.add_to_set(CHATS_KEY, chat_id)?;
        let stored = self.preferences(chat_id)?;
        if stored.as_ref().is_some_and(UserPreferences::is_fully_scheduled) {
            return Ok(Registration {
                first_contact,
                report: ReconcileReport::default(),
            });
        }

        let mut prefs = stored.unwrap_or_default();
        let report = self.install_campaigns(chat_id, &mut prefs);
        set_json(self.kv.as_ref(), &prefs_key(chat_id), &prefs, None)?;
        if report.is_complete() {
            info!("installed {:?} for chat {}", report.installed, chat_id);
        } else {
            warn!(
                "chat {} still missing {:?} after install",
                chat_id, report.failed
            );
        }
        Ok(Registration {
            first_contact,
            report,
        })
    }

    pub fn preferences(&self, chat_id: &str) -> Result<Option<UserPreferences>, CoordinatorError> {
        Ok(get_json(self.kv.as_ref(), &prefs_key(chat_id))?)
    }

    /// Moves one recurring campaign to a new local time. Every schedule the
    /// old preferences reference is deleted before the new set is installed.
    pub fn update_schedule_preference(
        &self,
        chat_id: &str,
        setting: PreferenceKind,
        hour: u32,
        minute: u32,
    ) -> Result<PreferenceUpdate, CoordinatorError> {
        let time = ClockTime::new(hour, minute).ok_or(CoordinatorError::InvalidTime { hour, minute })?;
        let mut prefs = self.preferences(chat_id)?.unwrap_or_default();

        for (kind, _) in prefs.campaigns() {
            if let Some(schedule_id) = prefs.schedule_id(kind) {
                self.gateway.cancel_recurring(schedule_id);
            }
            prefs.set_schedule_id(kind, None);
        }

        prefs.set_time(setting, time);
        let report = self.install_campaigns(chat_id, &mut prefs);
        set_json(self.kv.as_ref(), &prefs_key(chat_id), &prefs, None)?;
        if !report.is_complete() {
            warn!(
                "chat {} {} moved to {} with {:?} not installed",
                chat_id,
                setting.label(),
                time.label(),
                report.failed
            );
        }
        Ok(PreferenceUpdate {
            preferences: prefs,
            report,
        })
    }

    /// Installs every campaign that has no schedule id yet.
    fn install_campaigns(&self, chat_id: &str, prefs: &mut UserPreferences) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for (kind, cron) in prefs.campaigns() {
            if prefs.schedule_id(kind).is_some() {
                continue;
            }
            match self.gateway.schedule_recurring(chat_id, &cron, kind) {
                Ok(schedule_id) => {
                    prefs.set_schedule_id(kind, Some(schedule_id));
                    report.installed.push(kind);
                }
                Err(err) => {
                    warn!("could not install {} for chat {}: {}", kind.as_str(), chat_id, err);
                    prefs.set_schedule_id(kind, None);
                    report.failed.push(kind);
                }
            }
        }
        report
    }

    pub fn handle_recurring_callback(
        &self,
        chat_id: &str,
        kind: CallbackKind,
    ) -> Result<RecurringOutcome, CoordinatorError> {
        self.handle_recurring_callback_at(chat_id, kind, Utc::now())
    }

    /// Sends one recurring digest or prompt, at most once per local day.
    pub fn handle_recurring_callback_at(
        &self,
        chat_id: &str,
        kind: CallbackKind,
        now: DateTime<Utc>,
    ) -> Result<RecurringOutcome, CoordinatorError> {
        if kind.is_task_campaign() {
            return Ok(RecurringOutcome::NotRecurring);
        }
        let marker = delivered_key(chat_id, kind, &local_day_key(now, self.tasks.timezone()));
        let claims = self.kv.incr(&marker)?;
        self.kv.expire(&marker, DELIVERED_MARKER_TTL)?;
        if claims > 1 {
            info!("{} for chat {} already delivered today", kind.as_str(), chat_id);
            return Ok(RecurringOutcome::AlreadyDelivered);
        }

        let result = self.deliver_recurring(chat_id, kind, now);
        if result.is_err() {
            // Let the transport's retry through.
            self.kv.delete(&marker)?;
        }
        result.map(|()| RecurringOutcome::Sent)
    }

    fn deliver_recurring(
        &self,
        chat_id: &str,
        kind: CallbackKind,
        now: DateTime<Utc>,
    ) -> Result<(), CoordinatorError> {
        let context = match kind {
            CallbackKind::DailyCheckin => {
                self.kv
                    .set(&awaiting_checkin_key(chat_id), "1", Some(AWAITING_CHECKIN_TTL))?;
                ComposeContext::CheckinPrompt
            }
            CallbackKind::WeeklySummary => self.weekly_summary_context_at(chat_id, now)?,
            CallbackKind::EndOfDay => self.end_of_day_context_at(chat_id, now)?,
            CallbackKind::MorningReview => self.morning_review_context_at(chat_id, now)?,
            CallbackKind::Reminder | CallbackKind::Nag | CallbackKind::FollowUp => return Ok(()),
        };
        self.send(chat_id, &context)?;
        debug!("sent {} to chat {}", kind.as_str(), chat_id);
        Ok(())
    }

    pub fn is_awaiting_checkin(&self, chat_id: &str) -> Result<bool, CoordinatorError> {
        Ok(self.kv.get(&awaiting_checkin_key(chat_id))?.is_some())
    }

    pub fn record_checkin(
        &self,
        chat_id: &str,
        rating: u8,
        note: Option<String>,
    ) -> Result<CheckinRecord, CoordinatorError> {
        self.record_checkin_at(chat_id, rating, note, Utc::now())
    }

    /// Stores today's rating (clamped to 1..=5) and clears the prompt flag.
    pub fn record_checkin_at(
        &self,
        chat_id: &str,
        rating: u8,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CheckinRecord, CoordinatorError> {
        let record = CheckinRecord {
            rating: rating.clamp(1, 5),
            note: note.filter(|note| !note.trim().is_empty()),
            recorded_at: now,
        };
        let day = local_day_key(now, self.tasks.timezone());
        set_json(
            self.kv.as_ref(),
            &checkin_key(chat_id, &day),
            &record,
            Some(CHECKIN_TTL),
        )?;
        self.kv.delete(&awaiting_checkin_key(chat_id))?;
        Ok(record)
    }

    pub fn checkin_on(&self, chat_id: &str, day_key: &str) -> Result<Option<CheckinRecord>, CoordinatorError> {
        Ok(get_json(self.kv.as_ref(), &checkin_key(chat_id, day_key))?)
    }

    pub fn save_brain_dump(&self, chat_id: &str, items: &[String]) -> Result<TaskList, CoordinatorError> {
        self.save_brain_dump_at(chat_id, items, Utc::now())
    }

    /// Appends to today's brain dump and files the items in the inbox.
    /// Returns the updated inbox.
    pub fn save_brain_dump_at(
        &self,
        chat_id: &str,
        items: &[String],
        now: DateTime<Utc>,
    ) -> Result<TaskList, CoordinatorError> {
        let items = clean_items(items);
        let key = brain_dump_key(chat_id, &local_day_key(now, self.tasks.timezone()));
        let mut dump: BrainDump = get_json(self.kv.as_ref(), &key)?.unwrap_or_default();
        dump.items.extend(items.iter().cloned());
        set_json(self.kv.as_ref(), &key, &dump, Some(BRAIN_DUMP_TTL))?;
        self.add_inbox_items(chat_id, &items)
    }

    pub fn brain_dump_on(&self, chat_id: &str, day_key: &str) -> Result<Option<BrainDump>, CoordinatorError> {
        Ok(get_json(self.kv.as_ref(), &brain_dump_key(chat_id, day_key))?)
    }

    pub fn add_inbox_items(&self, chat_id: &str, items: &[String]) -> Result<TaskList, CoordinatorError> {
        let inbox = self.tasks.inbox(chat_id)?;
        let items = clean_items(items);
        if items.is_empty() {
            return Ok(inbox);
        }
        Ok(self
            .tasks
            .add_list_items(chat_id, &inbox.id, &items)?
            .unwrap_or(inbox))
    }

    fn send(&self, chat_id: &str, context: &ComposeContext) -> Result<(), CoordinatorError> {
        let text = self.composer.compose(context);
        self.transport.send(chat_id, &text)?;
        Ok(())
    }
}

fn clean_items(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
