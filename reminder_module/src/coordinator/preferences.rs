use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::gateway::{CallbackKind, CronSpec};
use crate::intent::PreferenceKind;

/// The weekly summary goes out on this day, at the check-in time.
pub const WEEKLY_SUMMARY_DAY: Weekday = Weekday::Sun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
}

impl ClockTime {
    /// `None` unless the pair is a valid wall-clock time.
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(|_| Self { hour, minute })
    }

    /// "8:00 PM"
    pub fn label(&self) -> String {
        let suffix = if self.hour < 12 { "AM" } else { "PM" };
        let hour = match self.hour % 12 {
            0 => 12,
            other => other,
        };
        format!("{}:{:02} {}", hour, self.minute, suffix)
    }
}

/// Recurring-campaign times for a chat plus the external schedule ids that
/// currently implement them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    pub checkin_time: ClockTime,
    pub morning_review_time: ClockTime,
    pub end_of_day_time: ClockTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkin_schedule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_summary_schedule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_of_day_schedule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub morning_review_schedule_id: Option<String>,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            checkin_time: ClockTime { hour: 20, minute: 0 },
            morning_review_time: ClockTime { hour: 8, minute: 0 },
            end_of_day_time: ClockTime { hour: 21, minute: 30 },
            checkin_schedule_id: None,
            weekly_summary_schedule_id: None,
            end_of_day_schedule_id: None,
            morning_review_schedule_id: None,
        }
    }
}

impl UserPreferences {
    pub fn set_time(&mut self, setting: PreferenceKind, time: ClockTime) {
        match setting {
            PreferenceKind::Checkin => self.checkin_time = time,
            PreferenceKind::MorningReview => self.morning_review_time = time,
            PreferenceKind::EndOfDay => self.end_of_day_time = time,
        }
    }

    /// Every recurring campaign with the cron it should run on.
    pub fn campaigns(&self) -> [(CallbackKind, CronSpec); 4] {
        let checkin = self.checkin_time;
        [
            (
                CallbackKind::DailyCheckin,
                CronSpec::daily(checkin.hour, checkin.minute),
            ),
            (
                CallbackKind::WeeklySummary,
                CronSpec::weekly(WEEKLY_SUMMARY_DAY, checkin.hour, checkin.minute),
            ),
            (
                CallbackKind::EndOfDay,
                CronSpec::daily(self.end_of_day_time.hour, self.end_of_day_time.minute),
            ),
            (
                CallbackKind::MorningReview,
                CronSpec::daily(self.morning_review_time.hour, self.morning_review_time.minute),
            ),
        ]
    }

    pub fn schedule_id(&self, kind: CallbackKind) -> Option<&str> {
        match kind {
            CallbackKind::DailyCheckin => self.checkin_schedule_id.as_deref(),
            CallbackKind::WeeklySummary => self.weekly_summary_schedule_id.as_deref(),
            CallbackKind::EndOfDay => self.end_of_day_schedule_id.as_deref(),
            CallbackKind::MorningReview => self.morning_review_schedule_id.as_deref(),
            CallbackKind::Reminder | CallbackKind::Nag | CallbackKind::FollowUp => None,
        }
    }

    pub fn is_fully_scheduled(&self) -> bool {
        self.campaigns()
            .iter()
            .all(|(kind, _)| self.schedule_id(*kind).is_some())
    }

    pub(super) fn set_schedule_id(&mut self, kind: CallbackKind, id: Option<String>) {
        match kind {
            CallbackKind::DailyCheckin => self.checkin_schedule_id = id,
            CallbackKind::WeeklySummary => self.weekly_summary_schedule_id = id,
            CallbackKind::EndOfDay => self.end_of_day_schedule_id = id,
            CallbackKind::MorningReview => self.morning_review_schedule_id = id,
            CallbackKind::Reminder | CallbackKind::Nag | CallbackKind::FollowUp => {}
        }
    }
}

pub(super) fn campaign_label(kind: CallbackKind) -> &'static str {
    match kind {
        CallbackKind::DailyCheckin => "daily check-in",
        CallbackKind::WeeklySummary => "weekly summary",
        CallbackKind::EndOfDay => "end-of-day wrap-up",
        CallbackKind::MorningReview => "morning review",
        CallbackKind::Reminder => "reminder",
        CallbackKind::Nag => "nag",
        CallbackKind::FollowUp => "follow-up",
    }
}
