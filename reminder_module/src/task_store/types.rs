use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
}

/// Where a task's notification campaign currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignPhase {
    /// Day-only task; never notified.
    DayOnly,
    /// Initial reminder callback outstanding.
    Scheduled,
    /// Reminder delivered; no nag ladder runs.
    ReminderSent,
    /// A nag callback is outstanding.
    Nagging,
    /// Nag ladder exhausted; task stays pending with nothing outstanding.
    FinalNagSent,
    /// The scheduler could not be reached; nothing will fire.
    ScheduleFailed,
    /// Task completed.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub chat_id: String,
    pub content: String,
    pub is_important: bool,
    pub is_day_only: bool,
    pub nagging_level: u32,
    pub next_reminder: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qstash_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_list_id: Option<String>,
    pub status: TaskStatus,
    pub campaign: CampaignPhase,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }
}

/// Input to `TaskStore::create_task`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub content: String,
    pub is_important: bool,
    pub delay_minutes: i64,
    pub is_day_only: bool,
}

/// Result of a fuzzy task lookup.
///
/// `Fallback` means nothing matched the description and the most recently
/// scheduled pending task was picked instead; treat it as a guess.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskMatch {
    Matched(Task),
    Fallback(Task),
}

impl TaskMatch {
    pub fn task(&self) -> &Task {
        match self {
            TaskMatch::Matched(task) | TaskMatch::Fallback(task) => task,
        }
    }

    pub fn into_task(self) -> Task {
        match self {
            TaskMatch::Matched(task) | TaskMatch::Fallback(task) => task,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, TaskMatch::Fallback(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
    pub id: String,
    pub content: String,
    pub is_checked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskList {
    pub id: String,
    pub chat_id: String,
    pub name: String,
    pub items: Vec<ListItem>,
    pub status: ListStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskList {
    pub fn unchecked_items(&self) -> impl Iterator<Item = &ListItem> {
        self.items.iter().filter(|item| !item.is_checked)
    }
}

/// A list after an item-level edit, with the item contents that were touched.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEdit {
    pub list: TaskList,
    pub affected: Vec<String>,
}
