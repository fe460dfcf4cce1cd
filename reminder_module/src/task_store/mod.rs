//! Task and checklist records plus the per-chat pending index.

mod lists;
mod matching;
mod types;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::kv_store::{get_json, set_json, KvStore, StoreError};
use crate::time_normalizer::{instant_after, local_day_bounds, local_day_key, normalize_day_only};

pub use matching::{descriptions_match, normalize_description};
pub use types::{
    CampaignPhase, ListEdit, ListItem, ListStatus, NewTask, Task, TaskList, TaskMatch, TaskStatus,
};

/// Completion counters only feed the weekly summary.
const COMPLETION_COUNTER_TTL: std::time::Duration = std::time::Duration::from_secs(8 * 24 * 3600);

pub(crate) fn task_key(chat_id: &str, task_id: &str) -> String {
    format!("task:{}:{}", chat_id, task_id)
}

pub(crate) fn pending_index_key(chat_id: &str) -> String {
    format!("tasks:{}:pending", chat_id)
}

pub(crate) fn completion_counter_key(chat_id: &str, day_key: &str) -> String {
    format!("completed:{}:{}", chat_id, day_key)
}

pub struct TaskStore {
    kv: Arc<dyn KvStore>,
    timezone: Tz,
}

impl TaskStore {
    pub fn new(kv: Arc<dyn KvStore>, timezone: Tz) -> Self {
        Self { kv, timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn create_task(&self, chat_id: &str, new_task: &NewTask) -> Result<Task, StoreError> {
        self.create_task_at(chat_id, new_task, Utc::now())
    }

    pub fn create_task_at(
        &self,
        chat_id: &str,
        new_task: &NewTask,
        now: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        let next_reminder = if new_task.is_day_only {
            normalize_day_only(new_task.delay_minutes, self.timezone, now)
        } else {
            instant_after(now, new_task.delay_minutes)
        };
        let task = Task {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            content: new_task.content.trim().to_string(),
            is_important: new_task.is_important,
            is_day_only: new_task.is_day_only,
            nagging_level: 0,
            next_reminder,
            qstash_message_id: None,
            linked_list_id: None,
            status: TaskStatus::Pending,
            campaign: if new_task.is_day_only {
                CampaignPhase::DayOnly
            } else {
                CampaignPhase::Scheduled
            },
            created_at: now,
            completed_at: None,
        };
        self.save_task(&task)?;
        self.kv.add_to_set(&pending_index_key(chat_id), &task.id)?;
        Ok(task)
    }

    pub fn get_task(&self, chat_id: &str, task_id: &str) -> Result<Option<Task>, StoreError> {
        get_json(self.kv.as_ref(), &task_key(chat_id, task_id))
    }

    pub fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        set_json(self.kv.as_ref(), &task_key(&task.chat_id, &task.id), task, None)
    }

    pub fn complete_task(&self, chat_id: &str, task_id: &str) -> Result<Option<Task>, StoreError> {
        self.complete_task_at(chat_id, task_id, Utc::now())
    }

    /// Marks the task completed and completes its linked list, if any.
    /// Returns `None` when the task no longer exists.
    pub fn complete_task_at(
        &self,
        chat_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, StoreError> {
        let Some(mut task) = self.get_task(chat_id, task_id)? else {
            self.kv.remove_from_set(&pending_index_key(chat_id), task_id)?;
            return Ok(None);
        };
        let was_pending = task.is_pending();
        task.status = TaskStatus::Completed;
        task.campaign = CampaignPhase::Closed;
        task.qstash_message_id = None;
        task.completed_at.get_or_insert(now);
        self.save_task(&task)?;
        self.kv.remove_from_set(&pending_index_key(chat_id), task_id)?;

        if was_pending {
            let counter = completion_counter_key(chat_id, &local_day_key(now, self.timezone));
            self.kv.incr(&counter)?;
            self.kv.expire(&counter, COMPLETION_COUNTER_TTL)?;
        }

        if let Some(list_id) = task.linked_list_id.as_deref() {
            if self.complete_list(chat_id, list_id)?.is_none() {
                debug!("task {} references missing list {}", task_id, list_id);
            }
        }
        Ok(Some(task))
    }

    /// Hard delete used for cancellation. A linked list is unlinked, not deleted.
    pub fn delete_task(&self, chat_id: &str, task_id: &str) -> Result<Option<Task>, StoreError> {
        let existing = self.get_task(chat_id, task_id)?;
        if let Some(list_id) = existing.as_ref().and_then(|task| task.linked_list_id.as_deref()) {
            self.clear_list_link(chat_id, list_id, task_id)?;
        }
        self.kv.delete(&task_key(chat_id, task_id))?;
        self.kv.remove_from_set(&pending_index_key(chat_id), task_id)?;
        Ok(existing)
    }

    /// Pending tasks ordered by `next_reminder`, oldest first. Index entries
    /// whose record is gone or no longer pending are skipped.
    pub fn get_pending_tasks(&self, chat_id: &str) -> Result<Vec<Task>, StoreError> {
        let ids = self.kv.set_members(&pending_index_key(chat_id))?;
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_task(chat_id, &id)? {
                Some(task) if task.is_pending() => tasks.push(task),
                Some(_) => debug!("pending index holds non-pending task {}", id),
                None => debug!("pending index holds missing task {}", id),
            }
        }
        tasks.sort_by(|a, b| {
            a.next_reminder
                .cmp(&b.next_reminder)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(tasks)
    }

    pub fn find_task_by_description(
        &self,
        chat_id: &str,
        description: Option<&str>,
    ) -> Result<Option<TaskMatch>, StoreError> {
        let pending = self.get_pending_tasks(chat_id)?;
        Ok(select_task(pending, description))
    }

    /// Union of the tasks matched by each description, without the fallback.
    pub fn find_tasks_by_descriptions(
        &self,
        chat_id: &str,
        descriptions: &[String],
    ) -> Result<Vec<Task>, StoreError> {
        let pending = self.get_pending_tasks(chat_id)?;
        let normalized: Vec<(String, Task)> = pending
            .into_iter()
            .map(|task| (normalize_description(&task.content), task))
            .collect();
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for description in descriptions {
            let query = normalize_description(description);
            for (content, task) in &normalized {
                if matching::normalized_match(&query, content) && seen.insert(task.id.clone()) {
                    hits.push(task.clone());
                }
            }
        }
        Ok(hits)
    }

    pub fn get_overdue_tasks(&self, chat_id: &str) -> Result<Vec<Task>, StoreError> {
        self.get_overdue_tasks_at(chat_id, Utc::now())
    }

    pub fn get_overdue_tasks_at(
        &self,
        chat_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .get_pending_tasks(chat_id)?
            .into_iter()
            .filter(|task| task.next_reminder < now)
            .collect())
    }

    pub fn get_todays_tasks(&self, chat_id: &str) -> Result<Vec<Task>, StoreError> {
        self.get_todays_tasks_at(chat_id, Utc::now())
    }

    /// Pending tasks, day-only or timed, whose trigger falls on today's local date.
    pub fn get_todays_tasks_at(
        &self,
        chat_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>, StoreError> {
        let (start, end) = local_day_bounds(now, self.timezone);
        Ok(self
            .get_pending_tasks(chat_id)?
            .into_iter()
            .filter(|task| task.next_reminder >= start && task.next_reminder < end)
            .collect())
    }

    /// Tasks completed on the given local day (`YYYY-MM-DD`).
    pub fn completions_on(&self, chat_id: &str, day_key: &str) -> Result<i64, StoreError> {
        let raw = self.kv.get(&completion_counter_key(chat_id, day_key))?;
        Ok(raw
            .and_then(|value| value.trim().parse::<i64>().ok())
            .unwrap_or(0))
    }
}

fn select_task(pending: Vec<Task>, description: Option<&str>) -> Option<TaskMatch> {
    let query = description.map(normalize_description).unwrap_or_default();
    if !query.is_empty() {
        // Latest-scheduled match wins when several tasks contain the phrase.
        if let Some(task) = pending
            .iter()
            .rev()
            .find(|task| matching::normalized_match(&query, &normalize_description(&task.content)))
        {
            return Some(TaskMatch::Matched(task.clone()));
        }
    }
    pending.into_iter().last().map(TaskMatch::Fallback)
}

#[cfg(test)]
mod tests;
