use chrono::{DateTime, Duration, Utc};
use std::thread;

use super::{CoordinatorError, PreferenceCoordinator};
use crate::composer::{ComposeContext, TaskLine};
use crate::task_store::Task;
use crate::time_normalizer::{format_due, format_elapsed_or_future, local_day_bounds, local_day_key};

const SUMMARY_DAYS: i64 = 7;

impl PreferenceCoordinator {
    /// Completions and check-in ratings over the seven local days ending today.
    pub fn weekly_summary_context_at(
        &self,
        chat_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ComposeContext, CoordinatorError> {
        let timezone = self.tasks.timezone();
        let mut completed = 0;
        let mut best: Option<(i64, DateTime<Utc>)> = None;
        let mut ratings = Vec::new();

        for offset in 0..SUMMARY_DAYS {
            let day = now - Duration::days(offset);
            let key = local_day_key(day, timezone);
            let count = self.tasks.completions_on(chat_id, &key)?;
            completed += count;
            if count > 0 && best.map_or(true, |(top, _)| count > top) {
                best = Some((count, day));
            }
            if let Some(record) = self.checkin_on(chat_id, &key)? {
                ratings.push(f64::from(record.rating));
            }
        }

        let average_rating = if ratings.is_empty() {
            None
        } else {
            Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
        };
        Ok(ComposeContext::WeeklySummary {
            completed,
            best_day: best.map(|(_, day)| day.with_timezone(&timezone).format("%A").to_string()),
            average_rating,
            checkins: ratings.len(),
        })
    }

    pub fn end_of_day_context_at(
        &self,
        chat_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ComposeContext, CoordinatorError> {
        let timezone = self.tasks.timezone();
        let completed_today = self
            .tasks
            .completions_on(chat_id, &local_day_key(now, timezone))?;
        let still_pending = self
            .tasks
            .get_todays_tasks_at(chat_id, now)?
            .iter()
            .map(|task| self.due_line(task, now))
            .collect();
        Ok(ComposeContext::EndOfDay {
            completed_today,
            still_pending,
        })
    }

    /// Today's tasks, tasks overdue from before today, and open inbox items.
    /// The three reads are independent and run side by side.
    pub fn morning_review_context_at(
        &self,
        chat_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ComposeContext, CoordinatorError> {
        let (today, overdue, inbox) = thread::scope(|scope| {
            let today = scope.spawn(|| self.tasks.get_todays_tasks_at(chat_id, now));
            let overdue = scope.spawn(|| self.tasks.get_overdue_tasks_at(chat_id, now));
            let inbox = self.tasks.inbox(chat_id);
            (join(today), join(overdue), inbox)
        });
        let (start_of_day, _) = local_day_bounds(now, self.tasks.timezone());

        let today = today?.iter().map(|task| self.due_line(task, now)).collect();
        let overdue = overdue?
            .iter()
            .filter(|task| task.next_reminder < start_of_day)
            .map(|task| TaskLine {
                content: task.content.clone(),
                due: format_elapsed_or_future(task.next_reminder, now),
                is_important: task.is_important,
            })
            .collect();
        let inbox = inbox?
            .unchecked_items()
            .map(|item| item.content.clone())
            .collect();
        Ok(ComposeContext::MorningReview {
            today,
            overdue,
            inbox,
        })
    }

    fn due_line(&self, task: &Task, now: DateTime<Utc>) -> TaskLine {
        TaskLine {
            content: task.content.clone(),
            due: format_due(task.next_reminder, task.is_day_only, self.tasks.timezone(), now),
            is_important: task.is_important,
        }
    }
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    handle
        .join()
        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}
