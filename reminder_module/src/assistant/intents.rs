use chrono::{DateTime, Utc};

use super::{Assistant, AssistantError};
use crate::campaign::PendingFollowUp;
use crate::composer::{ComposeContext, CreatedReminder, ListChange, ShownItem, TaskLine};
use crate::coordinator::{ClockTime, CoordinatorError};
use crate::intent::{Intent, ListAction, PreferenceKind, ReminderRequest, TaskFilter};
use crate::task_store::{CampaignPhase, NewTask, Task, TaskMatch};
use crate::time_normalizer::{
    clamp_delay_minutes, format_day_label, format_due, format_elapsed_or_future,
};

pub(super) fn apply(
    assistant: &Assistant,
    chat_id: &str,
    intent: Intent,
    text: &str,
    answered: Option<&PendingFollowUp>,
    now: DateTime<Utc>,
) -> Result<ComposeContext, AssistantError> {
    match intent {
        Intent::Reminder(request) => create_reminders(assistant, chat_id, &[request], now),
        Intent::MultiReminder { reminders } => create_reminders(assistant, chat_id, &reminders, now),
        Intent::BrainDump { items } => {
            assistant.coordinator.save_brain_dump_at(chat_id, &items, now)?;
            Ok(ComposeContext::BrainDumpSaved { items })
        }
        Intent::InboxItem { items } => {
            let inbox = assistant.coordinator.add_inbox_items(chat_id, &items)?;
            Ok(ComposeContext::InboxUpdated {
                added: items,
                unchecked_total: inbox.unchecked_items().count(),
            })
        }
        Intent::MarkDone { descriptions } => mark_done(assistant, chat_id, &descriptions, answered, now),
        Intent::Cancel { description } => cancel(assistant, chat_id, description),
        Intent::ListTasks { filter } => list_tasks(assistant, chat_id, filter, now),
        Intent::ListMutation(action) => apply_list_action(assistant, chat_id, action, now),
        Intent::CheckinResponse { rating, note } => {
            let record = assistant
                .coordinator
                .record_checkin_at(chat_id, rating, note, now)?;
            Ok(ComposeContext::CheckinRecorded {
                rating: record.rating,
            })
        }
        Intent::PreferenceChange {
            setting,
            hour,
            minute,
        } => change_preference(assistant, chat_id, setting, hour, minute),
        Intent::Conversation { reply } => Ok(ComposeContext::Conversation {
            user_text: text.to_string(),
            reply,
        }),
    }
}

fn create_reminders(
    assistant: &Assistant,
    chat_id: &str,
    requests: &[ReminderRequest],
    now: DateTime<Utc>,
) -> Result<ComposeContext, AssistantError> {
    let timezone = assistant.campaign.tasks().timezone();
    let mut reminders = Vec::with_capacity(requests.len());
    for request in requests.iter().filter(|request| !request.content.trim().is_empty()) {
        let task = assistant.campaign.schedule_new_task_at(
            chat_id,
            &NewTask {
                content: request.content.clone(),
                is_important: request.is_important,
                delay_minutes: clamp_delay_minutes(request.delay_minutes),
                is_day_only: request.is_day_only,
            },
            now,
        )?;
        let when = if task.is_day_only {
            format_day_label(task.next_reminder, timezone, now)
        } else {
            format!(
                "{}, {}",
                format_due(task.next_reminder, false, timezone, now),
                format_elapsed_or_future(task.next_reminder, now)
            )
        };
        reminders.push(CreatedReminder {
            content: task.content.clone(),
            when,
            is_day_only: task.is_day_only,
            is_important: task.is_important,
            notification_failed: task.campaign == CampaignPhase::ScheduleFailed,
        });
    }
    Ok(ComposeContext::RemindersCreated { reminders })
}

/// Resolves which tasks "done" refers to. Without a description the task
/// whose reminder the user is answering wins; otherwise the fuzzy lookup
/// decides and a fallback pick is reported as a guess.
fn mark_done(
    assistant: &Assistant,
    chat_id: &str,
    descriptions: &[String],
    answered: Option<&PendingFollowUp>,
    now: DateTime<Utc>,
) -> Result<ComposeContext, AssistantError> {
    let tasks = assistant.campaign.tasks();
    let descriptions: Vec<String> = descriptions
        .iter()
        .filter(|description| !description.trim().is_empty())
        .cloned()
        .collect();

    let (targets, guessed): (Vec<Task>, bool) = if descriptions.is_empty() {
        let answered_task = match answered {
            Some(record) => tasks
                .get_task(chat_id, &record.task_id)?
                .filter(Task::is_pending),
            None => None,
        };
        match answered_task {
            Some(task) => (vec![task], false),
            None => {
                let pending = tasks.get_pending_tasks(chat_id)?.len();
                match tasks.find_task_by_description(chat_id, None)? {
                    Some(found) => (vec![found.into_task()], pending > 1),
                    None => return Ok(ComposeContext::TaskNotFound { query: None }),
                }
            }
        }
    } else {
        let matched = tasks.find_tasks_by_descriptions(chat_id, &descriptions)?;
        if matched.is_empty() {
            match tasks.find_task_by_description(chat_id, descriptions.first().map(String::as_str))? {
                Some(found) => (vec![found.into_task()], true),
                None => {
                    return Ok(ComposeContext::TaskNotFound {
                        query: Some(descriptions.join(", ")),
                    })
                }
            }
        } else {
            (matched, false)
        }
    };

    let mut contents = Vec::with_capacity(targets.len());
    for task in targets {
        if let Some(done) = assistant.campaign.mark_done_at(chat_id, &task.id, now)? {
            contents.push(done.content);
        }
    }
    if contents.is_empty() {
        return Ok(ComposeContext::TaskNotFound {
            query: descriptions.first().cloned(),
        });
    }
    Ok(ComposeContext::TasksCompleted { contents, guessed })
}

fn cancel(
    assistant: &Assistant,
    chat_id: &str,
    description: Option<String>,
) -> Result<ComposeContext, AssistantError> {
    let query = description.filter(|description| !description.trim().is_empty());
    let Some(found) = assistant
        .campaign
        .tasks()
        .find_task_by_description(chat_id, query.as_deref())?
    else {
        return Ok(ComposeContext::TaskNotFound { query });
    };
    let guessed = matches!(found, TaskMatch::Fallback(_)) && query.is_some();
    let task = found.into_task();
    match assistant.campaign.cancel_task(chat_id, &task.id)? {
        Some(deleted) => Ok(ComposeContext::TaskCancelled {
            content: deleted.content,
            guessed,
        }),
        None => Ok(ComposeContext::TaskNotFound { query }),
    }
}

fn list_tasks(
    assistant: &Assistant,
    chat_id: &str,
    filter: TaskFilter,
    now: DateTime<Utc>,
) -> Result<ComposeContext, AssistantError> {
    let store = assistant.campaign.tasks();
    let timezone = store.timezone();
    let tasks = match filter {
        TaskFilter::All => store.get_pending_tasks(chat_id)?,
        TaskFilter::Today => store.get_todays_tasks_at(chat_id, now)?,
        TaskFilter::Overdue => store.get_overdue_tasks_at(chat_id, now)?,
    };
    let tasks = tasks
        .iter()
        .map(|task| TaskLine {
            content: task.content.clone(),
            due: if task.is_day_only {
                format_day_label(task.next_reminder, timezone, now)
            } else {
                format_elapsed_or_future(task.next_reminder, now)
            },
            is_important: task.is_important,
        })
        .collect();
    Ok(ComposeContext::TaskListing { filter, tasks })
}

fn apply_list_action(
    assistant: &Assistant,
    chat_id: &str,
    action: ListAction,
    now: DateTime<Utc>,
) -> Result<ComposeContext, AssistantError> {
    let store = assistant.campaign.tasks();
    if let ListAction::Create { name, items, task } = action {
        // Only an explicit match binds a list to a task.
        let linked = match task.filter(|task| !task.trim().is_empty()) {
            Some(description) => store
                .find_tasks_by_descriptions(chat_id, &[description])?
                .into_iter()
                .next(),
            None => None,
        };
        let list = store.create_list_at(
            chat_id,
            &name,
            &items,
            linked.as_ref().map(|task| task.id.as_str()),
            now,
        )?;
        return Ok(ComposeContext::ListChanged {
            name: list.name,
            change: ListChange::Created,
            affected: list.items.into_iter().map(|item| item.content).collect(),
        });
    }

    let query = match &action {
        ListAction::Create { .. } => None,
        ListAction::AddItems { list, .. }
        | ListAction::RemoveItems { list, .. }
        | ListAction::CheckItems { list, .. }
        | ListAction::UncheckItems { list, .. }
        | ListAction::Rename { list, .. }
        | ListAction::Complete { list }
        | ListAction::Delete { list }
        | ListAction::Show { list } => list.clone(),
    };
    let Some(list) = store.find_list_by_description(chat_id, query.as_deref())? else {
        return Ok(ComposeContext::ListNotFound { query });
    };
    let not_found = || ComposeContext::ListNotFound {
        query: query.clone(),
    };

    let context = match action {
        ListAction::Create { .. } => not_found(),
        ListAction::AddItems { items, .. } => match store.add_list_items(chat_id, &list.id, &items)? {
            Some(updated) => ComposeContext::ListChanged {
                name: updated.name,
                change: ListChange::ItemsAdded,
                affected: items,
            },
            None => not_found(),
        },
        ListAction::RemoveItems { items, .. } => {
            edit_context(store.remove_list_items(chat_id, &list.id, &items)?, ListChange::ItemsRemoved)
                .unwrap_or_else(not_found)
        }
        ListAction::CheckItems { items, .. } => {
            edit_context(store.check_list_items(chat_id, &list.id, &items)?, ListChange::ItemsChecked)
                .unwrap_or_else(not_found)
        }
        ListAction::UncheckItems { items, .. } => edit_context(
            store.uncheck_list_items(chat_id, &list.id, &items)?,
            ListChange::ItemsUnchecked,
        )
        .unwrap_or_else(not_found),
        ListAction::Rename { new_name, .. } => match store.rename_list(chat_id, &list.id, &new_name)? {
            Some(renamed) => ComposeContext::ListChanged {
                name: renamed.name,
                change: ListChange::Renamed,
                affected: Vec::new(),
            },
            None => not_found(),
        },
        ListAction::Complete { .. } => match store.complete_list(chat_id, &list.id)? {
            Some(done) => ComposeContext::ListChanged {
                name: done.name,
                change: ListChange::Completed,
                affected: Vec::new(),
            },
            None => not_found(),
        },
        ListAction::Delete { .. } => match store.delete_list(chat_id, &list.id)? {
            Some(deleted) => ComposeContext::ListChanged {
                name: deleted.name,
                change: ListChange::Deleted,
                affected: Vec::new(),
            },
            None => not_found(),
        },
        ListAction::Show { .. } => ComposeContext::ListShown {
            name: list.name,
            items: list
                .items
                .into_iter()
                .map(|item| ShownItem {
                    content: item.content,
                    is_checked: item.is_checked,
                })
                .collect(),
        },
    };
    Ok(context)
}

fn edit_context(edit: Option<crate::task_store::ListEdit>, change: ListChange) -> Option<ComposeContext> {
    edit.map(|edit| ComposeContext::ListChanged {
        name: edit.list.name,
        change,
        affected: edit.affected,
    })
}

fn change_preference(
    assistant: &Assistant,
    chat_id: &str,
    setting: PreferenceKind,
    hour: u32,
    minute: u32,
) -> Result<ComposeContext, AssistantError> {
    match assistant
        .coordinator
        .update_schedule_preference(chat_id, setting, hour, minute)
    {
        Ok(update) => {
            let time = ClockTime { hour, minute };
            Ok(ComposeContext::PreferenceUpdated {
                setting,
                time: time.label(),
                failed: update.report.failed_labels(),
            })
        }
        Err(CoordinatorError::InvalidTime { hour, minute }) => {
            Ok(ComposeContext::InvalidTime { hour, minute })
        }
        Err(err) => Err(err.into()),
    }
}
