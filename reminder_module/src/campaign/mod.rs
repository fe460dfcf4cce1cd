//! Per-task notification campaign: initial reminder, one follow-up, and the
//! nag ladder for important tasks.
//!
//! Every delivery is handled by re-reading the task and checking that the
//! callback still matches what the task is waiting for. The transport
//! delivers at least once, so "nothing to do" is a normal outcome.

mod ladder;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::composer::{ComposeContext, MessageComposer};
use crate::gateway::{CallbackKind, SchedulingGateway};
use crate::kv_store::{get_json, set_json, KvStore, StoreError};
use crate::task_store::{CampaignPhase, NewTask, Task, TaskStore};
use crate::transport::{MessageTransport, TransportError};

pub use ladder::{
    follow_up_delay_minutes, nag_delay_minutes, FOLLOW_UP_DELAY_MINUTES, MAX_NAG_LEVEL,
    NAG_LADDER_MINUTES,
};

const FOLLOW_UP_TTL: std::time::Duration = std::time::Duration::from_secs(30 * 60);

pub(crate) fn follow_up_key(chat_id: &str) -> String {
    format!("followup:{}", chat_id)
}

#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Exists only between an initial reminder and either the user's next
/// message or the follow-up firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFollowUp {
    pub task_id: String,
    pub content: String,
    pub qstash_message_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingTaskId,
    TaskMissing,
    NotPending,
    /// The delivery id is not the callback the task is waiting for.
    StaleDelivery,
    /// The task is not in the phase this callback kind belongs to.
    PhaseMismatch,
    NoPendingFollowUp,
    NotTaskCampaign,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Skipped(SkipReason),
    ReminderSent {
        follow_up_scheduled: bool,
        nag_scheduled: bool,
    },
    NagSent {
        level: u32,
        next_scheduled: bool,
    },
    FinalNagSent,
    FollowUpSent,
}

pub struct CampaignEngine {
    tasks: Arc<TaskStore>,
    kv: Arc<dyn KvStore>,
    gateway: Arc<SchedulingGateway>,
    transport: Arc<dyn MessageTransport>,
    composer: Arc<dyn MessageComposer>,
}

impl CampaignEngine {
    pub fn new(
        tasks: Arc<TaskStore>,
        kv: Arc<dyn KvStore>,
        gateway: Arc<SchedulingGateway>,
        transport: Arc<dyn MessageTransport>,
        composer: Arc<dyn MessageComposer>,
    ) -> Self {
        Self {
            tasks,
            kv,
            gateway,
            transport,
            composer,
        }
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn schedule_new_task(&self, chat_id: &str, request: &NewTask) -> Result<Task, CampaignError> {
        self.schedule_new_task_at(chat_id, request, Utc::now())
    }

    /// Creates the task and, unless it is day-only, its reminder callback.
    /// A scheduler failure leaves the task saved with no campaign.
    ///
    /// A due-now reminder can be delivered before `publish` returns, so the
    /// message id is recorded on a fresh read and only while the task is
    /// still waiting for it.
    pub fn schedule_new_task_at(
        &self,
        chat_id: &str,
        request: &NewTask,
        now: DateTime<Utc>,
    ) -> Result<Task, CampaignError> {
        let task = self.tasks.create_task_at(chat_id, request, now)?;
        if task.is_day_only {
            debug!("day-only task {} gets no callback", task.id);
            return Ok(task);
        }

        let scheduled = self.gateway.schedule_one_shot(
            chat_id,
            Some(&task.id),
            request.delay_minutes,
            CallbackKind::Reminder,
        );
        let Some(mut current) = self.tasks.get_task(chat_id, &task.id)? else {
            if let Ok(message_id) = &scheduled {
                self.gateway.cancel_one_shot(message_id);
            }
            return Ok(task);
        };
        if current.campaign != CampaignPhase::Scheduled || current.qstash_message_id.is_some() {
            debug!("task {} moved past its reminder before the id was recorded", task.id);
            return Ok(current);
        }

        match scheduled {
            Ok(message_id) => {
                current.qstash_message_id = Some(message_id);
            }
            Err(err) => {
                warn!("could not schedule reminder for task {}: {}", task.id, err);
                current.campaign = CampaignPhase::ScheduleFailed;
            }
        }
        self.tasks.save_task(&current)?;
        Ok(current)
    }

    pub fn handle_callback(
        &self,
        chat_id: &str,
        task_id: Option<&str>,
        kind: CallbackKind,
        delivery_id: Option<&str>,
    ) -> Result<CallbackOutcome, CampaignError> {
        self.handle_callback_at(chat_id, task_id, kind, delivery_id, Utc::now())
    }

    pub fn handle_callback_at(
        &self,
        chat_id: &str,
        task_id: Option<&str>,
        kind: CallbackKind,
        delivery_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, CampaignError> {
        let Some(task_id) = task_id else {
            warn!("{} callback for chat {} carries no task id", kind.as_str(), chat_id);
            return Ok(CallbackOutcome::Skipped(SkipReason::MissingTaskId));
        };
        let outcome = match kind {
            CallbackKind::Reminder | CallbackKind::Nag => {
                self.deliver_campaign_step(chat_id, task_id, kind, delivery_id, now)?
            }
            CallbackKind::FollowUp => self.deliver_follow_up(chat_id, task_id, delivery_id)?,
            _ => CallbackOutcome::Skipped(SkipReason::NotTaskCampaign),
        };
        if let CallbackOutcome::Skipped(reason) = outcome {
            info!(
                "skipped {} callback for task {} in chat {}: {:?}",
                kind.as_str(),
                task_id,
                chat_id,
                reason
            );
        }
        Ok(outcome)
    }

    fn deliver_campaign_step(
        &self,
        chat_id: &str,
        task_id: &str,
        kind: CallbackKind,
        delivery_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, CampaignError> {
        let Some(mut task) = self.tasks.get_task(chat_id, task_id)? else {
            return Ok(CallbackOutcome::Skipped(SkipReason::TaskMissing));
        };
        if !task.is_pending() {
            return Ok(CallbackOutcome::Skipped(SkipReason::NotPending));
        }
        // The reminder may arrive before its id was written to the task.
        let id_not_recorded = kind == CallbackKind::Reminder
            && task.campaign == CampaignPhase::Scheduled
            && task.qstash_message_id.is_none();
        if let Some(delivered) = delivery_id {
            if !id_not_recorded && task.qstash_message_id.as_deref() != Some(delivered) {
                return Ok(CallbackOutcome::Skipped(SkipReason::StaleDelivery));
            }
        }
        let expected_phase = match kind {
            CallbackKind::Reminder => CampaignPhase::Scheduled,
            _ => CampaignPhase::Nagging,
        };
        if task.campaign != expected_phase {
            return Ok(CallbackOutcome::Skipped(SkipReason::PhaseMismatch));
        }

        if kind == CallbackKind::Reminder {
            // Send before mutating anything so a transport failure can be retried.
            self.send(chat_id, &ComposeContext::Reminder {
                content: task.content.clone(),
            })?;
            let follow_up_scheduled = self.schedule_follow_up(&task);
            let nag_scheduled = if task.is_important {
                self.advance_nag(&mut task, now)
            } else {
                task.campaign = CampaignPhase::ReminderSent;
                task.qstash_message_id = None;
                false
            };
            self.tasks.save_task(&task)?;
            return Ok(CallbackOutcome::ReminderSent {
                follow_up_scheduled,
                nag_scheduled,
            });
        }

        let level = task.nagging_level;
        if level >= MAX_NAG_LEVEL {
            self.send(chat_id, &ComposeContext::FinalNag {
                content: task.content.clone(),
            })?;
            task.campaign = CampaignPhase::FinalNagSent;
            task.qstash_message_id = None;
            self.tasks.save_task(&task)?;
            info!("task {} reached the final nag", task.id);
            return Ok(CallbackOutcome::FinalNagSent);
        }

        self.send(chat_id, &ComposeContext::Nag {
            content: task.content.clone(),
            level,
            remaining: MAX_NAG_LEVEL - level,
        })?;
        let next_scheduled = self.advance_nag(&mut task, now);
        self.tasks.save_task(&task)?;
        Ok(CallbackOutcome::NagSent {
            level,
            next_scheduled,
        })
    }

    /// Schedules the next rung of the ladder and moves the task into
    /// `Nagging`. The caller persists the task.
    fn advance_nag(&self, task: &mut Task, now: DateTime<Utc>) -> bool {
        let delay = nag_delay_minutes(task.nagging_level, task.is_important);
        match self
            .gateway
            .schedule_one_shot(&task.chat_id, Some(&task.id), delay, CallbackKind::Nag)
        {
            Ok(message_id) => {
                task.nagging_level += 1;
                task.next_reminder = now + Duration::minutes(delay);
                task.qstash_message_id = Some(message_id);
                task.campaign = CampaignPhase::Nagging;
                debug!(
                    "task {} nag level {} in {}m",
                    task.id, task.nagging_level, delay
                );
                true
            }
            Err(err) => {
                warn!("could not schedule nag for task {}: {}", task.id, err);
                task.qstash_message_id = None;
                task.campaign = CampaignPhase::ScheduleFailed;
                false
            }
        }
    }

    fn schedule_follow_up(&self, task: &Task) -> bool {
        let delay = follow_up_delay_minutes(&mut rand::thread_rng());
        let message_id = match self.gateway.schedule_one_shot(
            &task.chat_id,
            Some(&task.id),
            delay,
            CallbackKind::FollowUp,
        ) {
            Ok(message_id) => message_id,
            Err(err) => {
                warn!("could not schedule follow-up for task {}: {}", task.id, err);
                return false;
            }
        };

        // Only one follow-up per chat is ever outstanding.
        if let Err(err) = self.clear_pending_follow_up(&task.chat_id) {
            warn!("could not clear previous follow-up for chat {}: {}", task.chat_id, err);
        }
        let record = PendingFollowUp {
            task_id: task.id.clone(),
            content: task.content.clone(),
            qstash_message_id: message_id.clone(),
        };
        match set_json(
            self.kv.as_ref(),
            &follow_up_key(&task.chat_id),
            &record,
            Some(FOLLOW_UP_TTL),
        ) {
            Ok(()) => true,
            Err(err) => {
                warn!("could not persist follow-up for task {}: {}", task.id, err);
                self.gateway.cancel_one_shot(&message_id);
                false
            }
        }
    }

    fn deliver_follow_up(
        &self,
        chat_id: &str,
        task_id: &str,
        delivery_id: Option<&str>,
    ) -> Result<CallbackOutcome, CampaignError> {
        let key = follow_up_key(chat_id);
        let Some(record) = get_json::<PendingFollowUp>(self.kv.as_ref(), &key)? else {
            return Ok(CallbackOutcome::Skipped(SkipReason::NoPendingFollowUp));
        };
        if record.task_id != task_id {
            return Ok(CallbackOutcome::Skipped(SkipReason::NoPendingFollowUp));
        }
        if let Some(delivered) = delivery_id {
            if record.qstash_message_id != delivered {
                return Ok(CallbackOutcome::Skipped(SkipReason::StaleDelivery));
            }
        }
        let content = match self.tasks.get_task(chat_id, task_id)? {
            Some(task) if task.is_pending() => task.content,
            Some(_) => {
                self.kv.delete(&key)?;
                return Ok(CallbackOutcome::Skipped(SkipReason::NotPending));
            }
            None => {
                self.kv.delete(&key)?;
                return Ok(CallbackOutcome::Skipped(SkipReason::TaskMissing));
            }
        };

        self.send(chat_id, &ComposeContext::FollowUp { content })?;
        self.kv.delete(&key)?;
        Ok(CallbackOutcome::FollowUpSent)
    }

    /// Drops the chat's pending follow-up and cancels its callback. Called for
    /// every inbound user message.
    pub fn clear_pending_follow_up(
        &self,
        chat_id: &str,
    ) -> Result<Option<PendingFollowUp>, CampaignError> {
        let key = follow_up_key(chat_id);
        let Some(record) = get_json::<PendingFollowUp>(self.kv.as_ref(), &key)? else {
            return Ok(None);
        };
        self.kv.delete(&key)?;
        self.gateway.cancel_one_shot(&record.qstash_message_id);
        debug!("cleared follow-up for task {} in chat {}", record.task_id, chat_id);
        Ok(Some(record))
    }

    pub fn pending_follow_up(&self, chat_id: &str) -> Result<Option<PendingFollowUp>, CampaignError> {
        Ok(get_json(self.kv.as_ref(), &follow_up_key(chat_id))?)
    }

    pub fn mark_done(&self, chat_id: &str, task_id: &str) -> Result<Option<Task>, CampaignError> {
        self.mark_done_at(chat_id, task_id, Utc::now())
    }

    /// Cancels the outstanding callback, then completes the task and its
    /// linked list.
    pub fn mark_done_at(
        &self,
        chat_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, CampaignError> {
        self.stop_campaign(chat_id, task_id)?;
        let completed = self.tasks.complete_task_at(chat_id, task_id, now)?;
        if let Some(task) = &completed {
            info!("task {} completed in chat {}", task.id, chat_id);
        }
        Ok(completed)
    }

    /// Cancels the outstanding callback and deletes the task. A linked list
    /// survives, unlinked.
    pub fn cancel_task(&self, chat_id: &str, task_id: &str) -> Result<Option<Task>, CampaignError> {
        self.stop_campaign(chat_id, task_id)?;
        let deleted = self.tasks.delete_task(chat_id, task_id)?;
        if let Some(task) = &deleted {
            info!("task {} cancelled in chat {}", task.id, chat_id);
        }
        Ok(deleted)
    }

    fn stop_campaign(&self, chat_id: &str, task_id: &str) -> Result<(), CampaignError> {
        if let Some(task) = self.tasks.get_task(chat_id, task_id)? {
            if let Some(message_id) = task.qstash_message_id.as_deref() {
                self.gateway.cancel_one_shot(message_id);
            }
        }
        if let Some(record) = self.pending_follow_up(chat_id)? {
            if record.task_id == task_id {
                self.clear_pending_follow_up(chat_id)?;
            }
        }
        Ok(())
    }

    fn send(&self, chat_id: &str, context: &ComposeContext) -> Result<(), CampaignError> {
        let text = self.composer.compose(context);
        self.transport.send(chat_id, &text)?;
        Ok(())
    }
}
