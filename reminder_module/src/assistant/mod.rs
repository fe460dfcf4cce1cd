//! Entry points for the two kinds of inbound events: scheduler callbacks and
//! user messages. Each call is a self-contained unit of work; everything it
//! needs is re-read from the store.

mod history;
mod intents;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::campaign::{CallbackOutcome, CampaignEngine, CampaignError, PendingFollowUp};
use crate::composer::{ComposeContext, MessageComposer};
use crate::coordinator::{CoordinatorError, PreferenceCoordinator, RecurringOutcome};
use crate::gateway::{CallbackKind, CallbackPayload};
use crate::intent::{ClassifyRequest, IntentClassifier};
use crate::kv_store::{KvStore, StoreError};
use crate::transcription::Transcriber;
use crate::transport::{MessageTransport, TransportError};

pub use history::{HISTORY_LIMIT, HISTORY_TTL};

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error(transparent)]
    Campaign(#[from] CampaignError),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundContent {
    Text(String),
    Voice { file_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: String,
    pub content: InboundContent,
}

impl InboundMessage {
    pub fn text(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            content: InboundContent::Text(text.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Campaign(CallbackOutcome),
    Recurring(RecurringOutcome),
}

pub struct Assistant {
    kv: Arc<dyn KvStore>,
    campaign: Arc<CampaignEngine>,
    coordinator: Arc<PreferenceCoordinator>,
    classifier: Arc<dyn IntentClassifier>,
    composer: Arc<dyn MessageComposer>,
    transport: Arc<dyn MessageTransport>,
    transcriber: Option<Arc<dyn Transcriber>>,
}

impl Assistant {
    pub fn new(
        kv: Arc<dyn KvStore>,
        campaign: Arc<CampaignEngine>,
        coordinator: Arc<PreferenceCoordinator>,
        classifier: Arc<dyn IntentClassifier>,
        composer: Arc<dyn MessageComposer>,
        transport: Arc<dyn MessageTransport>,
    ) -> Self {
        Self {
            kv,
            campaign,
            coordinator,
            classifier,
            composer,
            transport,
            transcriber: None,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn handle_callback(
        &self,
        payload: &CallbackPayload,
        delivery_id: Option<&str>,
    ) -> Result<DispatchOutcome, AssistantError> {
        self.handle_callback_at(payload, delivery_id, Utc::now())
    }

    /// Routes a scheduler callback. An error means the delivery should be
    /// retried; every logical no-op is an `Ok`.
    pub fn handle_callback_at(
        &self,
        payload: &CallbackPayload,
        delivery_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, AssistantError> {
        let chat_id = payload.chat_id.as_str();
        let outcome = match payload.kind {
            CallbackKind::Reminder | CallbackKind::Nag | CallbackKind::FollowUp => {
                DispatchOutcome::Campaign(self.campaign.handle_callback_at(
                    chat_id,
                    payload.task_id.as_deref(),
                    payload.kind,
                    delivery_id,
                    now,
                )?)
            }
            CallbackKind::DailyCheckin
            | CallbackKind::WeeklySummary
            | CallbackKind::EndOfDay
            | CallbackKind::MorningReview => DispatchOutcome::Recurring(
                self.coordinator
                    .handle_recurring_callback_at(chat_id, payload.kind, now)?,
            ),
        };
        info!(
            "callback {} for chat {} handled: {:?}",
            payload.kind.as_str(),
            chat_id,
            outcome
        );
        Ok(outcome)
    }

    pub fn handle_user_message(&self, message: &InboundMessage) -> Result<(), AssistantError> {
        self.handle_user_message_at(message, Utc::now())
    }

    pub fn handle_user_message_at(
        &self,
        message: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<(), AssistantError> {
        let chat_id = message.chat_id.as_str();
        let registration = self.coordinator.register_chat(chat_id)?;
        if registration.first_contact {
            info!("first message from chat {}", chat_id);
        }
        // Any message counts as a reply to the last reminder.
        let answered = self.campaign.clear_pending_follow_up(chat_id)?;

        let Some(text) = self.message_text(message) else {
            return self.reply(chat_id, &ComposeContext::TranscriptionFailed);
        };

        let history = history::load(self.kv.as_ref(), chat_id)?;
        let awaiting_checkin = self.coordinator.is_awaiting_checkin(chat_id)?;
        let intents = self.classifier.classify(&ClassifyRequest {
            text: &text,
            history: &history,
            awaiting_checkin,
            now,
        });

        let mut replies = Vec::with_capacity(intents.len() + 1);
        for intent in intents {
            let context = match self.apply_intent(chat_id, intent, &text, answered.as_ref(), now) {
                Ok(context) => context,
                Err(err) => {
                    error!("failed to apply intent for chat {}: {}", chat_id, err);
                    ComposeContext::SomethingWentWrong
                }
            };
            replies.push(self.composer.compose(&context));
        }
        if !registration.report.is_complete() {
            replies.push(self.composer.compose(&ComposeContext::CampaignsIncomplete {
                failed: registration.report.failed_labels(),
            }));
        }
        let reply = replies.join("\n\n");
        self.transport.send(chat_id, &reply)?;

        if let Err(err) = history::append(self.kv.as_ref(), chat_id, history, &text, &reply) {
            warn!("could not update history for chat {}: {}", chat_id, err);
        }
        Ok(())
    }

    fn message_text(&self, message: &InboundMessage) -> Option<String> {
        let file_id = match &message.content {
            InboundContent::Text(text) => return Some(text.clone()),
            InboundContent::Voice { file_id } => file_id,
        };
        let Some(transcriber) = self.transcriber.as_ref() else {
            warn!("voice note from chat {} but no transcriber configured", message.chat_id);
            return None;
        };
        let audio = match self.transport.fetch_voice(file_id) {
            Ok(audio) => audio,
            Err(err) => {
                warn!("could not download voice note {}: {}", file_id, err);
                return None;
            }
        };
        match transcriber.transcribe(&audio) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!("transcription failed for chat {}: {}", message.chat_id, err);
                None
            }
        }
    }

    fn reply(&self, chat_id: &str, context: &ComposeContext) -> Result<(), AssistantError> {
        let text = self.composer.compose(context);
        self.transport.send(chat_id, &text)?;
        Ok(())
    }

    fn apply_intent(
        &self,
        chat_id: &str,
        intent: crate::intent::Intent,
        text: &str,
        answered: Option<&PendingFollowUp>,
        now: DateTime<Utc>,
    ) -> Result<ComposeContext, AssistantError> {
        intents::apply(self, chat_id, intent, text, answered, now)
    }
}
