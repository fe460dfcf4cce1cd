//! In-process doubles for the external collaborators, shared by unit and
//! integration tests.

use chrono_tz::Tz;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::assistant::Assistant;
use crate::campaign::CampaignEngine;
use crate::composer::TemplateComposer;
use crate::coordinator::PreferenceCoordinator;
use crate::gateway::{
    CallbackKind, CallbackPayload, CronSpec, DelayedDelivery, DeliveryError, SchedulingGateway,
    SigningKeys,
};
use crate::intent::{ClassifyRequest, Intent, IntentClassifier};
use crate::kv_store::MemoryKvStore;
use crate::llm::CollaboratorError;
use crate::task_store::TaskStore;
use crate::transcription::Transcriber;
use crate::transport::{MessageTransport, TransportError};

pub const TEST_TIMEZONE: Tz = chrono_tz::America::New_York;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub id: String,
    pub payload: CallbackPayload,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstalledSchedule {
    pub id: String,
    pub payload: CallbackPayload,
    pub cron: CronSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryCall {
    Publish(PublishedMessage),
    CreateSchedule(InstalledSchedule),
    CancelMessage(String),
    DeleteSchedule(String),
}

#[derive(Default)]
struct DeliveryState {
    calls: Vec<DeliveryCall>,
    live_messages: BTreeMap<String, PublishedMessage>,
    live_schedules: BTreeMap<String, InstalledSchedule>,
    next_id: u64,
}

/// Delivery backend that records every call and keeps the set of live
/// messages and schedules. Nothing is ever delivered on its own.
#[derive(Default)]
pub struct RecordingDelivery {
    state: Mutex<DeliveryState>,
    failing: AtomicBool,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, publishing and schedule creation fail as if unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<DeliveryCall> {
        lock(&self.state).calls.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                DeliveryCall::Publish(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn published_of(&self, kind: CallbackKind) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|message| message.payload.kind == kind)
            .collect()
    }

    pub fn last_published(&self, kind: CallbackKind) -> Option<PublishedMessage> {
        self.published_of(kind).pop()
    }

    pub fn cancelled(&self) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                DeliveryCall::CancelMessage(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_schedules(&self) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                DeliveryCall::DeleteSchedule(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn live_messages(&self) -> Vec<PublishedMessage> {
        lock(&self.state).live_messages.values().cloned().collect()
    }

    pub fn live_schedules(&self) -> Vec<InstalledSchedule> {
        lock(&self.state).live_schedules.values().cloned().collect()
    }

    pub fn live_schedules_of(&self, kind: CallbackKind) -> Vec<InstalledSchedule> {
        self.live_schedules()
            .into_iter()
            .filter(|schedule| schedule.payload.kind == kind)
            .collect()
    }

    fn check_available(&self) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Unavailable("recording delivery is failing".to_string()));
        }
        Ok(())
    }
}

impl DelayedDelivery for RecordingDelivery {
    fn publish_delayed(
        &self,
        payload: &CallbackPayload,
        delay: Duration,
    ) -> Result<String, DeliveryError> {
        self.check_available()?;
        let mut state = lock(&self.state);
        state.next_id += 1;
        let message = PublishedMessage {
            id: format!("msg_{}", state.next_id),
            payload: payload.clone(),
            delay,
        };
        state.calls.push(DeliveryCall::Publish(message.clone()));
        state.live_messages.insert(message.id.clone(), message.clone());
        Ok(message.id)
    }

    fn create_schedule(
        &self,
        payload: &CallbackPayload,
        cron: &CronSpec,
        _timezone: Tz,
    ) -> Result<String, DeliveryError> {
        self.check_available()?;
        let mut state = lock(&self.state);
        state.next_id += 1;
        let schedule = InstalledSchedule {
            id: format!("scd_{}", state.next_id),
            payload: payload.clone(),
            cron: *cron,
        };
        state.calls.push(DeliveryCall::CreateSchedule(schedule.clone()));
        state.live_schedules.insert(schedule.id.clone(), schedule.clone());
        Ok(schedule.id)
    }

    fn cancel_message(&self, message_id: &str) -> Result<(), DeliveryError> {
        let mut state = lock(&self.state);
        state.calls.push(DeliveryCall::CancelMessage(message_id.to_string()));
        match state.live_messages.remove(message_id) {
            Some(_) => Ok(()),
            None => Err(DeliveryError::NotFound(message_id.to_string())),
        }
    }

    fn delete_schedule(&self, schedule_id: &str) -> Result<(), DeliveryError> {
        let mut state = lock(&self.state);
        state.calls.push(DeliveryCall::DeleteSchedule(schedule_id.to_string()));
        match state.live_schedules.remove(schedule_id) {
            Some(_) => Ok(()),
            None => Err(DeliveryError::NotFound(schedule_id.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: String,
    pub text: String,
}

/// Transport that records outgoing messages and serves canned voice notes.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    voice_notes: Mutex<HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn add_voice_note(&self, file_id: &str, audio: Vec<u8>) {
        lock(&self.voice_notes).insert(file_id.to_string(), audio);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    pub fn texts_to(&self, chat_id: &str) -> Vec<String> {
        lock(&self.sent)
            .iter()
            .filter(|message| message.chat_id == chat_id)
            .map(|message| message.text.clone())
            .collect()
    }

    pub fn last_text(&self) -> Option<String> {
        lock(&self.sent).last().map(|message| message.text.clone())
    }

    pub fn clear(&self) {
        lock(&self.sent).clear();
    }
}

impl MessageTransport for RecordingTransport {
    fn send(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Other("recording transport is failing".to_string()));
        }
        lock(&self.sent).push(SentMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    fn fetch_voice(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        lock(&self.voice_notes)
            .get(file_id)
            .cloned()
            .ok_or_else(|| TransportError::Other(format!("unknown voice note {}", file_id)))
    }
}

/// What the classifier was asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierCall {
    pub text: String,
    pub history_len: usize,
    pub awaiting_checkin: bool,
}

/// Classifier that replays queued answers and falls back to conversation.
#[derive(Default)]
pub struct ScriptedClassifier {
    answers: Mutex<VecDeque<Vec<Intent>>>,
    calls: Mutex<Vec<ClassifierCall>>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, intents: Vec<Intent>) {
        lock(&self.answers).push_back(intents);
    }

    pub fn calls(&self) -> Vec<ClassifierCall> {
        lock(&self.calls).clone()
    }
}

impl IntentClassifier for ScriptedClassifier {
    fn classify(&self, request: &ClassifyRequest<'_>) -> Vec<Intent> {
        lock(&self.calls).push(ClassifierCall {
            text: request.text.to_string(),
            history_len: request.history.len(),
            awaiting_checkin: request.awaiting_checkin,
        });
        lock(&self.answers)
            .pop_front()
            .unwrap_or_else(|| vec![Intent::conversation()])
    }
}

/// Returns a fixed transcript, or fails when none is set.
#[derive(Default)]
pub struct ScriptedTranscriber {
    transcript: Mutex<Option<String>>,
}

impl ScriptedTranscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_transcript(&self, transcript: Option<&str>) {
        *lock(&self.transcript) = transcript.map(str::to_string);
    }
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(&self, _audio: &[u8]) -> Result<String, CollaboratorError> {
        lock(&self.transcript)
            .clone()
            .ok_or(CollaboratorError::EmptyResponse)
    }
}

/// The whole core wired over in-memory doubles.
pub struct Harness {
    pub kv: Arc<MemoryKvStore>,
    pub delivery: Arc<RecordingDelivery>,
    pub transport: Arc<RecordingTransport>,
    pub classifier: Arc<ScriptedClassifier>,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub tasks: Arc<TaskStore>,
    pub gateway: Arc<SchedulingGateway>,
    pub campaign: Arc<CampaignEngine>,
    pub coordinator: Arc<PreferenceCoordinator>,
    pub assistant: Arc<Assistant>,
}

impl Harness {
    pub fn new() -> Self {
        let kv = Arc::new(MemoryKvStore::new());
        let delivery = Arc::new(RecordingDelivery::new());
        let transport = Arc::new(RecordingTransport::new());
        let classifier = Arc::new(ScriptedClassifier::new());
        let transcriber = Arc::new(ScriptedTranscriber::new());
        let composer = Arc::new(TemplateComposer);

        let tasks = Arc::new(TaskStore::new(kv.clone(), TEST_TIMEZONE));
        let gateway = Arc::new(SchedulingGateway::new(
            delivery.clone(),
            TEST_TIMEZONE,
            SigningKeys::default(),
        ));
        let campaign = Arc::new(CampaignEngine::new(
            tasks.clone(),
            kv.clone(),
            gateway.clone(),
            transport.clone(),
            composer.clone(),
        ));
        let coordinator = Arc::new(PreferenceCoordinator::new(
            kv.clone(),
            tasks.clone(),
            gateway.clone(),
            transport.clone(),
            composer.clone(),
        ));
        let assistant = Arc::new(
            Assistant::new(
                kv.clone(),
                campaign.clone(),
                coordinator.clone(),
                classifier.clone(),
                composer,
                transport.clone(),
            )
            .with_transcriber(transcriber.clone()),
        );

        Self {
            kv,
            delivery,
            transport,
            classifier,
            transcriber,
            tasks,
            gateway,
            campaign,
            coordinator,
            assistant,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
