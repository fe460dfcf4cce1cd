//! Structured intents produced by the external text classifier.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::{ChatClient, ChatMessage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderRequest {
    pub content: String,
    #[serde(alias = "delayMinutes")]
    pub delay_minutes: i64,
    #[serde(default, alias = "isImportant")]
    pub is_important: bool,
    #[serde(default, alias = "isDayOnly")]
    pub is_day_only: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskFilter {
    #[default]
    All,
    Today,
    Overdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceKind {
    Checkin,
    MorningReview,
    EndOfDay,
}

impl PreferenceKind {
    pub fn label(self) -> &'static str {
        match self {
            PreferenceKind::Checkin => "check-in",
            PreferenceKind::MorningReview => "morning review",
            PreferenceKind::EndOfDay => "end-of-day wrap-up",
        }
    }
}

/// Checklist edits. `list` is a fuzzy description of the target list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ListAction {
    Create {
        name: String,
        #[serde(default)]
        items: Vec<String>,
        /// Description of a pending task to bind the list to.
        #[serde(default)]
        task: Option<String>,
    },
    AddItems {
        #[serde(default)]
        list: Option<String>,
        items: Vec<String>,
    },
    RemoveItems {
        #[serde(default)]
        list: Option<String>,
        items: Vec<String>,
    },
    CheckItems {
        #[serde(default)]
        list: Option<String>,
        items: Vec<String>,
    },
    UncheckItems {
        #[serde(default)]
        list: Option<String>,
        items: Vec<String>,
    },
    Rename {
        #[serde(default)]
        list: Option<String>,
        new_name: String,
    },
    Complete {
        #[serde(default)]
        list: Option<String>,
    },
    Delete {
        #[serde(default)]
        list: Option<String>,
    },
    Show {
        #[serde(default)]
        list: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    Reminder(ReminderRequest),
    MultiReminder {
        reminders: Vec<ReminderRequest>,
    },
    BrainDump {
        items: Vec<String>,
    },
    InboxItem {
        items: Vec<String>,
    },
    MarkDone {
        #[serde(default)]
        descriptions: Vec<String>,
    },
    Cancel {
        #[serde(default)]
        description: Option<String>,
    },
    ListTasks {
        #[serde(default)]
        filter: TaskFilter,
    },
    ListMutation(ListAction),
    CheckinResponse {
        rating: u8,
        #[serde(default)]
        note: Option<String>,
    },
    PreferenceChange {
        setting: PreferenceKind,
        hour: u32,
        #[serde(default)]
        minute: u32,
    },
    Conversation {
        #[serde(default)]
        reply: Option<String>,
    },
}

impl Intent {
    pub fn conversation() -> Self {
        Intent::Conversation { reply: None }
    }
}

/// One prior turn of the conversation, kept for classifier context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ClassifyRequest<'a> {
    pub text: &'a str,
    pub history: &'a [HistoryEntry],
    pub awaiting_checkin: bool,
    pub now: DateTime<Utc>,
}

/// Never fails: implementations degrade to `Intent::Conversation`.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, request: &ClassifyRequest<'_>) -> Vec<Intent>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntentEnvelope {
    Wrapped { intents: Vec<Intent> },
    Many(Vec<Intent>),
    One(Box<Intent>),
}

/// Parses classifier output: a single intent object, an array, or
/// `{"intents": [...]}`, optionally wrapped in a markdown code fence.
pub fn parse_intents(raw: &str) -> Result<Vec<Intent>, serde_json::Error> {
    let trimmed = strip_code_fence(raw.trim());
    let intents = match serde_json::from_str::<IntentEnvelope>(trimmed)? {
        IntentEnvelope::Wrapped { intents } | IntentEnvelope::Many(intents) => intents,
        IntentEnvelope::One(intent) => vec![*intent],
    };
    if intents.is_empty() {
        return Ok(vec![Intent::conversation()]);
    }
    Ok(intents)
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

const CLASSIFIER_PROMPT: &str = r#"You turn chat messages to a reminder assistant into JSON intents.
Reply with a JSON object {"intents": [...]} where each intent has a "type":
- reminder: {"content", "delay_minutes", "is_important", "is_day_only"}. Resolve the time phrase into minutes from now. Use is_day_only=true when the user names a day but no time.
- multi_reminder: {"reminders": [reminder, ...]}
- brain_dump: {"items": [...]} for an unstructured dump of thoughts
- inbox_item: {"items": [...]} for things to capture without a time
- mark_done: {"descriptions": [...]} (may be empty when the user just says "done")
- cancel: {"description"}
- list_tasks: {"filter": "all" | "today" | "overdue"}
- list_mutation: {"action": "create" | "add_items" | "remove_items" | "check_items" | "uncheck_items" | "rename" | "complete" | "delete" | "show", "list", "name", "items", "new_name", "task"}
- checkin_response: {"rating": 1-5, "note"}
- preference_change: {"setting": "checkin" | "morning_review" | "end_of_day", "hour": 0-23, "minute": 0-59}
- conversation: {"reply"} for anything else."#;

pub struct OpenAiIntentClassifier {
    chat: ChatClient,
    timezone: Tz,
}

impl OpenAiIntentClassifier {
    pub fn new(chat: ChatClient, timezone: Tz) -> Self {
        Self { chat, timezone }
    }

    fn build_messages(&self, request: &ClassifyRequest<'_>) -> Vec<ChatMessage> {
        let local_now = request.now.with_timezone(&self.timezone);
        let mut context = format!(
            "Current local time: {} ({}).",
            local_now.format("%A %Y-%m-%d %H:%M"),
            self.timezone.name()
        );
        if request.awaiting_checkin {
            context.push_str(
                " The user was just asked to rate their day from 1 to 5; a bare number is a checkin_response.",
            );
        }

        let mut messages = vec![
            ChatMessage::system(CLASSIFIER_PROMPT),
            ChatMessage::system(context),
        ];
        for entry in request.history {
            messages.push(ChatMessage {
                role: entry.role.clone(),
                content: entry.content.clone(),
            });
        }
        messages.push(ChatMessage::user(request.text));
        messages
    }
}

impl IntentClassifier for OpenAiIntentClassifier {
    fn classify(&self, request: &ClassifyRequest<'_>) -> Vec<Intent> {
        let raw = match self.chat.complete(&self.build_messages(request), true) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("intent classification failed: {}", err);
                return vec![Intent::conversation()];
            }
        };
        match parse_intents(&raw) {
            Ok(intents) => {
                debug!("classified {} intent(s)", intents.len());
                intents
            }
            Err(err) => {
                warn!("unparseable classifier output: {}", err);
                vec![Intent::conversation()]
            }
        }
    }
}
