//! User-facing text generation. Every context has a deterministic fallback so
//! a slow or missing language model never blocks a reply.

use serde::Serialize;
use tracing::warn;

use crate::intent::{PreferenceKind, TaskFilter};
use crate::llm::{ChatClient, ChatMessage};

/// One task as shown in listings and reviews; `due` is already formatted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskLine {
    pub content: String,
    pub due: String,
    pub is_important: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedReminder {
    pub content: String,
    pub when: String,
    pub is_day_only: bool,
    pub is_important: bool,
    /// The scheduler was unreachable; nothing will fire for this task.
    pub notification_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShownItem {
    pub content: String,
    pub is_checked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListChange {
    Created,
    ItemsAdded,
    ItemsRemoved,
    ItemsChecked,
    ItemsUnchecked,
    Renamed,
    Completed,
    Deleted,
}

/// Structured description of what happened, handed to the composer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComposeContext {
    RemindersCreated {
        reminders: Vec<CreatedReminder>,
    },
    Reminder {
        content: String,
    },
    Nag {
        content: String,
        level: u32,
        /// Nags left before the final one.
        remaining: u32,
    },
    FinalNag {
        content: String,
    },
    FollowUp {
        content: String,
    },
    TasksCompleted {
        contents: Vec<String>,
        guessed: bool,
    },
    TaskCancelled {
        content: String,
        guessed: bool,
    },
    TaskNotFound {
        query: Option<String>,
    },
    TaskListing {
        filter: TaskFilter,
        tasks: Vec<TaskLine>,
    },
    BrainDumpSaved {
        items: Vec<String>,
    },
    InboxUpdated {
        added: Vec<String>,
        unchecked_total: usize,
    },
    ListChanged {
        name: String,
        change: ListChange,
        affected: Vec<String>,
    },
    ListShown {
        name: String,
        items: Vec<ShownItem>,
    },
    ListNotFound {
        query: Option<String>,
    },
    CheckinPrompt,
    CheckinRecorded {
        rating: u8,
    },
    WeeklySummary {
        completed: i64,
        best_day: Option<String>,
        average_rating: Option<f64>,
        checkins: usize,
    },
    EndOfDay {
        completed_today: i64,
        still_pending: Vec<TaskLine>,
    },
    MorningReview {
        today: Vec<TaskLine>,
        overdue: Vec<TaskLine>,
        inbox: Vec<String>,
    },
    PreferenceUpdated {
        setting: PreferenceKind,
        time: String,
        failed: Vec<String>,
    },
    InvalidTime {
        hour: u32,
        minute: u32,
    },
    /// Some recurring campaigns could not be scheduled for this chat.
    CampaignsIncomplete {
        failed: Vec<String>,
    },
    Conversation {
        user_text: String,
        reply: Option<String>,
    },
    TranscriptionFailed,
    SomethingWentWrong,
}

pub trait MessageComposer: Send + Sync {
    fn compose(&self, context: &ComposeContext) -> String;
}

/// Deterministic text for every context.
pub fn fallback_text(context: &ComposeContext) -> String {
    match context {
        ComposeContext::RemindersCreated { reminders } => {
            let lines: Vec<String> = reminders
                .iter()
                .map(|reminder| {
                    let mut line = if reminder.is_day_only {
                        format!("📌 {} ({})", reminder.content, reminder.when)
                    } else {
                        format!("⏰ {} ({})", reminder.content, reminder.when)
                    };
                    if reminder.is_important {
                        line.push_str(" ‼️");
                    }
                    if reminder.notification_failed {
                        line.push_str(" - saved, but I couldn't schedule the ping");
                    }
                    line
                })
                .collect();
            format!("Got it:\n{}", lines.join("\n"))
        }
        ComposeContext::Reminder { content } => format!("⏰ Reminder: {}", content),
        ComposeContext::Nag {
            content,
            level,
            remaining,
        } => format!(
            "Nudge #{}: {} is still open. {} more before I let it rest.",
            level, content, remaining
        ),
        ComposeContext::FinalNag { content } => format!(
            "Last nudge on this one: {}. I'll stop pinging, but it stays on your list.",
            content
        ),
        ComposeContext::FollowUp { content } => format!("Did you get to {}?", content),
        ComposeContext::TasksCompleted { contents, guessed } => {
            let done = contents.join(", ");
            if *guessed {
                format!("✅ Marked done: {} (my best guess - tell me if I got the wrong one)", done)
            } else {
                format!("✅ Marked done: {}", done)
            }
        }
        ComposeContext::TaskCancelled { content, guessed } => {
            if *guessed {
                format!("🗑 Cancelled {} (best guess - tell me if that was the wrong one)", content)
            } else {
                format!("🗑 Cancelled {}", content)
            }
        }
        ComposeContext::TaskNotFound { query } => match query {
            Some(query) => format!("I couldn't find a pending task matching \"{}\".", query),
            None => "You don't have any pending tasks.".to_string(),
        },
        ComposeContext::TaskListing { filter, tasks } => {
            if tasks.is_empty() {
                return match filter {
                    TaskFilter::All => "Nothing pending. Enjoy it!".to_string(),
                    TaskFilter::Today => "Nothing due today.".to_string(),
                    TaskFilter::Overdue => "Nothing overdue.".to_string(),
                };
            }
            let heading = match filter {
                TaskFilter::All => "Pending tasks",
                TaskFilter::Today => "Due today",
                TaskFilter::Overdue => "Overdue",
            };
            format!("{}:\n{}", heading, render_lines(tasks))
        }
        ComposeContext::BrainDumpSaved { items } => format!(
            "Captured {} thought{} in your inbox.",
            items.len(),
            plural(items.len())
        ),
        ComposeContext::InboxUpdated {
            added,
            unchecked_total,
        } => format!(
            "Added to inbox: {}. {} open item{} there now.",
            added.join(", "),
            unchecked_total,
            plural(*unchecked_total)
        ),
        ComposeContext::ListChanged {
            name,
            change,
            affected,
        } => {
            let detail = if affected.is_empty() {
                String::new()
            } else {
                format!(": {}", affected.join(", "))
            };
            match change {
                ListChange::Created => format!("Created list \"{}\"{}", name, detail),
                ListChange::ItemsAdded => format!("Added to \"{}\"{}", name, detail),
                ListChange::ItemsRemoved => format!("Removed from \"{}\"{}", name, detail),
                ListChange::ItemsChecked => format!("Checked off in \"{}\"{}", name, detail),
                ListChange::ItemsUnchecked => format!("Unchecked in \"{}\"{}", name, detail),
                ListChange::Renamed => format!("Renamed the list to \"{}\"", name),
                ListChange::Completed => format!("List \"{}\" is complete 🎉", name),
                ListChange::Deleted => format!("Deleted list \"{}\"", name),
            }
        }
        ComposeContext::ListShown { name, items } => {
            if items.is_empty() {
                return format!("\"{}\" is empty.", name);
            }
            let lines: Vec<String> = items
                .iter()
                .map(|item| {
                    let mark = if item.is_checked { "☑" } else { "☐" };
                    format!("{} {}", mark, item.content)
                })
                .collect();
            format!("{}:\n{}", name, lines.join("\n"))
        }
        ComposeContext::ListNotFound { query } => match query {
            Some(query) => format!("I couldn't find a list matching \"{}\".", query),
            None => "You don't have any active lists.".to_string(),
        },
        ComposeContext::CheckinPrompt => {
            "Evening check-in: how did today go, from 1 to 5?".to_string()
        }
        ComposeContext::CheckinRecorded { rating } => {
            format!("Logged today as a {}/5. Thanks for checking in.", rating)
        }
        ComposeContext::WeeklySummary {
            completed,
            best_day,
            average_rating,
            checkins,
        } => {
            let mut text = format!(
                "Your week: {} task{} completed.",
                completed,
                plural(usize::try_from(*completed).unwrap_or(0))
            );
            if let Some(day) = best_day {
                text.push_str(&format!(" Best day: {}.", day));
            }
            if let Some(rating) = average_rating {
                text.push_str(&format!(
                    " Average check-in {:.1}/5 over {} day{}.",
                    rating,
                    checkins,
                    plural(*checkins)
                ));
            }
            text
        }
        ComposeContext::EndOfDay {
            completed_today,
            still_pending,
        } => {
            let mut text = format!("Wrapping up: {} done today.", completed_today);
            if !still_pending.is_empty() {
                text.push_str(&format!("\nStill open:\n{}", render_lines(still_pending)));
            }
            text
        }
        ComposeContext::MorningReview {
            today,
            overdue,
            inbox,
        } => {
            let mut sections = vec!["Good morning!".to_string()];
            if !today.is_empty() {
                sections.push(format!("Today:\n{}", render_lines(today)));
            }
            if !overdue.is_empty() {
                sections.push(format!("Overdue:\n{}", render_lines(overdue)));
            }
            if !inbox.is_empty() {
                let items: Vec<String> = inbox.iter().map(|item| format!("• {}", item)).collect();
                sections.push(format!("Inbox:\n{}", items.join("\n")));
            }
            if sections.len() == 1 {
                sections.push("Your slate is clear today.".to_string());
            }
            sections.join("\n\n")
        }
        ComposeContext::PreferenceUpdated {
            setting,
            time,
            failed,
        } => {
            if failed.is_empty() {
                format!("Done. Your {} is now at {}.", setting.label(), time)
            } else {
                format!(
                    "I set your {} to {}, but couldn't reschedule: {}. Try again in a bit?",
                    setting.label(),
                    time,
                    failed.join(", ")
                )
            }
        }
        ComposeContext::InvalidTime { hour, minute } => format!(
            "{}:{:02} isn't a time I can schedule. Try something like \"9pm\".",
            hour, minute
        ),
        ComposeContext::CampaignsIncomplete { failed } => format!(
            "Heads up: I couldn't set up your {} yet. I'll try again next time you write.",
            failed.join(", ")
        ),
                ComposeContext::Conversation { reply, .. } => reply
            .clone()
            .filter(|reply| !reply.trim().is_empty())
            .unwrap_or_else(|| "I'm here. Tell me what to remind you about.".to_string()),
        ComposeContext::TranscriptionFailed => {
            "Sorry, I couldn't make out that voice note. Could you type it?".to_string()
        }
        ComposeContext::SomethingWentWrong => {
            "Sorry, something went wrong on my side. Please try again.".to_string()
        }
    }
}

fn render_lines(tasks: &[TaskLine]) -> String {
    tasks
        .iter()
        .map(|task| {
            let flag = if task.is_important { " ‼️" } else { "" };
            format!("• {} ({}){}", task.content, task.due, flag)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

/// Uses `fallback_text` directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateComposer;

impl MessageComposer for TemplateComposer {
    fn compose(&self, context: &ComposeContext) -> String {
        fallback_text(context)
    }
}

const PERSONA_PROMPT: &str = r#"You are a warm, slightly cheeky personal assistant who helps people remember things.
You receive a JSON description of what just happened and write the message to send.
Keep it under 80 words, plain text, no markdown headings. Keep every task name, time and number exactly as given.
The "fallback" field shows the facts that must survive."#;

pub struct OpenAiComposer {
    chat: ChatClient,
}

impl OpenAiComposer {
    pub fn new(chat: ChatClient) -> Self {
        Self { chat }
    }
}

impl MessageComposer for OpenAiComposer {
    fn compose(&self, context: &ComposeContext) -> String {
        let fallback = fallback_text(context);
        let payload = serde_json::json!({
            "context": context,
            "fallback": fallback,
        });
        let messages = [
            ChatMessage::system(PERSONA_PROMPT),
            ChatMessage::user(payload.to_string()),
        ];
        match self.chat.complete(&messages, false) {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                warn!("composer unavailable, using fallback text: {}", err);
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::tests::{completion_body, config};

    fn line(content: &str, due: &str) -> TaskLine {
        TaskLine {
            content: content.to_string(),
            due: due.to_string(),
            is_important: false,
        }
    }

    #[test]
    fn fallback_mentions_guess() {
        let text = fallback_text(&ComposeContext::TasksCompleted {
            contents: vec!["call mom".to_string()],
            guessed: true,
        });
        assert!(text.contains("call mom"));
        assert!(text.contains("best guess"));
    }

    #[test]
    fn morning_review_sections() {
        let text = fallback_text(&ComposeContext::MorningReview {
            today: vec![line("buy stamps", "today")],
            overdue: vec![line("pay rent", "2 days ago")],
            inbox: vec!["new bike".to_string()],
        });
        assert!(text.contains("Today:\n• buy stamps (today)"));
        assert!(text.contains("Overdue:\n• pay rent (2 days ago)"));
        assert!(text.contains("Inbox:\n• new bike"));

        let empty = fallback_text(&ComposeContext::MorningReview {
            today: vec![],
            overdue: vec![],
            inbox: vec![],
        });
        assert!(empty.contains("slate is clear"));
    }

    #[test]
    fn preference_partial_failure_is_surfaced() {
        let text = fallback_text(&ComposeContext::PreferenceUpdated {
            setting: PreferenceKind::Checkin,
            time: "9:00 PM".to_string(),
            failed: vec!["weekly summary".to_string()],
        });
        assert!(text.contains("couldn't reschedule: weekly summary"));
    }

    #[test]
    fn context_serializes_with_kind_tag() {
        let value = serde_json::to_value(ComposeContext::Nag {
            content: "pay rent".to_string(),
            level: 2,
            remaining: 3,
        })
        .unwrap();
        assert_eq!(value["kind"], "nag");
        assert_eq!(value["level"], 2);
    }

    #[test]
    fn openai_composer_falls_back_on_error() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .create();
        let composer = OpenAiComposer::new(ChatClient::new(config(&server)).unwrap());
        let context = ComposeContext::Reminder {
            content: "call mom".to_string(),
        };
        assert_eq!(composer.compose(&context), fallback_text(&context));
    }

    #[test]
    fn openai_composer_uses_model_text() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(completion_body("  Hey! Time to call mom 📞  "))
            .create();
        let composer = OpenAiComposer::new(ChatClient::new(config(&server)).unwrap());
        let text = composer.compose(&ComposeContext::Reminder {
            content: "call mom".to_string(),
        });
        assert_eq!(text, "Hey! Time to call mom 📞");
    }
}
