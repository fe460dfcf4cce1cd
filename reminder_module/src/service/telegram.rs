use serde::Deserialize;

use crate::assistant::{InboundContent, InboundMessage};

/// Webhook update from Telegram. Only the fields the assistant reads.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub edited_message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub voice: Option<TelegramVoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramVoice {
    pub file_id: String,
    pub duration: Option<u32>,
}

/// Why an update produced no inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoredUpdate {
    NoMessage,
    FromBot,
    NoContent,
}

impl IgnoredUpdate {
    pub fn as_str(self) -> &'static str {
        match self {
            IgnoredUpdate::NoMessage => "no_message",
            IgnoredUpdate::FromBot => "from_bot",
            IgnoredUpdate::NoContent => "no_content",
        }
    }
}

impl TelegramUpdate {
    /// Text (or caption) wins over a voice note when both are present.
    pub fn into_inbound(self) -> Result<InboundMessage, IgnoredUpdate> {
        let message = self
            .message
            .or(self.edited_message)
            .ok_or(IgnoredUpdate::NoMessage)?;
        if message.from.as_ref().is_some_and(|from| from.is_bot) {
            return Err(IgnoredUpdate::FromBot);
        }

        let chat_id = message.chat.id.to_string();
        let text = message
            .text
            .or(message.caption)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        let content = match (text, message.voice) {
            (Some(text), _) => InboundContent::Text(text),
            (None, Some(voice)) => InboundContent::Voice {
                file_id: voice.file_id,
            },
            (None, None) => return Err(IgnoredUpdate::NoContent),
        };
        Ok(InboundMessage { chat_id, content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<InboundMessage, IgnoredUpdate> {
        serde_json::from_str::<TelegramUpdate>(raw).unwrap().into_inbound()
    }

    #[test]
    fn parses_text_message() {
        let message = parse(
            r#"{
                "update_id": 10,
                "message": {
                    "message_id": 1,
                    "from": {"id": 42, "is_bot": false, "first_name": "Sam"},
                    "chat": {"id": 42, "type": "private"},
                    "date": 1760882400,
                    "text": "  remind me to call mom  "
                }
            }"#,
        )
        .unwrap();
        assert_eq!(message, InboundMessage::text("42", "remind me to call mom"));
    }

    #[test]
    fn parses_voice_message() {
        let message = parse(
            r#"{
                "update_id": 11,
                "message": {
                    "message_id": 2,
                    "from": {"id": 42, "is_bot": false},
                    "chat": {"id": 42, "type": "private"},
                    "date": 1760882400,
                    "voice": {"file_id": "AwACAgIAAxk", "file_unique_id": "x", "duration": 3}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(
            message.content,
            InboundContent::Voice {
                file_id: "AwACAgIAAxk".to_string()
            }
        );
    }

    #[test]
    fn edited_message_is_used_when_no_message() {
        let message = parse(
            r#"{
                "update_id": 12,
                "edited_message": {
                    "message_id": 3,
                    "chat": {"id": -100, "type": "group"},
                    "date": 1760882400,
                    "text": "done"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(message.chat_id, "-100");
    }

    #[test]
    fn ignores_bots_and_empty_updates() {
        let from_bot = parse(
            r#"{
                "update_id": 13,
                "message": {
                    "message_id": 4,
                    "from": {"id": 7, "is_bot": true},
                    "chat": {"id": 42},
                    "text": "hello"
                }
            }"#,
        );
        assert_eq!(from_bot, Err(IgnoredUpdate::FromBot));

        let sticker = parse(
            r#"{"update_id": 14, "message": {"message_id": 5, "chat": {"id": 42}}}"#,
        );
        assert_eq!(sticker, Err(IgnoredUpdate::NoContent));

        let callback_query = parse(r#"{"update_id": 15}"#);
        assert_eq!(callback_query, Err(IgnoredUpdate::NoMessage));
    }
}
