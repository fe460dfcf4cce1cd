use send_messages_module::{download_file, send_message, ParseMode, SendMessageError, SendMessageParams};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("telegram error: {0}")]
    Telegram(#[from] SendMessageError),
    #[error("transport not configured: {0}")]
    NotConfigured(&'static str),
    #[error("transport failure: {0}")]
    Other(String),
}

/// Outbound channel to the user.
pub trait MessageTransport: Send + Sync {
    /// Sends `text`, rich-formatted first with a plain-text retry.
    fn send(&self, chat_id: &str, text: &str) -> Result<(), TransportError>;
    /// Downloads a voice note the user sent.
    fn fetch_voice(&self, file_id: &str) -> Result<Vec<u8>, TransportError>;
}

#[derive(Debug, Clone)]
pub struct TelegramTransport {
    bot_token: String,
    api_base: Option<String>,
}

impl TelegramTransport {
    pub fn new(bot_token: impl Into<String>, api_base: Option<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base,
        }
    }
}

impl MessageTransport for TelegramTransport {
    fn send(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
        if self.bot_token.trim().is_empty() {
            return Err(TransportError::NotConfigured("TELEGRAM_BOT_TOKEN"));
        }
        let params = SendMessageParams {
            bot_token: self.bot_token.clone(),
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            parse_mode: Some(ParseMode::Html),
            api_base: self.api_base.clone(),
        };
        let response = send_message(&params)?;
        if response.sent_as_plain_text {
            info!("message to chat {} fell back to plain text", chat_id);
        }
        debug!("sent telegram message {} to chat {}", response.message_id, chat_id);
        Ok(())
    }

    fn fetch_voice(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        if self.bot_token.trim().is_empty() {
            return Err(TransportError::NotConfigured("TELEGRAM_BOT_TOKEN"));
        }
        Ok(download_file(&self.bot_token, file_id, self.api_base.as_deref())?)
    }
}
