use reqwest::blocking::multipart::{Form, Part};
use serde::Deserialize;

use crate::llm::{ChatClient, CollaboratorError};

pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Audio bytes to text.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, audio: &[u8]) -> Result<String, CollaboratorError>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI audio transcription over the chat client's HTTP settings.
pub struct WhisperTranscriber {
    chat: ChatClient,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(chat: ChatClient, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
        }
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &[u8]) -> Result<String, CollaboratorError> {
        let config = self.chat.config();
        let api_key = config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(CollaboratorError::NotConfigured("OPENAI_API_KEY"))?;
        let url = format!("{}/audio/transcriptions", config.api_url.trim_end_matches('/'));

        // Telegram voice notes are ogg/opus.
        let file = Part::bytes(audio.to_vec())
            .file_name("voice.ogg")
            .mime_str("audio/ogg")?;
        let form = Form::new().text("model", self.model.clone()).part("file", file);

        let response = self
            .chat
            .http()
            .post(&url)
            .bearer_auth(api_key)
            .multipart(form)
            .send()?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(CollaboratorError::Api { status, body });
        }
        let body: TranscriptionResponse = response.json()?;
        let text = body.text.trim().to_string();
        if text.is_empty() {
            return Err(CollaboratorError::EmptyResponse);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::tests::config;
    use mockito::Matcher;

    #[test]
    fn uploads_audio_and_returns_text() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/audio/transcriptions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::Regex("whisper-1".to_string()))
            .with_status(200)
            .with_body(r#"{"text":" remind me to call mom in two hours "}"#)
            .create();
        let transcriber =
            WhisperTranscriber::new(ChatClient::new(config(&server)).unwrap(), DEFAULT_TRANSCRIPTION_MODEL);
        let text = transcriber.transcribe(&[0u8, 1, 2, 3]).unwrap();
        mock.assert();
        assert_eq!(text, "remind me to call mom in two hours");
    }

    #[test]
    fn blank_transcript_is_an_error() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/audio/transcriptions")
            .with_status(200)
            .with_body(r#"{"text":"   "}"#)
            .create();
        let transcriber = WhisperTranscriber::new(ChatClient::new(config(&server)).unwrap(), "whisper-1");
        assert!(matches!(
            transcriber.transcribe(b"audio"),
            Err(CollaboratorError::EmptyResponse)
        ));
    }
}
