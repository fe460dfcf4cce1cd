//! Outbound messaging over the Telegram Bot API.
//!
//! `send_message` tries the requested rich formatting first and, when Telegram
//! rejects the entities, resends the same text as plain text.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const ENTITY_PARSE_ERROR: &str = "can't parse entities";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Html,
    MarkdownV2,
}

impl ParseMode {
    fn as_api_str(self) -> &'static str {
        match self {
            ParseMode::Html => "HTML",
            ParseMode::MarkdownV2 => "MarkdownV2",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendMessageParams {
    pub bot_token: String,
    pub chat_id: String,
    pub text: String,
    pub parse_mode: Option<ParseMode>,
    /// Overrides the Bot API host (tests, self-hosted Bot API servers).
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageResponse {
    pub message_id: i64,
    /// True when the rich-formatted attempt was rejected and plain text was sent.
    pub sent_as_plain_text: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SendMessageError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram api error ({status}): {description}")]
    Api { status: u16, description: String },
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

impl SendMessageError {
    fn is_entity_parse_error(&self) -> bool {
        matches!(self, SendMessageError::Api { description, .. }
            if description.to_ascii_lowercase().contains(ENTITY_PARSE_ERROR))
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    #[serde(default)]
    file_path: Option<String>,
}

pub fn send_message(params: &SendMessageParams) -> Result<SendMessageResponse, SendMessageError> {
    if params.bot_token.trim().is_empty() {
        return Err(SendMessageError::InvalidParams("bot token is empty".to_string()));
    }
    if params.chat_id.trim().is_empty() {
        return Err(SendMessageError::InvalidParams("chat id is empty".to_string()));
    }
    if params.text.trim().is_empty() {
        return Err(SendMessageError::InvalidParams("message text is empty".to_string()));
    }

    let client = build_client()?;
    let url = api_url(params.api_base.as_deref(), &params.bot_token, "sendMessage");

    let Some(mode) = params.parse_mode else {
        let message_id = post_send(&client, &url, params, None)?;
        return Ok(SendMessageResponse {
            message_id,
            sent_as_plain_text: true,
        });
    };

    match post_send(&client, &url, params, Some(mode)) {
        Ok(message_id) => Ok(SendMessageResponse {
            message_id,
            sent_as_plain_text: false,
        }),
        Err(err) if err.is_entity_parse_error() => {
            let message_id = post_send(&client, &url, params, None)?;
            Ok(SendMessageResponse {
                message_id,
                sent_as_plain_text: true,
            })
        }
        Err(err) => Err(err),
    }
}

/// Download a file (e.g. a voice note) previously sent to the bot.
pub fn download_file(
    bot_token: &str,
    file_id: &str,
    api_base: Option<&str>,
) -> Result<Vec<u8>, SendMessageError> {
    if file_id.trim().is_empty() {
        return Err(SendMessageError::InvalidParams("file id is empty".to_string()));
    }
    let client = build_client()?;
    let url = api_url(api_base, bot_token, "getFile");
    let response = client.get(&url).query(&[("file_id", file_id)]).send()?;
    let status = response.status().as_u16();
    let body: ApiResponse<FileInfo> = response.json()?;
    if !body.ok {
        return Err(SendMessageError::Api {
            status,
            description: body.description.unwrap_or_else(|| "unknown error".to_string()),
        });
    }
    let file_path = body
        .result
        .and_then(|info| info.file_path)
        .ok_or_else(|| SendMessageError::Api {
            status,
            description: "file path missing from getFile response".to_string(),
        })?;

    let base = api_base.unwrap_or(DEFAULT_TELEGRAM_API_BASE).trim_end_matches('/');
    let download_url = format!("{}/file/bot{}/{}", base, bot_token, file_path);
    let response = client.get(&download_url).send()?;
    if !response.status().is_success() {
        return Err(SendMessageError::Api {
            status: response.status().as_u16(),
            description: "file download failed".to_string(),
        });
    }
    Ok(response.bytes()?.to_vec())
}

fn post_send(
    client: &reqwest::blocking::Client,
    url: &str,
    params: &SendMessageParams,
    mode: Option<ParseMode>,
) -> Result<i64, SendMessageError> {
    let request = SendMessageRequest {
        chat_id: &params.chat_id,
        text: &params.text,
        parse_mode: mode.map(ParseMode::as_api_str),
    };
    let response = client.post(url).json(&request).send()?;
    let status = response.status().as_u16();
    let body: ApiResponse<SentMessage> = response.json()?;
    if !body.ok {
        return Err(SendMessageError::Api {
            status,
            description: body.description.unwrap_or_else(|| "unknown error".to_string()),
        });
    }
    Ok(body.result.map(|message| message.message_id).unwrap_or_default())
}

fn build_client() -> Result<reqwest::blocking::Client, SendMessageError> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

fn api_url(api_base: Option<&str>, bot_token: &str, method: &str) -> String {
    let base = api_base.unwrap_or(DEFAULT_TELEGRAM_API_BASE).trim_end_matches('/');
    format!("{}/bot{}/{}", base, bot_token, method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn params(server: &mockito::ServerGuard, mode: Option<ParseMode>) -> SendMessageParams {
        SendMessageParams {
            bot_token: "TOKEN".to_string(),
            chat_id: "42".to_string(),
            text: "<b>call mom</b>".to_string(),
            parse_mode: mode,
            api_base: Some(server.url()),
        }
    }

    #[test]
    fn sends_html_message() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(Matcher::Json(json!({
                "chat_id": "42",
                "text": "<b>call mom</b>",
                "parse_mode": "HTML"
            })))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":{"message_id":7}}"#)
            .create();

        let response = send_message(&params(&server, Some(ParseMode::Html))).unwrap();
        mock.assert();
        assert_eq!(response.message_id, 7);
        assert!(!response.sent_as_plain_text);
    }

    #[test]
    fn retries_as_plain_text_on_entity_error() {
        let mut server = mockito::Server::new();
        let rich = server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(Matcher::Json(json!({
                "chat_id": "42",
                "text": "<b>call mom</b>",
                "parse_mode": "HTML"
            })))
            .with_status(400)
            .with_body(
                r#"{"ok":false,"description":"Bad Request: can't parse entities: unclosed tag"}"#,
            )
            .create();
        let plain = server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(Matcher::Json(json!({
                "chat_id": "42",
                "text": "<b>call mom</b>"
            })))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":{"message_id":8}}"#)
            .create();

        let response = send_message(&params(&server, Some(ParseMode::Html))).unwrap();
        rich.assert();
        plain.assert();
        assert_eq!(response.message_id, 8);
        assert!(response.sent_as_plain_text);
    }

    #[test]
    fn other_api_errors_are_not_retried() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/botTOKEN/sendMessage")
            .with_status(403)
            .with_body(r#"{"ok":false,"description":"Forbidden: bot was blocked by the user"}"#)
            .expect(1)
            .create();

        let err = send_message(&params(&server, Some(ParseMode::Html))).unwrap_err();
        mock.assert();
        match err {
            SendMessageError::Api { status, description } => {
                assert_eq!(status, 403);
                assert!(description.contains("blocked"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_empty_text() {
        let server = mockito::Server::new();
        let mut p = params(&server, None);
        p.text = "   ".to_string();
        assert!(matches!(
            send_message(&p),
            Err(SendMessageError::InvalidParams(_))
        ));
    }

    #[test]
    fn downloads_file_via_get_file() {
        let mut server = mockito::Server::new();
        let lookup = server
            .mock("GET", "/botTOKEN/getFile")
            .match_query(Matcher::UrlEncoded("file_id".into(), "voice-1".into()))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":{"file_path":"voice/file_3.oga"}}"#)
            .create();
        let download = server
            .mock("GET", "/file/botTOKEN/voice/file_3.oga")
            .with_status(200)
            .with_body(vec![1u8, 2, 3])
            .create();

        let bytes = download_file("TOKEN", "voice-1", Some(&server.url())).unwrap();
        lookup.assert();
        download.assert();
        assert_eq!(bytes, vec![1, 2, 3]);
    }
}
