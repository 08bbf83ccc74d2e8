//! Bot API client over HTTPS.
//!
//! Thin JSON wrapper: every method posts a body, decodes the standard
//! `ApiResponse` envelope, and surfaces platform errors as [`ApiError`]
//! with the error code and any `retry_after` hint intact. Outcome
//! classification (transient vs permanent) belongs to the publisher.

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::ApiError;
use crate::pipeline::types::{PollKind, PollSpec};
use crate::telegram::types::{ApiResponse, Message, MessageEntity, Update};

/// Telegram Bot API client.
pub struct BotApi {
    token: SecretString,
    client: reqwest::Client,
}

impl BotApi {
    pub fn new(token: SecretString) -> Self {
        Self {
            token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.token.expose_secret()
        )
    }

    /// Call one API method and decode the result envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ApiError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("{method}: {e}")))?;

        let status = resp.status();
        // Telegram returns a JSON envelope for error statuses too.
        let envelope: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("{method} ({status}): {e}")))?;

        if envelope.ok {
            envelope
                .result
                .ok_or_else(|| ApiError::InvalidResponse(format!("{method}: ok but no result")))
        } else {
            Err(ApiError::Telegram {
                code: envelope.error_code.unwrap_or_else(|| status.as_u16() as i64),
                description: envelope
                    .description
                    .unwrap_or_else(|| "no description".into()),
                retry_after: envelope.parameters.and_then(|p| p.retry_after),
            })
        }
    }

    /// Long-poll for updates past `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, ApiError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "channel_post", "edited_channel_post"],
            }),
        )
        .await
    }

    /// Send a text message, carrying formatting entities verbatim.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        entities: &[MessageEntity],
    ) -> Result<Message, ApiError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if !entities.is_empty() {
            body["entities"] = serde_json::to_value(entities)
                .map_err(|e| ApiError::InvalidResponse(format!("entity encoding: {e}")))?;
        }
        self.call("sendMessage", body).await
    }

    /// Re-send a media object by file reference with an optional caption.
    ///
    /// `method` is the kind-specific API method ("sendPhoto", ...) and
    /// `field` the matching body field ("photo", ...), both chosen by
    /// the publisher's content-kind dispatch.
    pub async fn send_media(
        &self,
        method: &str,
        field: &str,
        chat_id: i64,
        file_id: &str,
        caption: Option<(&str, &[MessageEntity])>,
    ) -> Result<Message, ApiError> {
        let mut body = json!({ "chat_id": chat_id });
        body[field] = json!(file_id);
        if let Some((text, entities)) = caption
            && !text.is_empty()
        {
            body["caption"] = json!(text);
            if !entities.is_empty() {
                body["caption_entities"] = serde_json::to_value(entities)
                    .map_err(|e| ApiError::InvalidResponse(format!("entity encoding: {e}")))?;
            }
        }
        self.call(method, body).await
    }

    /// Video notes take no caption.
    pub async fn send_video_note(&self, chat_id: i64, file_id: &str) -> Result<Message, ApiError> {
        self.call(
            "sendVideoNote",
            json!({ "chat_id": chat_id, "video_note": file_id }),
        )
        .await
    }

    /// Republish a poll from its full specification.
    pub async fn send_poll(&self, chat_id: i64, spec: &PollSpec) -> Result<Message, ApiError> {
        let mut body = json!({
            "chat_id": chat_id,
            "question": spec.question,
            "options": spec.options,
            "is_anonymous": spec.is_anonymous,
            "allows_multiple_answers": spec.allows_multiple_answers,
        });
        match spec.kind {
            PollKind::Regular => {
                body["type"] = json!("regular");
            }
            PollKind::Quiz => {
                body["type"] = json!("quiz");
                if let Some(correct) = spec.correct_option_id {
                    body["correct_option_id"] = json!(correct);
                }
                if let Some(ref explanation) = spec.explanation {
                    body["explanation"] = json!(explanation);
                }
            }
        }
        self.call("sendPoll", body).await
    }
}
