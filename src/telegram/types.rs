//! Serde wire types for the subset of the Bot API the relay uses.
//!
//! Unknown fields are ignored on deserialization; optional fields are
//! skipped on serialization so outgoing entity lists round-trip exactly
//! what the platform gave us.

use serde::{Deserialize, Serialize};

/// One long-poll update.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub channel_post: Option<Message>,
    #[serde(default)]
    pub edited_channel_post: Option<Message>,
}

/// Chat a message belongs to.
#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Sender of a private-chat message. Channel posts carry no user.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// An inbound message or channel post.
///
/// Exactly one content field is populated per message; `normalize`
/// maps this shape onto the closed [`ContentKind`] enum.
///
/// [`ContentKind`]: crate::pipeline::types::ContentKind
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Option<Vec<MessageEntity>>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub caption_entities: Option<Vec<MessageEntity>>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    pub video: Option<FileRef>,
    #[serde(default)]
    pub document: Option<FileRef>,
    #[serde(default)]
    pub animation: Option<FileRef>,
    #[serde(default)]
    pub audio: Option<FileRef>,
    #[serde(default)]
    pub voice: Option<FileRef>,
    #[serde(default)]
    pub video_note: Option<FileRef>,
    #[serde(default)]
    pub poll: Option<Poll>,
}

/// A formatting span over a message's text, in UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: i64,
    pub length: i64,
    /// Target URL for `text_link` entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Language for `pre` entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_emoji_id: Option<String>,
}

impl MessageEntity {
    /// A plain formatting span with no payload (bold, italic, code, ...).
    pub fn span(kind: &str, offset: i64, length: i64) -> Self {
        Self {
            kind: kind.into(),
            offset,
            length,
            url: None,
            language: None,
            custom_emoji_id: None,
        }
    }
}

/// One resolution of a photo. Telegram lists sizes smallest-first.
#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

/// Any non-photo media object; only the file reference matters here.
#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
}

/// A native poll attached to a channel post.
#[derive(Debug, Clone, Deserialize)]
pub struct Poll {
    pub question: String,
    pub options: Vec<PollOption>,
    #[serde(default = "default_true")]
    pub is_anonymous: bool,
    /// "regular" or "quiz".
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub allows_multiple_answers: bool,
    #[serde(default)]
    pub correct_option_id: Option<i64>,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollOption {
    pub text: String,
}

fn default_true() -> bool {
    true
}

/// Envelope every Bot API method returns.
///
/// The explicit bound keeps `#[serde(default)]` on `result` from
/// inferring a `T: Default` requirement.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    #[serde(default)]
    pub retry_after: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_with_channel_post_parses() {
        let raw = r#"{
            "update_id": 42,
            "channel_post": {
                "message_id": 7,
                "chat": {"id": -100123, "type": "channel", "title": "News"},
                "text": "hello",
                "entities": [{"type": "bold", "offset": 0, "length": 5}]
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        assert_eq!(update.update_id, 42);
        let post = update.channel_post.unwrap();
        assert_eq!(post.chat.id, -100123);
        assert_eq!(post.text.as_deref(), Some("hello"));
        assert_eq!(post.entities.unwrap()[0].kind, "bold");
    }

    #[test]
    fn quiz_poll_parses() {
        let raw = r#"{
            "question": "2 + 2?",
            "options": [{"text": "3", "voter_count": 0}, {"text": "4", "voter_count": 1}],
            "is_anonymous": true,
            "type": "quiz",
            "allows_multiple_answers": false,
            "correct_option_id": 1
        }"#;
        let poll: Poll = serde_json::from_str(raw).unwrap();
        assert_eq!(poll.kind, "quiz");
        assert_eq!(poll.correct_option_id, Some(1));
        assert_eq!(poll.options.len(), 2);
    }

    #[test]
    fn entity_serializes_without_empty_fields() {
        let entity = MessageEntity::span("italic", 3, 4);
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["type"], "italic");
        assert!(json.get("url").is_none());
        assert!(json.get("language").is_none());
    }

    // Message has no Default impl; this only compiles if the envelope's
    // deserialize bound is T: Deserialize alone.
    #[test]
    fn ok_envelope_parses_result() {
        let raw = r#"{
            "ok": true,
            "result": {
                "message_id": 3,
                "chat": {"id": -100321, "type": "channel"}
            }
        }"#;
        let resp: ApiResponse<Message> = serde_json::from_str(raw).unwrap();
        assert!(resp.ok);
        assert_eq!(resp.result.unwrap().message_id, 3);
    }

    #[test]
    fn error_envelope_parses() {
        let raw = r#"{
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 7",
            "parameters": {"retry_after": 7}
        }"#;
        let resp: ApiResponse<Message> = serde_json::from_str(raw).unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.error_code, Some(429));
        assert_eq!(resp.parameters.unwrap().retry_after, Some(7));
    }
}
