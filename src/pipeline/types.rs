//! Shared types for the mirroring pipeline.

use crate::telegram::types::MessageEntity;

/// Closed set of content kinds the relay mirrors.
///
/// Anything outside this enum is dropped at normalization; the publisher
/// matches on it exhaustively, so adding a kind forces every publish
/// path to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    Photo,
    Video,
    Document,
    Animation,
    Audio,
    Voice,
    VideoNote,
    Poll,
}

impl ContentKind {
    /// Stable label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Photo => "photo",
            ContentKind::Video => "video",
            ContentKind::Document => "document",
            ContentKind::Animation => "animation",
            ContentKind::Audio => "audio",
            ContentKind::Voice => "voice",
            ContentKind::VideoNote => "video_note",
            ContentKind::Poll => "poll",
        }
    }
}

/// Plain text plus structured formatting spans.
///
/// Entities stay in Telegram's native representation (UTF-16 offsets)
/// so republishing round-trips formatting losslessly; the rule engine
/// remaps spans when it edits the text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RichText {
    pub text: String,
    pub entities: Vec<MessageEntity>,
}

impl RichText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            entities: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Opaque reference to the originating media object.
///
/// Sufficient for the publisher to re-send by reference; pixel/byte
/// data is never fetched or re-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub file_id: String,
}

/// Regular vote or quiz with a correct answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    Regular,
    Quiz,
}

/// Full poll specification, carried losslessly to the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSpec {
    pub question: String,
    pub options: Vec<String>,
    pub is_anonymous: bool,
    pub allows_multiple_answers: bool,
    pub kind: PollKind,
    /// Quiz only.
    pub correct_option_id: Option<i64>,
    /// Quiz only.
    pub explanation: Option<String>,
}

/// Uniform internal representation of one inbound post.
///
/// Created once per event by the normalizer and treated as immutable;
/// the rule engine produces a rewritten copy via [`with_body`].
///
/// [`with_body`]: NormalizedPost::with_body
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPost {
    pub kind: ContentKind,
    /// Message text or media caption.
    pub body: RichText,
    pub media: Option<MediaRef>,
    pub poll: Option<PollSpec>,
    pub source_chat: i64,
    pub source_message_id: i64,
}

impl NormalizedPost {
    /// Copy of the post with a rewritten body; everything else is shared.
    pub fn with_body(&self, body: RichText) -> Self {
        Self {
            body,
            ..self.clone()
        }
    }
}
