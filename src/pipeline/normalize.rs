//! Content normalization: wire messages into [`NormalizedPost`]s.

use crate::error::NormalizeError;
use crate::pipeline::types::{
    ContentKind, MediaRef, NormalizedPost, PollKind, PollSpec, RichText,
};
use crate::telegram::types::Message;

/// Map an inbound channel post onto the relay's uniform representation.
///
/// Exactly one content field of the wire message wins; anything the
/// closed [`ContentKind`] set does not cover is rejected so the caller
/// can drop the post with a log line instead of guessing.
pub fn normalize(message: &Message) -> Result<NormalizedPost, NormalizeError> {
    let source_chat = message.chat.id;
    let source_message_id = message.message_id;

    let (kind, body, media, poll) = if let Some(text) = &message.text {
        (
            ContentKind::Text,
            RichText {
                text: text.clone(),
                entities: message.entities.clone().unwrap_or_default(),
            },
            None,
            None,
        )
    } else if let Some(sizes) = &message.photo {
        // Sizes come smallest-first; mirror the largest rendition.
        let largest = sizes.last().ok_or_else(|| NormalizeError::UnsupportedContent {
            detail: "photo message with no sizes".into(),
        })?;
        (
            ContentKind::Photo,
            caption(message),
            Some(MediaRef {
                file_id: largest.file_id.clone(),
            }),
            None,
        )
    } else if let Some(video) = &message.video {
        (ContentKind::Video, caption(message), Some(file_ref(&video.file_id)), None)
    } else if let Some(document) = &message.document {
        (
            ContentKind::Document,
            caption(message),
            Some(file_ref(&document.file_id)),
            None,
        )
    } else if let Some(animation) = &message.animation {
        (
            ContentKind::Animation,
            caption(message),
            Some(file_ref(&animation.file_id)),
            None,
        )
    } else if let Some(audio) = &message.audio {
        (ContentKind::Audio, caption(message), Some(file_ref(&audio.file_id)), None)
    } else if let Some(voice) = &message.voice {
        (ContentKind::Voice, caption(message), Some(file_ref(&voice.file_id)), None)
    } else if let Some(note) = &message.video_note {
        // Video notes carry no caption on the platform.
        (
            ContentKind::VideoNote,
            RichText::default(),
            Some(file_ref(&note.file_id)),
            None,
        )
    } else if let Some(poll) = &message.poll {
        let quiz = poll.kind == "quiz";
        (
            ContentKind::Poll,
            RichText::default(),
            None,
            Some(PollSpec {
                question: poll.question.clone(),
                options: poll.options.iter().map(|o| o.text.clone()).collect(),
                is_anonymous: poll.is_anonymous,
                allows_multiple_answers: poll.allows_multiple_answers,
                kind: if quiz { PollKind::Quiz } else { PollKind::Regular },
                // Quiz fields only carry over for quizzes.
                correct_option_id: quiz.then_some(poll.correct_option_id).flatten(),
                explanation: if quiz { poll.explanation.clone() } else { None },
            }),
        )
    } else {
        return Err(NormalizeError::UnsupportedContent {
            detail: format!("message {source_message_id} in chat {source_chat}"),
        });
    };

    Ok(NormalizedPost {
        kind,
        body,
        media,
        poll,
        source_chat,
        source_message_id,
    })
}

fn caption(message: &Message) -> RichText {
    RichText {
        text: message.caption.clone().unwrap_or_default(),
        entities: message.caption_entities.clone().unwrap_or_default(),
    }
}

fn file_ref(file_id: &str) -> MediaRef {
    MediaRef {
        file_id: file_id.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::types::{Chat, FileRef, PhotoSize, Poll, PollOption};

    fn base_message() -> Message {
        Message {
            message_id: 10,
            chat: Chat {
                id: -100555,
                kind: "channel".into(),
                title: Some("Src".into()),
            },
            from: None,
            text: None,
            entities: None,
            caption: None,
            caption_entities: None,
            photo: None,
            video: None,
            document: None,
            animation: None,
            audio: None,
            voice: None,
            video_note: None,
            poll: None,
        }
    }

    #[test]
    fn text_post_keeps_entities() {
        let mut msg = base_message();
        msg.text = Some("bold link".into());
        msg.entities = Some(vec![crate::telegram::types::MessageEntity::span("bold", 0, 4)]);

        let post = normalize(&msg).unwrap();
        assert_eq!(post.kind, ContentKind::Text);
        assert_eq!(post.body.text, "bold link");
        assert_eq!(post.body.entities.len(), 1);
        assert_eq!(post.source_chat, -100555);
        assert_eq!(post.source_message_id, 10);
    }

    #[test]
    fn photo_takes_largest_size() {
        let mut msg = base_message();
        msg.photo = Some(vec![
            PhotoSize {
                file_id: "small".into(),
                width: 90,
                height: 90,
            },
            PhotoSize {
                file_id: "large".into(),
                width: 1280,
                height: 1280,
            },
        ]);
        msg.caption = Some("a cat".into());

        let post = normalize(&msg).unwrap();
        assert_eq!(post.kind, ContentKind::Photo);
        assert_eq!(post.media.unwrap().file_id, "large");
        assert_eq!(post.body.text, "a cat");
    }

    #[test]
    fn media_without_caption_gets_empty_body() {
        let mut msg = base_message();
        msg.video = Some(FileRef {
            file_id: "vid".into(),
        });
        let post = normalize(&msg).unwrap();
        assert_eq!(post.kind, ContentKind::Video);
        assert!(post.body.is_empty());
    }

    #[test]
    fn quiz_poll_keeps_quiz_fields() {
        let mut msg = base_message();
        msg.poll = Some(Poll {
            question: "2 + 2?".into(),
            options: vec![
                PollOption { text: "3".into() },
                PollOption { text: "4".into() },
            ],
            is_anonymous: true,
            kind: "quiz".into(),
            allows_multiple_answers: false,
            correct_option_id: Some(1),
            explanation: Some("arithmetic".into()),
        });

        let spec = normalize(&msg).unwrap().poll.unwrap();
        assert_eq!(spec.kind, PollKind::Quiz);
        assert_eq!(spec.correct_option_id, Some(1));
        assert_eq!(spec.explanation.as_deref(), Some("arithmetic"));
        assert_eq!(spec.options, vec!["3", "4"]);
    }

    #[test]
    fn regular_poll_drops_quiz_fields() {
        let mut msg = base_message();
        msg.poll = Some(Poll {
            question: "Lunch?".into(),
            options: vec![
                PollOption { text: "yes".into() },
                PollOption { text: "no".into() },
            ],
            is_anonymous: false,
            kind: "regular".into(),
            allows_multiple_answers: true,
            correct_option_id: Some(0),
            explanation: Some("noise".into()),
        });

        let spec = normalize(&msg).unwrap().poll.unwrap();
        assert_eq!(spec.kind, PollKind::Regular);
        assert!(spec.correct_option_id.is_none());
        assert!(spec.explanation.is_none());
        assert!(spec.allows_multiple_answers);
        assert!(!spec.is_anonymous);
    }

    #[test]
    fn video_note_has_no_caption() {
        let mut msg = base_message();
        msg.video_note = Some(FileRef {
            file_id: "note".into(),
        });
        msg.caption = Some("ignored".into());
        let post = normalize(&msg).unwrap();
        assert_eq!(post.kind, ContentKind::VideoNote);
        assert!(post.body.is_empty());
    }

    #[test]
    fn unsupported_content_is_rejected() {
        let msg = base_message();
        assert!(matches!(
            normalize(&msg),
            Err(NormalizeError::UnsupportedContent { .. })
        ));
    }
}
