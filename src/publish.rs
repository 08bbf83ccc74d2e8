//! Publisher: per-destination delivery of normalized posts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ApiError;
use crate::pipeline::types::{ContentKind, NormalizedPost};
use crate::telegram::BotApi;

/// Result of one publish attempt, classified for the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The destination accepted the post.
    Delivered { message_id: i64 },
    /// Worth retrying: rate limit, server error, network failure.
    Transient {
        reason: String,
        /// Platform backoff hint, when it gave one.
        retry_after: Option<Duration>,
    },
    /// Retrying cannot help: bad chat, revoked permissions, bad content.
    Permanent { reason: String },
}

/// Delivery seam between the coordinator and the platform.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Attempt to deliver `post` to one destination chat.
    ///
    /// Never errors: every failure mode is folded into the outcome so
    /// the coordinator has exactly one classification point.
    async fn publish(&self, post: &NormalizedPost, dest_chat: i64) -> DeliveryOutcome;
}

/// Publisher backed by the Bot API.
pub struct TelegramPublisher {
    api: Arc<BotApi>,
}

impl TelegramPublisher {
    pub fn new(api: Arc<BotApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn publish(&self, post: &NormalizedPost, dest_chat: i64) -> DeliveryOutcome {
        debug!(
            dest_chat,
            kind = post.kind.label(),
            source_message_id = post.source_message_id,
            "Publishing post"
        );

        let result = match post.kind {
            ContentKind::Text => {
                self.api
                    .send_message(dest_chat, &post.body.text, &post.body.entities)
                    .await
            }
            ContentKind::Photo
            | ContentKind::Video
            | ContentKind::Document
            | ContentKind::Animation
            | ContentKind::Audio
            | ContentKind::Voice => {
                let Some(media) = &post.media else {
                    return DeliveryOutcome::Permanent {
                        reason: format!("{} post without media reference", post.kind.label()),
                    };
                };
                let Some((method, field)) = media_method(post.kind) else {
                    return DeliveryOutcome::Permanent {
                        reason: format!("{} is not a captioned media kind", post.kind.label()),
                    };
                };
                self.api
                    .send_media(
                        method,
                        field,
                        dest_chat,
                        &media.file_id,
                        Some((&post.body.text, &post.body.entities)),
                    )
                    .await
            }
            ContentKind::VideoNote => {
                let Some(media) = &post.media else {
                    return DeliveryOutcome::Permanent {
                        reason: "video_note post without media reference".into(),
                    };
                };
                self.api.send_video_note(dest_chat, &media.file_id).await
            }
            ContentKind::Poll => {
                let Some(spec) = &post.poll else {
                    return DeliveryOutcome::Permanent {
                        reason: "poll post without poll specification".into(),
                    };
                };
                self.api.send_poll(dest_chat, spec).await
            }
        };

        match result {
            Ok(message) => DeliveryOutcome::Delivered {
                message_id: message.message_id,
            },
            Err(e) => classify(e),
        }
    }
}

/// Method name and media body field for a captioned media kind.
///
/// Text, video notes and polls go through dedicated send paths.
fn media_method(kind: ContentKind) -> Option<(&'static str, &'static str)> {
    match kind {
        ContentKind::Photo => Some(("sendPhoto", "photo")),
        ContentKind::Video => Some(("sendVideo", "video")),
        ContentKind::Document => Some(("sendDocument", "document")),
        ContentKind::Animation => Some(("sendAnimation", "animation")),
        ContentKind::Audio => Some(("sendAudio", "audio")),
        ContentKind::Voice => Some(("sendVoice", "voice")),
        ContentKind::Text | ContentKind::VideoNote | ContentKind::Poll => None,
    }
}

/// Fold an API error into a delivery outcome.
pub(crate) fn classify(error: ApiError) -> DeliveryOutcome {
    let retry_after = match &error {
        ApiError::Telegram { retry_after, .. } => retry_after.map(Duration::from_secs),
        _ => None,
    };
    if error.is_transient() {
        DeliveryOutcome::Transient {
            reason: error.to_string(),
            retry_after,
        }
    } else {
        DeliveryOutcome::Permanent {
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_transient_with_hint() {
        let outcome = classify(ApiError::Telegram {
            code: 429,
            description: "Too Many Requests: retry after 7".into(),
            retry_after: Some(7),
        });
        assert_eq!(
            outcome,
            DeliveryOutcome::Transient {
                reason: "Telegram API error 429: Too Many Requests: retry after 7".into(),
                retry_after: Some(Duration::from_secs(7)),
            }
        );
    }

    #[test]
    fn server_error_is_transient() {
        let outcome = classify(ApiError::Telegram {
            code: 502,
            description: "Bad Gateway".into(),
            retry_after: None,
        });
        assert!(matches!(outcome, DeliveryOutcome::Transient { retry_after: None, .. }));
    }

    #[test]
    fn network_error_is_transient() {
        let outcome = classify(ApiError::Network("connection reset".into()));
        assert!(matches!(outcome, DeliveryOutcome::Transient { .. }));
    }

    #[test]
    fn client_rejection_is_permanent() {
        let outcome = classify(ApiError::Telegram {
            code: 403,
            description: "Forbidden: bot is not a member of the channel chat".into(),
            retry_after: None,
        });
        assert!(matches!(outcome, DeliveryOutcome::Permanent { .. }));
    }

    #[test]
    fn media_methods_match_kinds() {
        assert_eq!(media_method(ContentKind::Photo), Some(("sendPhoto", "photo")));
        assert_eq!(media_method(ContentKind::Voice), Some(("sendVoice", "voice")));
        assert_eq!(
            media_method(ContentKind::Animation),
            Some(("sendAnimation", "animation"))
        );
        assert_eq!(media_method(ContentKind::Poll), None);
    }
}
