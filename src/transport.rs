//! Update transport: long-polls the Bot API and routes updates.
//!
//! Channel posts go into the bounded event queue for the coordinator;
//! private messages go to the admin handler inline. The queue applies
//! backpressure: when the coordinator falls behind, polling waits
//! instead of buffering without bound.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::admin::AdminHandler;
use crate::telegram::BotApi;
use crate::telegram::types::{Message, Update};

/// Pause before re-polling after a failed getUpdates call.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct UpdateDispatcher {
    api: Arc<BotApi>,
    admin: Arc<AdminHandler>,
    events: mpsc::Sender<Message>,
    poll_timeout_secs: u64,
}

impl UpdateDispatcher {
    pub fn new(
        api: Arc<BotApi>,
        admin: Arc<AdminHandler>,
        events: mpsc::Sender<Message>,
        poll_timeout_secs: u64,
    ) -> Self {
        Self {
            api,
            admin,
            events,
            poll_timeout_secs,
        }
    }

    /// Poll until `shutdown` flips to true, then drop the event sender
    /// so the coordinator can drain and stop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut offset = 0i64;
        info!("Update polling started");
        loop {
            let updates = tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                result = self.api.get_updates(offset, self.poll_timeout_secs) => match result {
                    Ok(updates) => updates,
                    Err(e) => {
                        warn!(error = %e, "getUpdates failed, backing off");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                },
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                self.route(update).await;
            }
        }
        info!("Update polling stopped");
    }

    async fn route(&self, update: Update) {
        if let Some(message) = update.message {
            if message.chat.kind == "private" {
                self.admin.handle_private(&message).await;
            }
            return;
        }

        if let Some(post) = update.channel_post {
            if self.admin.handle_channel_command(&post).await {
                return;
            }
            self.enqueue(post).await;
            return;
        }

        if let Some(edited) = update.edited_channel_post {
            // Edits re-enter the pipeline; the ledger keeps already
            // delivered destinations from being posted twice.
            debug!(
                source_chat = edited.chat.id,
                source_message_id = edited.message_id,
                "Edited channel post"
            );
            self.enqueue(edited).await;
        }
    }

    async fn enqueue(&self, message: Message) {
        if self.events.send(message).await.is_err() {
            warn!("Event queue closed, dropping post");
        }
    }
}
