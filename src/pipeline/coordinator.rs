//! Mirror coordinator: drives one post through the whole pipeline.
//!
//! Per inbound event: normalize, snapshot the configuration, resolve
//! destinations, rewrite links once, then fan out. Destinations are
//! independent: each gets its own ledger record, retry loop, and final
//! status, so one broken destination never blocks the others. The
//! semaphore bounds concurrent publish calls across all in-flight
//! events.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::RetryPolicy;
use crate::ledger::{DeliveryLedger, DeliveryRecord, DeliveryStatus};
use crate::pipeline::normalize::normalize;
use crate::pipeline::types::NormalizedPost;
use crate::publish::{DeliveryOutcome, Publisher};
use crate::state::SharedConfig;
use crate::telegram::types::Message;

/// Final state of one destination within a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestResult {
    Delivered,
    Failed,
    Skipped,
}

/// Aggregate outcome of mirroring one source post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorReport {
    pub source_chat: i64,
    pub source_message_id: i64,
    pub delivered: Vec<i64>,
    pub failed: Vec<i64>,
    /// Destinations skipped because the ledger already marked them delivered.
    pub skipped: Vec<i64>,
}

pub struct MirrorCoordinator {
    config: Arc<SharedConfig>,
    publisher: Arc<dyn Publisher>,
    ledger: Arc<dyn DeliveryLedger>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl MirrorCoordinator {
    pub fn new(
        config: Arc<SharedConfig>,
        publisher: Arc<dyn Publisher>,
        ledger: Arc<dyn DeliveryLedger>,
        max_concurrent_publishes: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            config,
            publisher,
            ledger,
            permits: Arc::new(Semaphore::new(max_concurrent_publishes.max(1))),
            retry,
        }
    }

    /// Mirror one channel post to every mapped destination.
    ///
    /// Returns `None` when the post is unsupported content; unmapped
    /// sources settle with an empty report.
    pub async fn process(&self, message: &Message) -> Option<MirrorReport> {
        let post = match normalize(message) {
            Ok(post) => post,
            Err(e) => {
                warn!(
                    source_chat = message.chat.id,
                    source_message_id = message.message_id,
                    error = %e,
                    "Dropping unsupported post"
                );
                return None;
            }
        };

        // One snapshot for the whole event; a concurrent admin mutation
        // never mixes configurations within a fan-out.
        let snapshot = self.config.snapshot();
        let destinations = snapshot.routing.resolve(post.source_chat);

        let mut report = MirrorReport {
            source_chat: post.source_chat,
            source_message_id: post.source_message_id,
            delivered: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        };

        if destinations.is_empty() {
            debug!(source_chat = post.source_chat, "No mappings for source, ignoring post");
            return Some(report);
        }

        // Rewrite once; all destinations receive the identical post.
        let rewritten = post.with_body(snapshot.rules.rewrite(&post.body));
        let shared = Arc::new(rewritten);

        let results = join_all(
            destinations
                .iter()
                .map(|&dest| self.dispatch(Arc::clone(&shared), dest)),
        )
        .await;

        for (dest, result) in destinations.into_iter().zip(results) {
            match result {
                DestResult::Delivered => report.delivered.push(dest),
                DestResult::Failed => report.failed.push(dest),
                DestResult::Skipped => report.skipped.push(dest),
            }
        }

        info!(
            source_chat = report.source_chat,
            source_message_id = report.source_message_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Post settled"
        );
        Some(report)
    }

    /// Deliver to one destination: dedup, retry, record.
    async fn dispatch(&self, post: Arc<NormalizedPost>, dest_chat: i64) -> DestResult {
        match self
            .ledger
            .get(post.source_chat, post.source_message_id, dest_chat)
            .await
        {
            Ok(Some(record)) if record.status == DeliveryStatus::Delivered => {
                debug!(
                    dest_chat,
                    source_message_id = post.source_message_id,
                    "Already delivered, skipping"
                );
                return DestResult::Skipped;
            }
            Ok(_) => {}
            // A ledger read failure degrades to re-delivery, not loss.
            Err(e) => warn!(dest_chat, error = %e, "Ledger read failed, publishing anyway"),
        }

        let mut record = DeliveryRecord::pending(post.source_chat, post.source_message_id, dest_chat);
        self.persist(&record).await;

        loop {
            record.attempts += 1;
            // The permit covers only the publish call itself; a backoff
            // wait must not keep a rate-limited destination occupying
            // the pool.
            let outcome = {
                let _permit = match self.permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        // Semaphore closed only happens during teardown.
                        warn!(dest_chat, "Publish pool closed, abandoning delivery");
                        return DestResult::Failed;
                    }
                };
                self.publisher.publish(&post, dest_chat).await
            };
            match outcome {
                DeliveryOutcome::Delivered { message_id } => {
                    record.status = DeliveryStatus::Delivered;
                    record.dest_message_id = Some(message_id);
                    record.last_error = None;
                    record.updated_at = chrono::Utc::now();
                    self.persist(&record).await;
                    debug!(dest_chat, dest_message_id = message_id, "Delivered");
                    return DestResult::Delivered;
                }
                DeliveryOutcome::Transient { reason, retry_after } => {
                    record.last_error = Some(reason.clone());
                    if record.attempts >= self.retry.max_attempts {
                        record.status = DeliveryStatus::Failed;
                        record.updated_at = chrono::Utc::now();
                        self.persist(&record).await;
                        warn!(
                            dest_chat,
                            attempts = record.attempts,
                            reason = %reason,
                            "Delivery failed after exhausting retries"
                        );
                        return DestResult::Failed;
                    }
                    // Honor the platform's backoff hint over our own.
                    let delay = retry_after.unwrap_or_else(|| self.retry.delay_for(record.attempts));
                    debug!(
                        dest_chat,
                        attempt = record.attempts,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                DeliveryOutcome::Permanent { reason } => {
                    record.status = DeliveryStatus::Failed;
                    record.last_error = Some(reason.clone());
                    record.updated_at = chrono::Utc::now();
                    self.persist(&record).await;
                    warn!(dest_chat, reason = %reason, "Permanent delivery failure");
                    return DestResult::Failed;
                }
            }
        }
    }

    /// Best-effort ledger write; a persistence failure never fails the post.
    async fn persist(&self, record: &DeliveryRecord) {
        if let Err(e) = self.ledger.upsert(record).await {
            error!(
                dest_chat = record.dest_chat,
                source_message_id = record.source_message_id,
                error = %e,
                "Failed to persist delivery record"
            );
        }
    }

    /// Consume inbound events until the channel closes, then drain.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Message>) {
        let mut tasks = JoinSet::new();
        while let Some(message) = events.recv().await {
            let coordinator = Arc::clone(&self);
            tasks.spawn(async move {
                coordinator.process(&message).await;
            });
            // Reap finished tasks so the set doesn't grow unbounded.
            while tasks.try_join_next().is_some() {}
        }
        debug!("Event channel closed, draining in-flight posts");
        while tasks.join_next().await.is_some() {}
        info!("Coordinator stopped");
    }
}
