//! End-to-end pipeline tests against a scripted publisher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mirror_relay::config::RetryPolicy;
use mirror_relay::ledger::{DeliveryLedger, DeliveryStatus, InMemoryLedger};
use mirror_relay::pipeline::{
    ContentKind, MirrorCoordinator, NormalizedPost, PollKind, ReplacementRule, RuleSet,
};
use mirror_relay::publish::{DeliveryOutcome, Publisher};
use mirror_relay::routing::RoutingTable;
use mirror_relay::state::SharedConfig;
use mirror_relay::telegram::types::{Chat, Message, Poll, PollOption};

/// Publisher that replays scripted outcomes per destination and records
/// every call it receives.
struct ScriptedPublisher {
    scripts: Mutex<HashMap<i64, Vec<DeliveryOutcome>>>,
    calls: Mutex<Vec<(i64, NormalizedPost)>>,
}

impl ScriptedPublisher {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue outcomes for a destination; exhausted scripts deliver.
    fn script(&self, dest: i64, outcomes: Vec<DeliveryOutcome>) {
        self.scripts.lock().unwrap().insert(dest, outcomes);
    }

    fn calls_for(&self, dest: i64) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| *d == dest)
            .count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn last_post_for(&self, dest: i64) -> Option<NormalizedPost> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(d, _)| *d == dest)
            .map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    async fn publish(&self, post: &NormalizedPost, dest_chat: i64) -> DeliveryOutcome {
        self.calls.lock().unwrap().push((dest_chat, post.clone()));
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&dest_chat) {
            Some(outcomes) if !outcomes.is_empty() => outcomes.remove(0),
            _ => DeliveryOutcome::Delivered { message_id: 1 },
        }
    }
}

fn channel_post(chat_id: i64, message_id: i64, text: &str) -> Message {
    Message {
        message_id,
        chat: Chat {
            id: chat_id,
            kind: "channel".into(),
            title: Some("Source".into()),
        },
        from: None,
        text: Some(text.into()),
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

fn retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
    }
}

fn build(
    edges: &[(i64, i64)],
    rules: Vec<ReplacementRule>,
    publisher: Arc<ScriptedPublisher>,
    ledger: Arc<dyn DeliveryLedger>,
    max_concurrent: usize,
) -> MirrorCoordinator {
    let mut table = RoutingTable::new();
    for &(s, d) in edges {
        table.add_edge(s, d).unwrap();
    }
    MirrorCoordinator::new(
        Arc::new(SharedConfig::new(table, RuleSet::compile(rules, 1))),
        publisher,
        ledger,
        max_concurrent,
        retry_policy(),
    )
}

#[tokio::test]
async fn failure_in_one_destination_does_not_block_others() {
    let publisher = Arc::new(ScriptedPublisher::new());
    publisher.script(
        -2,
        vec![DeliveryOutcome::Permanent {
            reason: "Forbidden: bot was kicked".into(),
        }],
    );
    let ledger = Arc::new(InMemoryLedger::new());
    let coordinator = build(
        &[(-1, -2), (-1, -3)],
        vec![],
        publisher.clone(),
        ledger.clone(),
        4,
    );

    let report = coordinator
        .process(&channel_post(-1, 100, "hello"))
        .await
        .unwrap();

    assert_eq!(report.failed, vec![-2]);
    assert_eq!(report.delivered, vec![-3]);

    let failed = ledger.get(-1, 100, -2).await.unwrap().unwrap();
    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert!(failed.last_error.unwrap().contains("Forbidden"));

    let ok = ledger.get(-1, 100, -3).await.unwrap().unwrap();
    assert_eq!(ok.status, DeliveryStatus::Delivered);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_retries_until_success() {
    let publisher = Arc::new(ScriptedPublisher::new());
    publisher.script(
        -2,
        vec![
            DeliveryOutcome::Transient {
                reason: "Bad Gateway".into(),
                retry_after: None,
            },
            DeliveryOutcome::Transient {
                reason: "rate limited".into(),
                retry_after: Some(Duration::from_secs(3)),
            },
            DeliveryOutcome::Delivered { message_id: 7 },
        ],
    );
    let ledger = Arc::new(InMemoryLedger::new());
    let coordinator = build(&[(-1, -2)], vec![], publisher.clone(), ledger.clone(), 4);

    let report = coordinator
        .process(&channel_post(-1, 100, "hello"))
        .await
        .unwrap();

    assert_eq!(report.delivered, vec![-2]);
    assert_eq!(publisher.calls_for(-2), 3);

    let record = ledger.get(-1, 100, -2).await.unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Delivered);
    assert_eq!(record.attempts, 3);
    assert_eq!(record.dest_message_id, Some(7));
}

#[tokio::test(start_paused = true)]
async fn retries_exhaust_into_failed_record() {
    let publisher = Arc::new(ScriptedPublisher::new());
    publisher.script(
        -2,
        vec![
            DeliveryOutcome::Transient {
                reason: "timeout".into(),
                retry_after: None,
            };
            5
        ],
    );
    let ledger = Arc::new(InMemoryLedger::new());
    let coordinator = build(&[(-1, -2)], vec![], publisher.clone(), ledger.clone(), 4);

    let report = coordinator
        .process(&channel_post(-1, 100, "hello"))
        .await
        .unwrap();

    assert_eq!(report.failed, vec![-2]);
    // max_attempts bounds the publish calls.
    assert_eq!(publisher.calls_for(-2), 3);

    let record = ledger.get(-1, 100, -2).await.unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.attempts, 3);
}

#[tokio::test]
async fn replayed_update_skips_delivered_destinations() {
    let publisher = Arc::new(ScriptedPublisher::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let coordinator = build(
        &[(-1, -2), (-1, -3)],
        vec![],
        publisher.clone(),
        ledger.clone(),
        4,
    );

    let post = channel_post(-1, 100, "hello");
    let first = coordinator.process(&post).await.unwrap();
    assert_eq!(first.delivered.len(), 2);
    assert_eq!(publisher.total_calls(), 2);

    // Same update delivered again, e.g. after an offset reset.
    let second = coordinator.process(&post).await.unwrap();
    assert!(second.delivered.is_empty());
    assert_eq!(second.skipped.len(), 2);
    assert_eq!(publisher.total_calls(), 2);
}

#[tokio::test]
async fn rewrite_applies_once_and_identically_to_all_destinations() {
    let publisher = Arc::new(ScriptedPublisher::new());
    let coordinator = build(
        &[(-1, -2), (-1, -3)],
        vec![ReplacementRule {
            id: 1,
            pattern: r"https?://(www\.)?example\.com".into(),
            replacement: "https://mydomain.com".into(),
            order: 1,
        }],
        publisher.clone(),
        Arc::new(InMemoryLedger::new()),
        4,
    );

    coordinator
        .process(&channel_post(-1, 100, "Read https://example.com/post"))
        .await
        .unwrap();

    let a = publisher.last_post_for(-2).unwrap();
    let b = publisher.last_post_for(-3).unwrap();
    assert_eq!(a.body.text, "Read https://mydomain.com/post");
    assert_eq!(a.body.text, b.body.text);
}

#[tokio::test]
async fn dispatch_follows_mapping_insertion_order() {
    let publisher = Arc::new(ScriptedPublisher::new());
    // One permit serializes the fan-out, exposing the dispatch order.
    let coordinator = build(
        &[(-1, -30), (-1, -10), (-1, -20)],
        vec![],
        publisher.clone(),
        Arc::new(InMemoryLedger::new()),
        1,
    );

    let report = coordinator
        .process(&channel_post(-1, 100, "hello"))
        .await
        .unwrap();
    assert_eq!(report.delivered, vec![-30, -10, -20]);

    let order: Vec<i64> = publisher.calls.lock().unwrap().iter().map(|(d, _)| *d).collect();
    assert_eq!(order, vec![-30, -10, -20]);
}

#[tokio::test(start_paused = true)]
async fn backoff_wait_releases_the_publish_pool() {
    let publisher = Arc::new(ScriptedPublisher::new());
    publisher.script(
        -2,
        vec![
            DeliveryOutcome::Transient {
                reason: "rate limited".into(),
                retry_after: Some(Duration::from_secs(30)),
            },
            DeliveryOutcome::Delivered { message_id: 1 },
        ],
    );
    // One permit: a sibling can only publish if the rate-limited
    // destination gives the pool back while it waits.
    let coordinator = build(
        &[(-1, -2), (-1, -3)],
        vec![],
        publisher.clone(),
        Arc::new(InMemoryLedger::new()),
        1,
    );

    let report = coordinator
        .process(&channel_post(-1, 100, "hello"))
        .await
        .unwrap();
    assert_eq!(report.delivered, vec![-2, -3]);

    // The sibling's publish lands between the first attempt and the retry.
    let order: Vec<i64> = publisher.calls.lock().unwrap().iter().map(|(d, _)| *d).collect();
    assert_eq!(order, vec![-2, -3, -2]);
}

#[tokio::test]
async fn quiz_poll_survives_the_pipeline() {
    let publisher = Arc::new(ScriptedPublisher::new());
    let coordinator = build(
        &[(-1, -2)],
        vec![],
        publisher.clone(),
        Arc::new(InMemoryLedger::new()),
        4,
    );

    let mut post = channel_post(-1, 100, "");
    post.text = None;
    post.poll = Some(Poll {
        question: "Capital of France?".into(),
        options: vec![
            PollOption { text: "Lyon".into() },
            PollOption { text: "Paris".into() },
        ],
        is_anonymous: true,
        kind: "quiz".into(),
        allows_multiple_answers: false,
        correct_option_id: Some(1),
        explanation: Some("It is Paris.".into()),
    });

    coordinator.process(&post).await.unwrap();

    let delivered = publisher.last_post_for(-2).unwrap();
    assert_eq!(delivered.kind, ContentKind::Poll);
    let spec = delivered.poll.unwrap();
    assert_eq!(spec.kind, PollKind::Quiz);
    assert_eq!(spec.question, "Capital of France?");
    assert_eq!(spec.options, vec!["Lyon", "Paris"]);
    assert_eq!(spec.correct_option_id, Some(1));
    assert_eq!(spec.explanation.as_deref(), Some("It is Paris."));
}

#[tokio::test]
async fn delivery_records_survive_a_store_reopen() {
    use mirror_relay::store::LibSqlStore;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("mirror.db");

    {
        let store = Arc::new(LibSqlStore::new_local(&db_path).await.unwrap());
        let publisher = Arc::new(ScriptedPublisher::new());
        let coordinator = build(&[(-1, -2)], vec![], publisher, store.clone(), 4);
        coordinator
            .process(&channel_post(-1, 100, "hello"))
            .await
            .unwrap();
    }

    // A fresh process sees the same ledger and does not re-publish.
    let store = Arc::new(LibSqlStore::new_local(&db_path).await.unwrap());
    let publisher = Arc::new(ScriptedPublisher::new());
    let coordinator = build(&[(-1, -2)], vec![], publisher.clone(), store, 4);

    let report = coordinator
        .process(&channel_post(-1, 100, "hello"))
        .await
        .unwrap();
    assert_eq!(report.skipped, vec![-2]);
    assert_eq!(publisher.total_calls(), 0);
}
