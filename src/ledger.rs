//! Delivery ledger: per-(source, message, destination) delivery state.
//!
//! The ledger is what makes redelivered updates idempotent: before
//! publishing to a destination the coordinator consults it, and a
//! `Delivered` record short-circuits the publish. Records survive
//! restarts when backed by the store; the in-memory implementation
//! backs tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StorageError;

/// Lifecycle of one (source message, destination) delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(StorageError::Query(format!(
                "unknown delivery status '{other}'"
            ))),
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    pub source_chat: i64,
    pub source_message_id: i64,
    pub dest_chat: i64,
    /// Message id assigned by the destination, once delivered.
    pub dest_message_id: Option<i64>,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Fresh record for a delivery about to be attempted.
    pub fn pending(source_chat: i64, source_message_id: i64, dest_chat: i64) -> Self {
        Self {
            source_chat,
            source_message_id,
            dest_chat,
            dest_message_id: None,
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Persistence seam for delivery records.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn get(
        &self,
        source_chat: i64,
        source_message_id: i64,
        dest_chat: i64,
    ) -> Result<Option<DeliveryRecord>, StorageError>;

    /// Insert or replace the record for its (source, message, dest) key.
    async fn upsert(&self, record: &DeliveryRecord) -> Result<(), StorageError>;

    /// Destinations already marked `Delivered` for a source message.
    async fn delivered_destinations(
        &self,
        source_chat: i64,
        source_message_id: i64,
    ) -> Result<Vec<i64>, StorageError>;
}

/// Map-backed ledger for tests and dry runs.
#[derive(Default)]
pub struct InMemoryLedger {
    records: RwLock<HashMap<(i64, i64, i64), DeliveryRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryLedger for InMemoryLedger {
    async fn get(
        &self,
        source_chat: i64,
        source_message_id: i64,
        dest_chat: i64,
    ) -> Result<Option<DeliveryRecord>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .get(&(source_chat, source_message_id, dest_chat))
            .cloned())
    }

    async fn upsert(&self, record: &DeliveryRecord) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        records.insert(
            (record.source_chat, record.source_message_id, record.dest_chat),
            record.clone(),
        );
        Ok(())
    }

    async fn delivered_destinations(
        &self,
        source_chat: i64,
        source_message_id: i64,
    ) -> Result<Vec<i64>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| {
                r.source_chat == source_chat
                    && r.source_message_id == source_message_id
                    && r.status == DeliveryStatus::Delivered
            })
            .map(|r| r.dest_chat)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_replaces_by_key() {
        let ledger = InMemoryLedger::new();
        let mut record = DeliveryRecord::pending(1, 10, -5);
        ledger.upsert(&record).await.unwrap();

        record.status = DeliveryStatus::Delivered;
        record.dest_message_id = Some(77);
        record.attempts = 1;
        ledger.upsert(&record).await.unwrap();

        let stored = ledger.get(1, 10, -5).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);
        assert_eq!(stored.dest_message_id, Some(77));
    }

    #[tokio::test]
    async fn delivered_destinations_ignores_other_statuses() {
        let ledger = InMemoryLedger::new();
        let mut delivered = DeliveryRecord::pending(1, 10, -5);
        delivered.status = DeliveryStatus::Delivered;
        ledger.upsert(&delivered).await.unwrap();

        let mut failed = DeliveryRecord::pending(1, 10, -6);
        failed.status = DeliveryStatus::Failed;
        ledger.upsert(&failed).await.unwrap();

        ledger.upsert(&DeliveryRecord::pending(1, 10, -7)).await.unwrap();

        assert_eq!(ledger.delivered_destinations(1, 10).await.unwrap(), vec![-5]);
    }

    #[test]
    fn status_round_trips() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
        ] {
            assert_eq!(DeliveryStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(DeliveryStatus::parse("done").is_err());
    }
}
