//! Storage trait for the relay's configuration tables.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::pipeline::rules::ReplacementRule;
use crate::routing::{ChannelRef, ChannelRole, MappingEdge};

/// Configuration persistence: channels, mappings, link rules.
///
/// Delivery records live behind the separate [`DeliveryLedger`] trait;
/// the libSQL backend implements both over one database.
///
/// [`DeliveryLedger`]: crate::ledger::DeliveryLedger
#[async_trait]
pub trait Store: Send + Sync {
    /// Register a channel or update its title/role in place.
    async fn upsert_channel(
        &self,
        chat_id: i64,
        title: &str,
        role: ChannelRole,
    ) -> Result<(), StorageError>;

    async fn list_channels(&self) -> Result<Vec<ChannelRef>, StorageError>;

    /// Add a mapping; returns `false` when it already existed.
    async fn add_mapping(&self, source_chat: i64, dest_chat: i64) -> Result<bool, StorageError>;

    /// Remove a mapping; returns whether it existed.
    async fn remove_mapping(&self, source_chat: i64, dest_chat: i64) -> Result<bool, StorageError>;

    /// All mappings in insertion order.
    async fn list_mappings(&self) -> Result<Vec<MappingEdge>, StorageError>;

    /// Store a rule; `order` defaults to the end of the list. Returns
    /// the assigned rule id.
    async fn add_rule(
        &self,
        pattern: &str,
        replacement: &str,
        order: Option<i64>,
    ) -> Result<i64, StorageError>;

    /// Delete a rule by id; returns whether it existed.
    async fn remove_rule(&self, id: i64) -> Result<bool, StorageError>;

    /// All rules ordered by application order, then id.
    async fn list_rules(&self) -> Result<Vec<ReplacementRule>, StorageError>;
}
