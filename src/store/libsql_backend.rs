//! libSQL backend implementing [`Store`] and [`DeliveryLedger`].
//!
//! A single connection is reused for all operations;
//! `libsql::Connection` is `Send + Sync` and safe for concurrent async
//! use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tracing::info;

use crate::error::StorageError;
use crate::ledger::{DeliveryLedger, DeliveryRecord, DeliveryStatus};
use crate::pipeline::rules::ReplacementRule;
use crate::routing::{ChannelRef, ChannelRole, MappingEdge};
use crate::store::migrations;
use crate::store::traits::Store;

pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StorageError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StorageError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StorageError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StorageError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StorageError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

fn query_err(context: &str, e: libsql::Error) -> StorageError {
    StorageError::Query(format!("{context}: {e}"))
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

#[async_trait]
impl Store for LibSqlStore {
    async fn upsert_channel(
        &self,
        chat_id: i64,
        title: &str,
        role: ChannelRole,
    ) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO channels (chat_id, title, role) VALUES (?1, ?2, ?3)
                 ON CONFLICT (chat_id) DO UPDATE SET title = ?2, role = ?3",
                params![chat_id, title, role.as_str()],
            )
            .await
            .map_err(|e| query_err("upsert channel", e))?;
        Ok(())
    }

    async fn list_channels(&self) -> Result<Vec<ChannelRef>, StorageError> {
        let mut rows = self
            .conn
            .query(
                "SELECT chat_id, title, role FROM channels ORDER BY chat_id",
                (),
            )
            .await
            .map_err(|e| query_err("list channels", e))?;

        let mut channels = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| query_err("read channel row", e))?
        {
            let chat_id: i64 = row.get(0).map_err(|e| query_err("channel chat_id", e))?;
            let title: String = row.get(1).map_err(|e| query_err("channel title", e))?;
            let role: String = row.get(2).map_err(|e| query_err("channel role", e))?;
            channels.push(ChannelRef {
                chat_id,
                title,
                role: role.parse().map_err(StorageError::Query)?,
            });
        }
        Ok(channels)
    }

    async fn add_mapping(&self, source_chat: i64, dest_chat: i64) -> Result<bool, StorageError> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO mappings (source_chat, dest_chat) VALUES (?1, ?2)",
                params![source_chat, dest_chat],
            )
            .await
            .map_err(|e| query_err("add mapping", e))?;
        Ok(inserted > 0)
    }

    async fn remove_mapping(&self, source_chat: i64, dest_chat: i64) -> Result<bool, StorageError> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM mappings WHERE source_chat = ?1 AND dest_chat = ?2",
                params![source_chat, dest_chat],
            )
            .await
            .map_err(|e| query_err("remove mapping", e))?;
        Ok(deleted > 0)
    }

    async fn list_mappings(&self) -> Result<Vec<MappingEdge>, StorageError> {
        let mut rows = self
            .conn
            .query(
                "SELECT source_chat, dest_chat FROM mappings ORDER BY id",
                (),
            )
            .await
            .map_err(|e| query_err("list mappings", e))?;

        let mut edges = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| query_err("read mapping row", e))?
        {
            edges.push(MappingEdge {
                source: row.get(0).map_err(|e| query_err("mapping source", e))?,
                dest: row.get(1).map_err(|e| query_err("mapping dest", e))?,
            });
        }
        Ok(edges)
    }

    async fn add_rule(
        &self,
        pattern: &str,
        replacement: &str,
        order: Option<i64>,
    ) -> Result<i64, StorageError> {
        let ord = match order {
            Some(ord) => ord,
            None => {
                // Append after the current last rule.
                let mut rows = self
                    .conn
                    .query("SELECT COALESCE(MAX(ord), 0) + 1 FROM link_rules", ())
                    .await
                    .map_err(|e| query_err("next rule order", e))?;
                match rows
                    .next()
                    .await
                    .map_err(|e| query_err("read rule order", e))?
                {
                    Some(row) => row.get(0).map_err(|e| query_err("parse rule order", e))?,
                    None => 1,
                }
            }
        };

        self.conn
            .execute(
                "INSERT INTO link_rules (pattern, replacement, ord) VALUES (?1, ?2, ?3)",
                params![pattern, replacement, ord],
            )
            .await
            .map_err(|e| query_err("add rule", e))?;
        Ok(self.conn.last_insert_rowid())
    }

    async fn remove_rule(&self, id: i64) -> Result<bool, StorageError> {
        let deleted = self
            .conn
            .execute("DELETE FROM link_rules WHERE id = ?1", params![id])
            .await
            .map_err(|e| query_err("remove rule", e))?;
        Ok(deleted > 0)
    }

    async fn list_rules(&self) -> Result<Vec<ReplacementRule>, StorageError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, pattern, replacement, ord FROM link_rules ORDER BY ord, id",
                (),
            )
            .await
            .map_err(|e| query_err("list rules", e))?;

        let mut rules = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| query_err("read rule row", e))?
        {
            rules.push(ReplacementRule {
                id: row.get(0).map_err(|e| query_err("rule id", e))?,
                pattern: row.get(1).map_err(|e| query_err("rule pattern", e))?,
                replacement: row.get(2).map_err(|e| query_err("rule replacement", e))?,
                order: row.get(3).map_err(|e| query_err("rule order", e))?,
            });
        }
        Ok(rules)
    }
}

#[async_trait]
impl DeliveryLedger for LibSqlStore {
    async fn get(
        &self,
        source_chat: i64,
        source_message_id: i64,
        dest_chat: i64,
    ) -> Result<Option<DeliveryRecord>, StorageError> {
        let mut rows = self
            .conn
            .query(
                "SELECT dest_message_id, status, attempts, last_error, updated_at
                 FROM deliveries
                 WHERE source_chat = ?1 AND source_message_id = ?2 AND dest_chat = ?3",
                params![source_chat, source_message_id, dest_chat],
            )
            .await
            .map_err(|e| query_err("get delivery", e))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| query_err("read delivery row", e))?
        else {
            return Ok(None);
        };

        let status: String = row.get(1).map_err(|e| query_err("delivery status", e))?;
        let updated_at: String = row.get(4).map_err(|e| query_err("delivery updated_at", e))?;
        Ok(Some(DeliveryRecord {
            source_chat,
            source_message_id,
            dest_chat,
            dest_message_id: row
                .get::<Option<i64>>(0)
                .map_err(|e| query_err("delivery dest_message_id", e))?,
            status: DeliveryStatus::parse(&status)?,
            attempts: row.get::<i64>(2).map_err(|e| query_err("delivery attempts", e))? as u32,
            last_error: row
                .get::<Option<String>>(3)
                .map_err(|e| query_err("delivery last_error", e))?,
            updated_at: parse_datetime(&updated_at),
        }))
    }

    async fn upsert(&self, record: &DeliveryRecord) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO deliveries
                     (source_chat, source_message_id, dest_chat,
                      dest_message_id, status, attempts, last_error, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (source_chat, source_message_id, dest_chat) DO UPDATE SET
                     dest_message_id = ?4, status = ?5, attempts = ?6,
                     last_error = ?7, updated_at = ?8",
                params![
                    record.source_chat,
                    record.source_message_id,
                    record.dest_chat,
                    record.dest_message_id,
                    record.status.as_str(),
                    record.attempts as i64,
                    record.last_error.clone(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| query_err("upsert delivery", e))?;
        Ok(())
    }

    async fn delivered_destinations(
        &self,
        source_chat: i64,
        source_message_id: i64,
    ) -> Result<Vec<i64>, StorageError> {
        let mut rows = self
            .conn
            .query(
                "SELECT dest_chat FROM deliveries
                 WHERE source_chat = ?1 AND source_message_id = ?2 AND status = 'delivered'",
                params![source_chat, source_message_id],
            )
            .await
            .map_err(|e| query_err("delivered destinations", e))?;

        let mut dests = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| query_err("read destination row", e))?
        {
            dests.push(row.get(0).map_err(|e| query_err("destination chat", e))?);
        }
        Ok(dests)
    }
}
