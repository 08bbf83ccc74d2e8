//! Shared, versioned configuration state.
//!
//! The mapping table and rule set are read-mostly: the admin handler is
//! the single writer, coordinator tasks are the readers. Each event
//! takes one snapshot up front and keeps it for the whole fan-out, so a
//! mid-event admin mutation never mixes rule versions within one post.

use std::sync::{Arc, RwLock};

use crate::pipeline::rules::{ReplacementRule, RuleSet};
use crate::routing::RoutingTable;

/// Point-in-time view of the routing table and rule set.
#[derive(Clone)]
pub struct ConfigSnapshot {
    pub routing: Arc<RoutingTable>,
    pub rules: Arc<RuleSet>,
}

/// Single-writer, many-reader configuration handle.
///
/// Writers swap whole `Arc`s; the lock is never held across I/O.
pub struct SharedConfig {
    inner: RwLock<ConfigSnapshot>,
}

impl SharedConfig {
    pub fn new(routing: RoutingTable, rules: RuleSet) -> Self {
        Self {
            inner: RwLock::new(ConfigSnapshot {
                routing: Arc::new(routing),
                rules: Arc::new(rules),
            }),
        }
    }

    /// Latest consistent snapshot. Cheap: two `Arc` clones.
    pub fn snapshot(&self) -> ConfigSnapshot {
        self.read().clone()
    }

    /// Replace the routing table.
    pub fn install_routing(&self, table: RoutingTable) {
        self.write().routing = Arc::new(table);
    }

    /// Recompile and install a new rule set with a bumped version.
    ///
    /// Takes effect for posts processed after the call; events holding
    /// an older snapshot finish with it.
    pub fn install_rules(&self, rules: Vec<ReplacementRule>) {
        let mut guard = self.write();
        let version = guard.rules.version() + 1;
        guard.rules = Arc::new(RuleSet::compile(rules, version));
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ConfigSnapshot> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ConfigSnapshot> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
