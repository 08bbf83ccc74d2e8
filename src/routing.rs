//! Channel registry types and the route resolver.

use std::fmt;
use std::str::FromStr;

use crate::error::RoutingError;

/// Local role of a registered channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Source,
    Destination,
}

impl ChannelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelRole::Source => "source",
            ChannelRole::Destination => "destination",
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(ChannelRole::Source),
            "destination" => Ok(ChannelRole::Destination),
            other => Err(format!("unknown channel role '{other}'")),
        }
    }
}

/// A registered channel: platform identity plus local role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub chat_id: i64,
    pub title: String,
    pub role: ChannelRole,
}

/// One source → destination mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingEdge {
    pub source: i64,
    pub dest: i64,
}

/// Insertion-ordered mapping table.
///
/// Fan-out publish order follows edge insertion order, so resolution is
/// stable and reproducible.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    edges: Vec<MappingEdge>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored edges (already in insertion order).
    pub fn from_edges(edges: Vec<MappingEdge>) -> Self {
        Self { edges }
    }

    /// Add an edge. Self-mappings are rejected; re-adding an existing
    /// edge is a no-op and returns `false`.
    pub fn add_edge(&mut self, source: i64, dest: i64) -> Result<bool, RoutingError> {
        if source == dest {
            return Err(RoutingError::SelfMapping { chat_id: source });
        }
        let edge = MappingEdge { source, dest };
        if self.edges.contains(&edge) {
            return Ok(false);
        }
        self.edges.push(edge);
        Ok(true)
    }

    /// Remove an edge; returns whether it existed.
    pub fn remove_edge(&mut self, source: i64, dest: i64) -> bool {
        let before = self.edges.len();
        self.edges.retain(|e| !(e.source == source && e.dest == dest));
        self.edges.len() != before
    }

    /// Destinations mapped from `source`, in insertion order.
    ///
    /// Empty when the source has no mappings; that is a no-op for the
    /// coordinator, not an error.
    pub fn resolve(&self, source: i64) -> Vec<i64> {
        self.edges
            .iter()
            .filter(|e| e.source == source)
            .map(|e| e.dest)
            .collect()
    }

    pub fn edges(&self) -> &[MappingEdge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
