//! Node inventory
//!
//! The inventory is the durable list of every node the tool knows about. It
//! is loaded at the start of each command, changed in memory, and written
//! back once at the end.

pub mod node;
pub mod store;

pub use node::{Node, SwarmRole};
pub use store::{InventoryStore, NODES_FILE_NAME};

use crate::error::{FlotillaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Ordered collection of nodes keyed by host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inventory {
    nodes: Vec<Node>,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an inventory from a list of nodes, checking uniqueness
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self> {
        let inventory = Self { nodes };
        inventory.validate()?;
        Ok(inventory)
    }

    /// Check host/alias uniqueness and the single-leader rule
    pub fn validate(&self) -> Result<()> {
        let mut hosts = HashSet::new();
        let mut aliases = HashSet::new();
        let mut leaders = 0;

        for node in &self.nodes {
            if node.host.trim().is_empty() {
                return Err(FlotillaError::Inventory(format!(
                    "Node {} has an empty host",
                    node.alias
                )));
            }
            if !hosts.insert(node.host.as_str()) {
                return Err(FlotillaError::Inventory(format!(
                    "Duplicate host: {}",
                    node.host
                )));
            }
            if !aliases.insert(node.alias.as_str()) {
                return Err(FlotillaError::Inventory(format!(
                    "Duplicate alias: {}",
                    node.alias
                )));
            }
            if node.is_leader() {
                leaders += 1;
            }
        }

        if leaders > 1 {
            return Err(FlotillaError::Inventory(format!(
                "{} nodes are marked as swarm leader",
                leaders
            )));
        }

        Ok(())
    }

    /// All nodes in inventory order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the inventory is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get a node by host
    pub fn get(&self, host: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.host == host)
    }

    /// Find a node by alias
    pub fn find_by_alias(&self, alias: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.alias == alias)
    }

    /// The swarm leader, if one exists
    pub fn leader(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.is_leader())
    }

    /// Resolve operator-supplied aliases to nodes
    pub fn resolve_aliases(&self, aliases: &[String]) -> Result<Vec<Node>> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(aliases.len());

        for alias in aliases {
            let node = self
                .find_by_alias(alias)
                .ok_or_else(|| FlotillaError::NodeNotFound(alias.clone()))?;
            if seen.insert(node.host.clone()) {
                resolved.push(node.clone());
            }
        }

        Ok(resolved)
    }

    /// Insert a node or replace the node with the same host
    pub fn upsert(&mut self, node: Node) {
        match self.nodes.iter_mut().find(|n| n.host == node.host) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    /// Merge a host-keyed set of updated nodes.
    ///
    /// Existing hosts are replaced in place, so inventory order is kept and
    /// nodes missing from `updates` stay untouched. Hosts not yet present are
    /// appended in `order`.
    pub fn merge(&mut self, mut updates: HashMap<String, Node>, order: &[String]) {
        for node in self.nodes.iter_mut() {
            if let Some(updated) = updates.remove(&node.host) {
                *node = updated;
            }
        }
        for host in order {
            if let Some(node) = updates.remove(host) {
                self.nodes.push(node);
            }
        }
    }

    /// Apply a change to the node with the given host
    pub fn update<F>(&mut self, host: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Node),
    {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.host == host)
            .ok_or_else(|| FlotillaError::NodeNotFound(host.to_string()))?;
        f(node);
        Ok(())
    }
}
