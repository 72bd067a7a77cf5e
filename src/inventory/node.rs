//! Cluster node records

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node role in the swarm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwarmRole {
    /// Not part of a swarm
    #[default]
    None,
    /// Worker node
    Worker,
    /// Manager node
    Manager,
    /// The manager that initialised the swarm
    Leader,
}

impl SwarmRole {
    /// Check if the role belongs to a swarm member
    pub fn in_swarm(&self) -> bool {
        !matches!(self, SwarmRole::None)
    }

    /// Check if the role can hand out join tokens
    pub fn is_manager(&self) -> bool {
        matches!(self, SwarmRole::Manager | SwarmRole::Leader)
    }
}

impl fmt::Display for SwarmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwarmRole::None => write!(f, "-"),
            SwarmRole::Worker => write!(f, "worker"),
            SwarmRole::Manager => write!(f, "manager"),
            SwarmRole::Leader => write!(f, "leader"),
        }
    }
}

/// Cluster node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node address, unique across the inventory
    pub host: String,
    /// Human label, unique across the inventory
    pub alias: String,
    /// Installed docker version, empty if not installed
    #[serde(default)]
    pub docker_version: String,
    /// Swarm role
    #[serde(default)]
    pub swarm_role: SwarmRole,
    /// Reverse proxy is deployed on this node
    #[serde(default)]
    pub has_reverse_proxy: bool,
}

impl Node {
    /// Create a node that has nothing installed yet
    pub fn new(host: &str, alias: &str) -> Self {
        Self {
            host: host.to_string(),
            alias: alias.to_string(),
            docker_version: String::new(),
            swarm_role: SwarmRole::None,
            has_reverse_proxy: false,
        }
    }

    /// Check if docker is installed
    pub fn has_docker(&self) -> bool {
        !self.docker_version.is_empty()
    }

    /// Check if node is the swarm leader
    pub fn is_leader(&self) -> bool {
        self.swarm_role == SwarmRole::Leader
    }

    /// Check if node is part of the swarm
    pub fn in_swarm(&self) -> bool {
        self.swarm_role.in_swarm()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.alias, self.host)
    }
}
