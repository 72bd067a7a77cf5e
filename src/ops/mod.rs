//! Cluster operations
//!
//! Fan-out operations ([`AddNode`], [`InstallDocker`], [`JoinSwarm`])
//! implement [`NodeOperation`](crate::fanout::NodeOperation) and run on many
//! nodes at once. Swarm init, labels and the compose stacks (reverse proxy,
//! monitoring, logs) run against the leader.

pub mod add_node;
pub mod docker;
pub mod firewall;
pub mod label;
pub mod logs;
pub mod monitoring;
pub mod proxy;
pub mod stack;
pub mod swarm;

pub use add_node::{add_nodes, parse_node_args, select_new_nodes, AddNode, NodeSpec};
pub use docker::{install_docker, parse_docker_version, select_docker_targets, InstallDocker};
pub use label::{add_label, list_labels, node_labels, remove_label, NodeLabels};
pub use logs::{deploy_logs, RaiseMapCount};
pub use monitoring::{deploy_monitoring, MonitoringCredentials};
pub use proxy::{deploy_proxy, write_default_template, CertificateWait};
pub use stack::StackBundle;
pub use swarm::{
    fetch_join_token, init_leader, join_swarm, select_swarm_targets, JoinSwarm, SwarmPlan,
    SWARM_PORT,
};

use crate::config::ClusterConfig;
use crate::error::{FlotillaError, Result};
use crate::inventory::{Inventory, Node};
use crate::remote::{AuthConfig, Remote, RemoteExecutor};
use std::sync::Arc;

/// Config plus transport, shared by every operation of one command
#[derive(Clone)]
pub struct ClusterContext {
    /// Cluster settings
    pub config: ClusterConfig,
    executor: Arc<dyn RemoteExecutor>,
    key_passphrase: Option<String>,
}

impl ClusterContext {
    /// Create a new context
    pub fn new(config: ClusterConfig, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            config,
            executor,
            key_passphrase: None,
        }
    }

    /// Passphrase for the cluster private key
    pub fn with_key_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.key_passphrase = passphrase.filter(|p| !p.is_empty());
        self
    }

    /// Remote logging in as the cluster user with the cluster key
    pub fn cluster_remote(&self) -> Result<Remote> {
        let auth = AuthConfig::private_key(
            &self.config.cluster_user,
            self.config.private_key_path()?,
            self.key_passphrase.clone(),
        )
        .with_port(self.config.ssh_port);
        Ok(Remote::new(Arc::clone(&self.executor), auth))
    }

    /// Remote logging in as the root user with a password
    pub fn root_remote(&self, password: &str) -> Remote {
        let auth = AuthConfig::password(&self.config.root_user, password)
            .with_port(self.config.ssh_port);
        Remote::new(Arc::clone(&self.executor), auth)
    }
}

/// The swarm leader, or an error naming the command that needs it
pub fn require_leader<'a>(inventory: &'a Inventory, command: &str) -> Result<&'a Node> {
    inventory.leader().ok_or_else(|| {
        FlotillaError::Swarm(format!(
            "{} needs a swarm leader, run `flotilla swarm --manager <alias>` first",
            command
        ))
    })
}
