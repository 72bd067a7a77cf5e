//! Swarm formation: leader init and join fan-out

use super::{firewall, ClusterContext};
use crate::error::{FlotillaError, Result};
use crate::fanout::{FanOut, FanOutReport, NodeOperation};
use crate::inventory::{Inventory, Node, SwarmRole};
use crate::remote::{Remote, RemoteCommand};
use async_trait::async_trait;
use std::sync::Arc;

/// Swarm manager port
pub const SWARM_PORT: u16 = 2377;

/// What one `flotilla swarm` invocation will do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmPlan {
    /// Node to initialise the swarm on, when there is no leader yet
    pub init_leader: Option<Node>,
    /// Nodes to join afterwards
    pub targets: Vec<Node>,
}

/// Work out the leader to initialise and the nodes to join.
///
/// Every node needs docker. Manager mode always needs at least one alias.
/// Without a leader, `manager` is required and the first alias becomes the
/// leader. When aliases are given only those are joined; otherwise every
/// node outside the swarm joins as a worker.
pub fn select_swarm_targets(
    inventory: &Inventory,
    aliases: &[String],
    manager: bool,
) -> Result<SwarmPlan> {
    if inventory.is_empty() {
        return Err(FlotillaError::NothingToDo(
            "no nodes in the inventory, add some nodes first".to_string(),
        ));
    }
    if let Some(node) = inventory.nodes().iter().find(|n| !n.has_docker()) {
        return Err(FlotillaError::Swarm(format!(
            "docker is not installed on {}, run `flotilla docker` first",
            node.alias
        )));
    }

    if manager && aliases.is_empty() {
        return Err(FlotillaError::InvalidArgument(
            "--manager needs at least one alias".to_string(),
        ));
    }

    let requested = inventory.resolve_aliases(aliases)?;
    let has_leader = inventory.leader().is_some();

    if !has_leader && (!manager || requested.is_empty()) {
        return Err(FlotillaError::InvalidArgument(
            "no swarm yet, use --manager with at least one alias to initialise it".to_string(),
        ));
    }

    for node in requested.iter().filter(|n| n.in_swarm()) {
        tracing::info!("{} already in swarm as {}", node.alias, node.swarm_role);
    }

    let mut targets: Vec<Node> = if requested.is_empty() {
        inventory
            .nodes()
            .iter()
            .filter(|n| !n.in_swarm())
            .cloned()
            .collect()
    } else {
        requested.into_iter().filter(|n| !n.in_swarm()).collect()
    };

    let init_leader = if has_leader {
        None
    } else {
        let first = &aliases[0];
        let index = targets
            .iter()
            .position(|n| &n.alias == first)
            .ok_or_else(|| {
                FlotillaError::Swarm(format!(
                    "{} is already a swarm member but no leader is recorded",
                    first
                ))
            })?;
        Some(targets.remove(index))
    };

    if init_leader.is_none() && targets.is_empty() {
        return Err(FlotillaError::NothingToDo(
            "all nodes already in swarm".to_string(),
        ));
    }

    Ok(SwarmPlan {
        init_leader,
        targets,
    })
}

/// Initialise the swarm on `node` and make it the leader
pub async fn init_leader(remote: &Remote, mut node: Node) -> Result<Node> {
    let host = node.host.clone();
    tracing::info!("{}: initialising swarm on {}", host, node.alias);

    remote.exec_all(&host, &firewall::swarm_rules(true)).await?;
    remote.exec_all(&host, &firewall::reload_with_docker()).await?;
    remote
        .exec(
            &host,
            RemoteCommand::sudo(format!("docker swarm init --advertise-addr {}", host))
                .titled("Initialising swarm"),
        )
        .await?;

    node.swarm_role = SwarmRole::Leader;
    tracing::info!("Swarm initialised, leader node is {}", node.alias);
    Ok(node)
}

/// Fetch the join token for workers or managers from the leader
pub async fn fetch_join_token(remote: &Remote, leader: &Node, manager: bool) -> Result<String> {
    let role = if manager { "manager" } else { "worker" };
    let token = remote
        .exec(
            &leader.host,
            RemoteCommand::sudo(format!("docker swarm join-token -q {}", role))
                .titled(format!("Fetching {} join token", role))
                .mask_output(),
        )
        .await?;

    let token = token.trim();
    if token.is_empty() {
        return Err(FlotillaError::Swarm(format!(
            "leader {} returned an empty {} join token",
            leader.alias, role
        )));
    }
    Ok(token.to_string())
}

/// Joins nodes to an existing swarm
pub struct JoinSwarm {
    remote: Remote,
    leader_host: String,
    token: String,
    manager: bool,
}

impl JoinSwarm {
    /// Join as manager or worker using `token` from `leader`
    pub fn new(remote: Remote, leader: &Node, token: String, manager: bool) -> Self {
        Self {
            remote,
            leader_host: leader.host.clone(),
            token,
            manager,
        }
    }
}

#[async_trait]
impl NodeOperation for JoinSwarm {
    fn name(&self) -> &str {
        "swarm"
    }

    async fn apply(&self, mut node: Node) -> Result<Node> {
        let host = node.host.clone();

        self.remote
            .exec_all(&host, &firewall::swarm_rules(self.manager))
            .await?;
        self.remote
            .exec_all(&host, &firewall::reload_with_docker())
            .await?;
        self.remote
            .exec(
                &host,
                RemoteCommand::sudo(format!(
                    "docker swarm join --token {} {}:{}",
                    self.token, self.leader_host, SWARM_PORT
                ))
                .titled("Joining swarm")
                .mask_input(),
            )
            .await?;

        node.swarm_role = if self.manager {
            SwarmRole::Manager
        } else {
            SwarmRole::Worker
        };
        tracing::info!("{}: {} joined swarm as {}", host, node.alias, node.swarm_role);
        Ok(node)
    }
}

/// Form or grow the swarm.
///
/// Initialising the leader is sequential and fatal on failure; the leader is
/// persisted before any node joins. Returns `None` when there was nothing
/// left to join.
pub async fn join_swarm(
    ctx: &ClusterContext,
    fanout: &FanOut,
    aliases: &[String],
    manager: bool,
) -> Result<Option<FanOutReport>> {
    let mut inventory = fanout.store().load()?;
    let plan = select_swarm_targets(&inventory, aliases, manager)?;
    let remote = ctx.cluster_remote()?;

    if let Some(node) = plan.init_leader {
        let leader = init_leader(&remote, node).await?;
        inventory.upsert(leader);
        fanout.store().save(&inventory)?;
    }

    if plan.targets.is_empty() {
        return Ok(None);
    }

    let leader = super::require_leader(&inventory, "swarm")?.clone();
    let token = fetch_join_token(&remote, &leader, manager).await?;
    let op = JoinSwarm::new(remote, &leader, token, manager);

    fanout
        .run(inventory, plan.targets, Arc::new(op))
        .await
        .map(Some)
}
