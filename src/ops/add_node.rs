//! Bootstrap new hosts and add them to the inventory

use super::{firewall, ClusterContext};
use crate::error::{FlotillaError, Result};
use crate::fanout::{FanOut, FanOutReport, NodeOperation};
use crate::inventory::{Inventory, Node};
use crate::remote::{Remote, RemoteCommand};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;

/// Length of the throwaway cluster user password
const PASSWORD_LENGTH: usize = 32;

/// An `alias=host` pair from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub alias: String,
    pub host: String,
}

/// Parse `alias=host` arguments.
///
/// Repeating an alias or a host within one invocation is an error.
pub fn parse_node_args(args: &[String]) -> Result<Vec<NodeSpec>> {
    let mut aliases = HashSet::new();
    let mut hosts = HashSet::new();
    let mut specs = Vec::with_capacity(args.len());

    for arg in args {
        let (alias, host) = arg
            .split_once('=')
            .map(|(a, h)| (a.trim(), h.trim()))
            .filter(|(a, h)| !a.is_empty() && !h.is_empty() && !h.contains('='))
            .ok_or_else(|| {
                FlotillaError::InvalidArgument(format!(
                    "wrong argument '{}', expected <alias>=<host>",
                    arg
                ))
            })?;

        if alias.contains(char::is_whitespace) || host.contains(char::is_whitespace) {
            return Err(FlotillaError::InvalidArgument(format!(
                "wrong argument '{}', alias and host must not contain spaces",
                arg
            )));
        }
        if !aliases.insert(alias.to_string()) {
            return Err(FlotillaError::InvalidArgument(format!(
                "alias '{}' given more than once",
                alias
            )));
        }
        if !hosts.insert(host.to_string()) {
            return Err(FlotillaError::InvalidArgument(format!(
                "host '{}' given more than once",
                host
            )));
        }

        specs.push(NodeSpec {
            alias: alias.to_string(),
            host: host.to_string(),
        });
    }

    Ok(specs)
}

/// Drop already-known aliases and hosts, leaving the nodes to add
pub fn select_new_nodes(inventory: &Inventory, specs: &[NodeSpec]) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();

    for spec in specs {
        if let Some(existing) = inventory.find_by_alias(&spec.alias) {
            tracing::info!("Alias already configured: {}", existing);
            continue;
        }
        if let Some(existing) = inventory.get(&spec.host) {
            tracing::info!("Host already configured: {}", existing);
            continue;
        }
        nodes.push(Node::new(&spec.host, &spec.alias));
    }

    if nodes.is_empty() {
        return Err(FlotillaError::NothingToDo(
            "all given nodes are already configured".to_string(),
        ));
    }
    Ok(nodes)
}

/// Adds a node: creates the cluster user, hands it the cluster key, locks
/// down SSH and enables the firewall
pub struct AddNode {
    /// Password login for first contact; `None` skips SSH setup
    root: Option<Remote>,
    /// Key login as the cluster user
    cluster: Remote,
    /// Public key installed for the cluster user
    public_key: String,
}

impl AddNode {
    /// Full bootstrap using the root password
    pub fn new(ctx: &ClusterContext, root_password: &str, public_key: String) -> Result<Self> {
        if public_key.contains('\'') || public_key.contains('\n') {
            return Err(FlotillaError::InvalidConfig(
                "public key must be a single line without quotes".to_string(),
            ));
        }
        Ok(Self {
            root: Some(ctx.root_remote(root_password)),
            cluster: ctx.cluster_remote()?,
            public_key,
        })
    }

    /// Only check that the cluster user can already log in
    pub fn skip_ssh(ctx: &ClusterContext) -> Result<Self> {
        Ok(Self {
            root: None,
            cluster: ctx.cluster_remote()?,
            public_key: String::new(),
        })
    }

    /// Runs as the root user, so nothing is prefixed with sudo
    fn bootstrap_commands(&self) -> Vec<RemoteCommand> {
        let user = self.cluster.user();
        let password: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PASSWORD_LENGTH)
            .map(char::from)
            .collect();
        let ssh_dir = format!("/home/{}/.ssh", user);

        vec![
            RemoteCommand::new(format!("adduser --disabled-password --gecos '' {}", user))
                .titled("Creating cluster user"),
            RemoteCommand::new(format!("echo '{}:{}' | chpasswd", user, password))
                .titled("Setting cluster user password")
                .masked(),
            RemoteCommand::new(format!("usermod -aG sudo {}", user)).titled("Granting sudo"),
            RemoteCommand::new(format!(
                "echo '{user} ALL=(ALL) NOPASSWD:ALL' > /etc/sudoers.d/{user} && chmod 0440 /etc/sudoers.d/{user}",
                user = user
            )),
            RemoteCommand::new(format!(
                "mkdir -p {dir} && echo '{key}' >> {dir}/authorized_keys && chown -R {user}:{user} {dir} && chmod 700 {dir} && chmod 600 {dir}/authorized_keys",
                dir = ssh_dir,
                key = self.public_key,
                user = user
            ))
            .titled("Installing cluster public key"),
            RemoteCommand::new(
                "sed -i 's/^#\\?PasswordAuthentication .*/PasswordAuthentication no/' /etc/ssh/sshd_config",
            )
            .titled("Disabling SSH password authentication"),
            RemoteCommand::new("passwd -l root").titled("Locking root password"),
            RemoteCommand::new("systemctl restart ssh").titled("Restarting sshd"),
        ]
    }
}

#[async_trait]
impl NodeOperation for AddNode {
    fn name(&self) -> &str {
        "add"
    }

    async fn apply(&self, node: Node) -> Result<Node> {
        if let Some(root) = &self.root {
            root.exec_all(&node.host, &self.bootstrap_commands()).await?;
        }

        self.cluster
            .exec(&node.host, RemoteCommand::new("uname -a").titled("Checking cluster user login"))
            .await?;

        if self.root.is_some() {
            self.cluster.exec_all(&node.host, &firewall::ssh_rules()).await?;
        }

        tracing::info!("{}: node added", node.host);
        Ok(node)
    }
}

/// Bootstrap the hosts named by `alias=host` arguments and record the ones
/// that succeed. Without a root password the hosts must already accept the
/// cluster key.
pub async fn add_nodes(
    ctx: &ClusterContext,
    fanout: &FanOut,
    args: &[String],
    root_password: Option<&str>,
) -> Result<FanOutReport> {
    let specs = parse_node_args(args)?;
    let inventory = fanout.store().load()?;
    let targets = select_new_nodes(&inventory, &specs)?;

    let op = match root_password {
        Some(password) => AddNode::new(ctx, password, ctx.config.read_public_key()?)?,
        None => AddNode::skip_ssh(ctx)?,
    };
    fanout.run(inventory, targets, Arc::new(op)).await
}
