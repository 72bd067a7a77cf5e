//! Docker engine installation

use super::ClusterContext;
use crate::error::{FlotillaError, Result};
use crate::fanout::{FanOut, FanOutReport, NodeOperation};
use crate::inventory::{Inventory, Node};
use crate::remote::{Remote, RemoteCommand};
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

/// Docker package name
pub const DOCKER_PACKAGE: &str = "docker-ce";

/// Extract the version from `docker -v` output.
///
/// `Docker version 19.03.2, build 6a30dfc` gives `19.03.2`; anything without
/// a version number gives `None`.
pub fn parse_docker_version(output: &str) -> Option<String> {
    let re = Regex::new(r"Docker version ([0-9]+(?:\.[0-9]+)*)").ok()?;
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Nodes to install docker on.
///
/// Explicit aliases win. Otherwise every node without docker, or every node
/// when upgrading.
pub fn select_docker_targets(
    inventory: &Inventory,
    aliases: &[String],
    upgrade: bool,
) -> Result<Vec<Node>> {
    if !aliases.is_empty() {
        return inventory.resolve_aliases(aliases);
    }
    Ok(inventory
        .nodes()
        .iter()
        .filter(|n| upgrade || !n.has_docker())
        .cloned()
        .collect())
}

/// Installs or upgrades docker from the upstream apt repository
pub struct InstallDocker {
    remote: Remote,
    upgrade: bool,
    package: String,
}

impl InstallDocker {
    /// Create the operation; `upgrade` reinstalls even when docker is present
    pub fn new(ctx: &ClusterContext, upgrade: bool) -> Result<Self> {
        let package = match &ctx.config.docker_version {
            Some(version) if !version.trim().is_empty() => {
                format!("{}={}", DOCKER_PACKAGE, version.trim())
            }
            _ => DOCKER_PACKAGE.to_string(),
        };
        Ok(Self {
            remote: ctx.cluster_remote()?,
            upgrade,
            package,
        })
    }

    async fn installed_version(&self, host: &str) -> Result<Option<String>> {
        let output = self.remote.exec(host, RemoteCommand::sudo("docker -v")).await?;
        Ok(parse_docker_version(&output))
    }

    fn install_commands(&self) -> Vec<RemoteCommand> {
        vec![
            RemoteCommand::sudo("apt-get update").titled("Updating apt-get"),
            RemoteCommand::sudo(
                "apt-get -y install apt-transport-https ca-certificates curl software-properties-common",
            )
            .titled("Installing apt HTTPS transport"),
            RemoteCommand::new(
                "curl -fsSL https://download.docker.com/linux/ubuntu/gpg | sudo apt-key add -",
            )
            .titled("Adding Docker GPG key"),
            RemoteCommand::sudo(
                "add-apt-repository \"deb [arch=amd64] https://download.docker.com/linux/ubuntu $(lsb_release -cs) stable\"",
            )
            .titled("Adding Docker repository"),
            RemoteCommand::sudo("apt-get update").titled("Updating apt-get"),
            RemoteCommand::sudo(format!("apt-get -y install {}", self.package))
                .titled(format!("Installing {}", self.package)),
        ]
    }
}

#[async_trait]
impl NodeOperation for InstallDocker {
    fn name(&self) -> &str {
        "docker"
    }

    async fn apply(&self, mut node: Node) -> Result<Node> {
        let host = node.host.clone();

        match self.installed_version(&host).await {
            Ok(Some(version)) if !self.upgrade => {
                tracing::info!(
                    "{}: Docker version [{}] already installed, use --upgrade to reinstall",
                    host,
                    version
                );
                node.docker_version = version;
                return Ok(node);
            }
            Ok(Some(version)) => {
                tracing::info!("{}: Docker version [{}] will be upgraded", host, version)
            }
            Ok(None) | Err(_) => tracing::info!("{}: Docker not found, installing", host),
        }

        self.remote.exec_all(&host, &self.install_commands()).await?;

        let version = self.installed_version(&host).await?.ok_or_else(|| {
            FlotillaError::remote(&host, "unable to read docker version after install")
        })?;
        tracing::info!("{}: Docker {} installed", host, version);

        node.docker_version = version;
        Ok(node)
    }
}

/// Install docker on the selected nodes and record their versions
pub async fn install_docker(
    ctx: &ClusterContext,
    fanout: &FanOut,
    aliases: &[String],
    upgrade: bool,
) -> Result<FanOutReport> {
    let inventory = fanout.store().load()?;
    let targets = select_docker_targets(&inventory, aliases, upgrade)?;
    let op = InstallDocker::new(ctx, upgrade)?;
    fanout.run(inventory, targets, Arc::new(op)).await
}
