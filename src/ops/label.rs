//! Swarm node labels

use crate::error::{FlotillaError, Result};
use crate::inventory::Node;
use crate::remote::{Remote, RemoteCommand};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Labels of one swarm node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLabels {
    /// Hostname as reported by docker
    pub hostname: String,
    /// Label keys and values
    pub labels: BTreeMap<String, String>,
}

impl fmt::Display for NodeLabels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String> = self
            .labels
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{}={}", key, value)
                }
            })
            .collect();
        write!(f, "{}", labels.join(", "))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedNode {
    description: InspectedDescription,
    spec: InspectedSpec,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedDescription {
    hostname: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedSpec {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

/// Parse `docker node inspect` output
pub fn parse_node_labels(json: &str) -> Result<Vec<NodeLabels>> {
    let nodes: Vec<InspectedNode> = serde_json::from_str(json)?;
    Ok(nodes
        .into_iter()
        .map(|node| NodeLabels {
            hostname: node.description.hostname,
            labels: node.spec.labels.unwrap_or_default(),
        })
        .collect())
}

fn check_word(kind: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '$' | ';' | '&' | '|'))
    {
        return Err(FlotillaError::InvalidArgument(format!(
            "invalid {} '{}'",
            kind, value
        )));
    }
    Ok(())
}

fn inspect_nodes() -> RemoteCommand {
    RemoteCommand::sudo("docker node inspect $(sudo docker node ls -q)").mask_output()
}

/// List the labels of every swarm node
pub async fn list_labels(remote: &Remote, leader: &Node) -> Result<Vec<NodeLabels>> {
    let output = remote.exec_or_exit(&leader.host, inspect_nodes()).await;
    parse_node_labels(&output)
}

/// Labels of every swarm node, for use inside a larger operation
pub async fn node_labels(remote: &Remote, leader: &Node) -> Result<Vec<NodeLabels>> {
    let output = remote.exec(&leader.host, inspect_nodes()).await?;
    parse_node_labels(&output)
}

/// Add `label` (`key` or `key=value`) to swarm node `node`
pub async fn add_label(remote: &Remote, leader: &Node, node: &str, label: &str) -> Result<()> {
    check_word("node", node)?;
    check_word("label", label)?;
    remote
        .exec_or_exit(
            &leader.host,
            RemoteCommand::sudo(format!("docker node update --label-add {} {}", label, node))
                .titled(format!("Adding label {} to {}", label, node)),
        )
        .await;
    Ok(())
}

/// Remove label `key` from swarm node `node`
pub async fn remove_label(remote: &Remote, leader: &Node, node: &str, key: &str) -> Result<()> {
    check_word("node", node)?;
    check_word("label", key)?;
    remote
        .exec_or_exit(
            &leader.host,
            RemoteCommand::sudo(format!("docker node update --label-rm {} {}", key, node))
                .titled(format!("Removing label {} from {}", key, node)),
        )
        .await;
    Ok(())
}
