//! Fan-out/fan-in over cluster nodes
//!
//! [`FanOut::run`] applies one [`NodeOperation`] to every target node at
//! once, one tokio task per node. Each task reports exactly one [`Outcome`]
//! over a channel owned by the invocation. Once every outcome is in, the
//! successful nodes are merged into the inventory by host and the inventory
//! is persisted, whether or not some nodes failed. The verdict comes last.

use crate::error::{FlotillaError, Result};
use crate::inventory::{Inventory, InventoryStore, Node};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A per-node remote operation
#[async_trait]
pub trait NodeOperation: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Bring `node` to the desired state and return its new record.
    ///
    /// Must return errors, never exit the process.
    async fn apply(&self, node: Node) -> Result<Node>;
}

/// Why a node failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    /// Node host
    pub host: String,
    /// Node alias
    pub alias: String,
    /// Error message
    pub message: String,
}

/// Result of one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation succeeded and produced a new node record
    Updated(Node),
    /// The operation failed
    Failed(NodeFailure),
}

impl Outcome {
    /// Host the outcome belongs to
    pub fn host(&self) -> &str {
        match self {
            Outcome::Updated(node) => &node.host,
            Outcome::Failed(failure) => &failure.host,
        }
    }
}

/// Summary of a finished fan-out
#[derive(Debug, Clone)]
pub struct FanOutReport {
    /// Operation name
    pub operation: String,
    /// Inventory as persisted
    pub inventory: Inventory,
    /// Nodes that were updated, in dispatch order
    pub updated: Vec<Node>,
    /// Failed nodes, sorted by host
    pub failures: Vec<NodeFailure>,
    /// Number of dispatched nodes
    pub total: usize,
}

impl FanOutReport {
    /// Check if every node succeeded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn failures into an error
    pub fn check(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(FlotillaError::PartialFailure {
                failed: self.failures.len(),
                total: self.total,
            })
        }
    }
}

/// Fan-out orchestrator
#[derive(Debug, Clone)]
pub struct FanOut {
    /// Where the merged inventory is persisted
    store: InventoryStore,
    /// Upper bound for a single worker
    worker_timeout: Option<Duration>,
}

impl FanOut {
    /// Create an orchestrator persisting to `store`
    pub fn new(store: InventoryStore) -> Self {
        Self {
            store,
            worker_timeout: None,
        }
    }

    /// Fail any worker that runs longer than `timeout`
    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = Some(timeout);
        self
    }

    /// Inventory store the orchestrator persists to
    pub fn store(&self) -> &InventoryStore {
        &self.store
    }

    /// Run `operation` on every target, merge and persist.
    ///
    /// Returns an error only for pre-condition and persistence failures.
    /// Per-node failures are in the report; call [`FanOutReport::check`] to
    /// turn them into the command verdict.
    pub async fn run<O: NodeOperation>(
        &self,
        mut inventory: Inventory,
        targets: Vec<Node>,
        operation: Arc<O>,
    ) -> Result<FanOutReport> {
        let name = operation.name().to_string();

        if targets.is_empty() {
            return Err(FlotillaError::NothingToDo(format!(
                "no target nodes for {}",
                name
            )));
        }

        let mut seen = HashSet::new();
        for node in &targets {
            if !seen.insert(node.host.as_str()) {
                return Err(FlotillaError::InvalidArgument(format!(
                    "{} targeted more than once",
                    node.host
                )));
            }
        }

        let total = targets.len();
        let order: Vec<String> = targets.iter().map(|n| n.host.clone()).collect();
        tracing::info!("{}: starting on {} node(s)", name, total);

        let (tx, mut rx) = mpsc::channel::<Outcome>(total);
        let mut workers = Vec::with_capacity(total);

        for node in targets {
            let tx = tx.clone();
            let operation = Arc::clone(&operation);
            let timeout = self.worker_timeout;
            let host = node.host.clone();
            let alias = node.alias.clone();

            let handle = tokio::spawn(async move {
                let outcome = run_worker(operation.as_ref(), node, timeout).await;
                // The receiver outlives every worker
                let _ = tx.send(outcome).await;
            });
            workers.push((host, alias, handle));
        }
        drop(tx);

        let mut outcomes: HashMap<String, Outcome> = HashMap::with_capacity(total);
        for _ in 0..total {
            match rx.recv().await {
                Some(outcome) => {
                    outcomes.insert(outcome.host().to_string(), outcome);
                }
                // Every sender is gone: the remaining workers died
                None => break,
            }
        }

        for (host, alias, handle) in workers {
            let joined = handle.await;
            if outcomes.contains_key(&host) {
                continue;
            }
            let message = match joined {
                Err(e) if e.is_panic() => "worker panicked".to_string(),
                Err(e) => format!("worker aborted: {}", e),
                Ok(()) => "worker finished without reporting".to_string(),
            };
            outcomes.insert(
                host.clone(),
                Outcome::Failed(NodeFailure {
                    host,
                    alias,
                    message,
                }),
            );
        }

        let mut updates = HashMap::new();
        let mut updated = Vec::new();
        let mut failures = Vec::new();

        for host in &order {
            match outcomes.remove(host) {
                Some(Outcome::Updated(node)) => {
                    updated.push(node.clone());
                    updates.insert(host.clone(), node);
                }
                Some(Outcome::Failed(failure)) => failures.push(failure),
                None => failures.push(NodeFailure {
                    host: host.clone(),
                    alias: String::new(),
                    message: "no outcome received".to_string(),
                }),
            }
        }
        failures.sort_by(|a, b| a.host.cmp(&b.host));

        for failure in &failures {
            tracing::error!("Host: {}, returns error: {}", failure.host, failure.message);
        }

        inventory.merge(updates, &order);
        self.store.save(&inventory)?;

        if failures.is_empty() {
            tracing::info!("{}: finished on all {} node(s)", name, total);
        } else {
            tracing::warn!(
                "{}: failed on {} of {} node(s), progress saved to {}",
                name,
                failures.len(),
                total,
                self.store.path().display()
            );
        }

        Ok(FanOutReport {
            operation: name,
            inventory,
            updated,
            failures,
            total,
        })
    }
}

async fn run_worker<O: NodeOperation + ?Sized>(
    operation: &O,
    node: Node,
    timeout: Option<Duration>,
) -> Outcome {
    let host = node.host.clone();
    let alias = node.alias.clone();

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, operation.apply(node)).await {
            Ok(result) => result,
            Err(_) => Err(FlotillaError::Timeout(format!(
                "{} did not finish within {:?}",
                operation.name(),
                limit
            ))),
        },
        None => operation.apply(node).await,
    };

    match result {
        Ok(node) if node.host == host => Outcome::Updated(node),
        Ok(node) => Outcome::Failed(NodeFailure {
            host,
            alias,
            message: format!("operation returned a record for {}", node.host),
        }),
        Err(e) => Outcome::Failed(NodeFailure {
            host,
            alias,
            message: e.to_string(),
        }),
    }
}
