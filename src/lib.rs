//! Flotilla - Docker Swarm provisioning over SSH
//!
//! Flotilla turns a list of freshly installed hosts into a Docker Swarm
//! cluster. Everything happens through plain SSH sessions:
//!
//! - Bootstrapping hosts with a cluster user, key login and a firewall
//! - Installing Docker
//! - Initialising the swarm and joining managers and workers
//! - Deploying a reverse proxy stack from a compose template
//! - Monitoring (Prometheus, Grafana) and log (ELK) stacks behind the proxy
//! - Managing swarm node labels
//!
//! Per-node work fans out concurrently; see [`fanout`].

pub mod config;
pub mod error;
pub mod fanout;
pub mod inventory;
pub mod ops;
pub mod remote;
pub mod template;

#[cfg(test)]
mod testing;

pub use error::{FlotillaError, Result};
