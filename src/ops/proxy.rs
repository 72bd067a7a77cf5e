//! Reverse proxy stack on the swarm leader

use super::stack::upload;
use super::{require_leader, ClusterContext};
use crate::config::ClusterConfig;
use crate::error::{FlotillaError, Result};
use crate::inventory::{InventoryStore, Node};
use crate::remote::{wait_for_marker, RemoteCommand};
use crate::template;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Stack and overlay network name
pub const PROXY_STACK: &str = "traefik";

/// Log line printed once the ACME certificate arrived
pub const CERTIFICATE_MARKER: &str = "Server responded with a certificate";

/// Compose template written by `flotilla init`
pub const DEFAULT_PROXY_TEMPLATE: &str = r#"version: "3.7"

services:
  traefik:
    image: {{.Traefik}}
    command:
      - --providers.docker.swarmMode=true
      - --providers.docker.exposedByDefault=false
      - --providers.docker.network=traefik
      - --entrypoints.web.address=:80
      - --entrypoints.websecure.address=:443
      - --certificatesresolvers.le.acme.email={{.Email}}
      - --certificatesresolvers.le.acme.storage=/certificates/acme.json
      - --certificatesresolvers.le.acme.tlschallenge=true
      - --log.level=DEBUG
    ports:
      - 80:80
      - 443:443
    volumes:
      - /var/run/docker.sock:/var/run/docker.sock:ro
      - certificates:/certificates
    networks:
      - traefik
    deploy:
      placement:
        constraints:
          - node.role == manager
      labels:
        - traefik.enable=true
        - traefik.http.routers.dashboard.rule=Host(`traefik.{{.Domain}}`)
        - traefik.http.routers.dashboard.service=api@internal
        - traefik.http.services.dashboard.loadbalancer.server.port=8080

volumes:
  certificates:

networks:
  traefik:
    external: true
"#;

/// Bounded wait for the ACME certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateWait {
    /// Time between log checks
    pub interval: Duration,
    /// Give up after this long
    pub timeout: Duration,
}

impl CertificateWait {
    /// Settings from the cluster config
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.poll_interval_secs),
            timeout: Duration::from_secs(config.certificate_timeout_secs),
        }
    }
}

/// Write the default compose template unless one exists already
pub fn write_default_template(working_dir: &Path, config: &ClusterConfig) -> Result<Option<PathBuf>> {
    let path = working_dir.join(&config.proxy_compose_file);
    if path.exists() {
        return Ok(None);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, DEFAULT_PROXY_TEMPLATE)?;
    Ok(Some(path))
}

/// Deploy the reverse proxy stack on the leader and mark it in the inventory
pub async fn deploy_proxy(
    ctx: &ClusterContext,
    store: &InventoryStore,
    working_dir: &Path,
    wait: CertificateWait,
) -> Result<Node> {
    let config = &ctx.config;
    let mut inventory = store.load()?;
    let leader = require_leader(&inventory, "proxy")?.clone();

    let template_path = working_dir.join(&config.proxy_compose_file);
    let compose = template::render_file(&template_path, &config.template_values())?;
    let file_name = template_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            FlotillaError::InvalidConfig(format!(
                "proxy_compose_file {} has no file name",
                config.proxy_compose_file
            ))
        })?;
    let remote_path = format!("{}/{}", PROXY_STACK, file_name);

    let remote = ctx.cluster_remote()?;
    let host = leader.host.as_str();
    let encrypted = if config.encrypt_swarm_networks {
        " --opt encrypted"
    } else {
        ""
    };

    if config.acme_enabled {
        tracing::info!("Deploying {} with Let's Encrypt for {}", PROXY_STACK, config.domain);
    } else {
        tracing::info!("Deploying {} without certificates", PROXY_STACK);
    }

    remote
        .exec_all(
            host,
            &[
                RemoteCommand::sudo(format!(
                    "docker network create -d overlay{} {} || true",
                    encrypted, PROXY_STACK
                ))
                .titled("Creating overlay network"),
                RemoteCommand::new(format!("mkdir -p {}", PROXY_STACK)),
                upload(&remote_path, &compose)?,
                RemoteCommand::sudo(format!(
                    "docker stack deploy -c {} {}",
                    remote_path, PROXY_STACK
                ))
                .titled(format!("Deploying {} stack", PROXY_STACK)),
            ],
        )
        .await?;

    if config.acme_enabled {
        tracing::info!("{}: waiting for certificate", host);
        wait_for_marker(
            &remote,
            host,
            &RemoteCommand::sudo(format!("docker service logs {0}_{0}", PROXY_STACK)),
            CERTIFICATE_MARKER,
            wait.interval,
            wait.timeout,
        )
        .await?;
        tracing::info!("{}: certificate received", host);
    }

    inventory.update(host, |node| node.has_reverse_proxy = true)?;
    store.save(&inventory)?;

    let leader = inventory
        .get(host)
        .cloned()
        .ok_or_else(|| FlotillaError::NodeNotFound(host.to_string()))?;
    tracing::info!("{} deployed on {}", PROXY_STACK, leader.alias);
    Ok(leader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Inventory, SwarmRole};
    use crate::ops::test_support::context;
    use crate::testing::ScriptedExecutor;
    use std::sync::Arc;
    use tempfile::tempdir;

    const FAST: CertificateWait = CertificateWait {
        interval: Duration::from_millis(5),
        timeout: Duration::from_millis(100),
    };

    fn setup(ctx: &ClusterContext) -> (tempfile::TempDir, InventoryStore) {
        let temp = tempdir().unwrap();
        let store = InventoryStore::new(temp.path());
        let mut leader = Node::new("10.0.0.1", "a");
        leader.docker_version = "24.0.7".to_string();
        leader.swarm_role = SwarmRole::Leader;
        let mut worker = Node::new("10.0.0.2", "b");
        worker.docker_version = "24.0.7".to_string();
        worker.swarm_role = SwarmRole::Worker;
        store.save(&Inventory::from_nodes(vec![leader, worker]).unwrap()).unwrap();
        write_default_template(temp.path(), &ctx.config).unwrap();
        (temp, store)
    }

    #[tokio::test]
    async fn test_deploy_without_acme() {
        let executor = Arc::new(ScriptedExecutor::new());
        let ctx = context(executor.clone());
        let (temp, store) = setup(&ctx);

        let leader = deploy_proxy(&ctx, &store, temp.path(), FAST).await.unwrap();

        assert!(leader.has_reverse_proxy);
        let persisted = store.load().unwrap();
        assert!(persisted.get("10.0.0.1").unwrap().has_reverse_proxy);
        assert!(!persisted.get("10.0.0.2").unwrap().has_reverse_proxy);

        let commands = executor.commands_for("10.0.0.1");
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0], "sudo docker network create -d overlay traefik || true");
        assert!(commands[2].starts_with("cat > traefik/traefik.yml << 'FLOTILLA_EOF'\n"));
        assert!(commands[2].contains("image: traefik:v2.11"));
        assert!(commands[2].ends_with("\nFLOTILLA_EOF"));
        assert_eq!(commands[3], "sudo docker stack deploy -c traefik/traefik.yml traefik");
        assert!(executor.commands_for("10.0.0.2").is_empty());
    }

    #[tokio::test]
    async fn test_deploy_with_acme_waits_for_certificate() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond(
            "10.0.0.1",
            "docker service logs traefik_traefik",
            "level=debug msg=\"Server responded with a certificate.\"",
        );
        let mut ctx = context(executor.clone());
        ctx.config.acme_enabled = true;
        ctx.config.domain = "example.com".to_string();
        ctx.config.email = "ops@example.com".to_string();
        ctx.config.encrypt_swarm_networks = true;
        let (temp, store) = setup(&ctx);

        deploy_proxy(&ctx, &store, temp.path(), FAST).await.unwrap();

        let commands = executor.commands_for("10.0.0.1");
        assert_eq!(
            commands[0],
            "sudo docker network create -d overlay --opt encrypted traefik || true"
        );
        assert!(commands[2].contains("acme.email=ops@example.com"));
        assert!(commands[2].contains("Host(`traefik.example.com`)"));
        assert_eq!(
            commands.last().map(String::as_str),
            Some("sudo docker service logs traefik_traefik")
        );
    }

    #[tokio::test]
    async fn test_certificate_timeout_leaves_leader_unmarked() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("10.0.0.1", "docker service logs", "level=info msg=\"waiting\"");
        let mut ctx = context(executor.clone());
        ctx.config.acme_enabled = true;
        ctx.config.domain = "example.com".to_string();
        ctx.config.email = "ops@example.com".to_string();
        let (temp, store) = setup(&ctx);

        let result = deploy_proxy(&ctx, &store, temp.path(), FAST).await;

        assert!(matches!(result, Err(FlotillaError::Timeout(_))));
        assert!(!store.load().unwrap().get("10.0.0.1").unwrap().has_reverse_proxy);
    }

    #[tokio::test]
    async fn test_requires_leader_and_template() {
        let executor = Arc::new(ScriptedExecutor::new());
        let ctx = context(executor.clone());

        let temp = tempdir().unwrap();
        let store = InventoryStore::new(temp.path());
        store
            .save(&Inventory::from_nodes(vec![Node::new("10.0.0.1", "a")]).unwrap())
            .unwrap();
        let result = deploy_proxy(&ctx, &store, temp.path(), FAST).await;
        assert!(matches!(result, Err(FlotillaError::Swarm(_))));

        let (temp, store) = setup(&ctx);
        fs::remove_file(temp.path().join(&ctx.config.proxy_compose_file)).unwrap();
        let result = deploy_proxy(&ctx, &store, temp.path(), FAST).await;
        assert!(matches!(result, Err(FlotillaError::MissingFile(_))));
        assert!(executor.commands_for("10.0.0.1").is_empty());
    }

    #[tokio::test]
    async fn test_template_ending_the_upload_early_is_rejected() {
        let executor = Arc::new(ScriptedExecutor::new());
        let ctx = context(executor.clone());
        let (temp, store) = setup(&ctx);
        fs::write(
            temp.path().join(&ctx.config.proxy_compose_file),
            "version: \"3.7\"\nFLOTILLA_EOF\nsudo reboot\n",
        )
        .unwrap();

        let result = deploy_proxy(&ctx, &store, temp.path(), FAST).await;

        assert!(matches!(result, Err(FlotillaError::InvalidArgument(_))));
        assert!(executor.commands_for("10.0.0.1").is_empty());
        assert!(!store.load().unwrap().get("10.0.0.1").unwrap().has_reverse_proxy);
    }

    #[test]
    fn test_write_default_template_keeps_existing() {
        let temp = tempdir().unwrap();
        let config = ClusterConfig::new("acme", "prod");

        let written = write_default_template(temp.path(), &config).unwrap();
        assert!(written.is_some());
        let path = temp.path().join(&config.proxy_compose_file);
        fs::write(&path, "custom").unwrap();

        assert!(write_default_template(temp.path(), &config).unwrap().is_none());
        assert_eq!(fs::read_to_string(path).unwrap(), "custom");
    }

    #[test]
    fn test_default_template_renders() {
        let config = ClusterConfig::new("acme", "prod");
        let rendered = template::render(DEFAULT_PROXY_TEMPLATE, &config.template_values()).unwrap();
        assert!(!rendered.contains("{{"));
    }
}
