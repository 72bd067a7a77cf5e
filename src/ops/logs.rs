//! Log stack: Elasticsearch, Logstash, Filebeat and Kibana

use super::stack::{self, basic_auth, require_proxy_leader, StackBundle};
use super::ClusterContext;
use crate::config::ClusterConfig;
use crate::error::Result;
use crate::fanout::{FanOut, NodeOperation};
use crate::inventory::Node;
use crate::remote::{Remote, RemoteCommand};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Stack name
pub const LOGS_STACK: &str = "elk";

/// Minimum `vm.max_map_count` for Elasticsearch
pub const MAX_MAP_COUNT: u32 = 262144;

/// Compose template written by `flotilla init`
pub const DEFAULT_LOGS_TEMPLATE: &str = r#"version: "3.7"

networks:
  net:
    driver: overlay
    attachable: true
  traefik:
    external: true

volumes:
  elasticsearch: {}

configs:
  logstash_pipeline:
    file: ./logstash.conf
  filebeat_config:
    file: ./filebeat.yml

services:
  elasticsearch:
    image: docker.elastic.co/elasticsearch/elasticsearch:7.17.16
    networks:
      - net
    environment:
      - discovery.type=single-node
      - xpack.security.enabled=false
      - ES_JAVA_OPTS=-Xms1g -Xmx1g
    volumes:
      - elasticsearch:/usr/share/elasticsearch/data
    deploy:
      replicas: 1

  logstash:
    image: docker.elastic.co/logstash/logstash:7.17.16
    networks:
      - net
    configs:
      - source: logstash_pipeline
        target: /usr/share/logstash/pipeline/logstash.conf
    deploy:
      replicas: 1

  filebeat:
    image: docker.elastic.co/beats/filebeat:7.17.16
    user: root
    command: ["filebeat", "-e", "--strict.perms=false"]
    networks:
      - net
    configs:
      - source: filebeat_config
        target: /usr/share/filebeat/filebeat.yml
    volumes:
      - /var/lib/docker/containers:/var/lib/docker/containers:ro
      - /var/run/docker.sock:/var/run/docker.sock:ro
    deploy:
      mode: global

  kibana:
    image: docker.elastic.co/kibana/kibana:7.17.16
    networks:
      - net
      - traefik
    environment:
      - ELASTICSEARCH_HOSTS=http://elasticsearch:9200
    deploy:
      replicas: 1
      labels:
        - traefik.enable=true
        - traefik.http.routers.kibana.rule=Host(`kibana.{{.Domain}}`)
        - traefik.http.routers.kibana.middlewares=kibana-auth
        - traefik.http.middlewares.kibana-auth.basicauth.users={{.KibanaBasicAuth}}
        - traefik.http.services.kibana.loadbalancer.server.port=5601
"#;

/// Logstash pipeline uploaded next to the compose file
pub const DEFAULT_LOGSTASH_PIPELINE: &str = r#"input {
  beats {
    port => 5044
  }
}

output {
  elasticsearch {
    hosts => ["http://elasticsearch:9200"]
    index => "logs-%{+YYYY.MM.dd}"
  }
}
"#;

/// Filebeat config uploaded next to the compose file
pub const DEFAULT_FILEBEAT_CONFIG: &str = r#"filebeat.inputs:
  - type: container
    paths:
      - /var/lib/docker/containers/*/*.log

processors:
  - add_docker_metadata: ~

output.logstash:
  hosts: ["logstash:5044"]
"#;

/// Write the default log stack files unless they exist already
pub fn write_default_files(working_dir: &Path, config: &ClusterConfig) -> Result<Vec<PathBuf>> {
    let (dir, name) = stack::compose_location(&config.logs_compose_file)?;
    stack::write_defaults(
        working_dir,
        dir,
        &[
            (name, DEFAULT_LOGS_TEMPLATE),
            ("logstash.conf", DEFAULT_LOGSTASH_PIPELINE),
            ("filebeat.yml", DEFAULT_FILEBEAT_CONFIG),
        ],
    )
}

/// Raises `vm.max_map_count` now and after reboots
pub struct RaiseMapCount {
    remote: Remote,
}

impl RaiseMapCount {
    /// Run as the cluster user
    pub fn new(remote: Remote) -> Self {
        Self { remote }
    }

    fn commands() -> Vec<RemoteCommand> {
        vec![
            RemoteCommand::sudo(format!("sysctl -w vm.max_map_count={}", MAX_MAP_COUNT))
                .titled("Increasing vm.max_map_count"),
            RemoteCommand::new(format!(
                "echo vm.max_map_count={} | sudo tee /etc/sysctl.d/60-flotilla-elk.conf",
                MAX_MAP_COUNT
            )),
        ]
    }
}

#[async_trait]
impl NodeOperation for RaiseMapCount {
    fn name(&self) -> &str {
        "logs"
    }

    async fn apply(&self, node: Node) -> Result<Node> {
        self.remote.exec_all(&node.host, &Self::commands()).await?;
        Ok(node)
    }
}

/// Deploy the log stack on the leader.
///
/// Every node gets the Elasticsearch kernel setting first; the stack is
/// only deployed when that worked everywhere.
pub async fn deploy_logs(
    ctx: &ClusterContext,
    fanout: &FanOut,
    working_dir: &Path,
    kibana_password: &str,
) -> Result<Node> {
    let config = &ctx.config;
    let inventory = fanout.store().load()?;
    let leader = require_proxy_leader(&inventory, "logs")?.clone();

    let mut values = config.template_values();
    values.insert(
        "KibanaBasicAuth".to_string(),
        basic_auth(&config.kibana_user, kibana_password)?,
    );
    let bundle = StackBundle::render(working_dir, LOGS_STACK, &config.logs_compose_file, &values)?;

    let remote = ctx.cluster_remote()?;
    let targets = inventory.nodes().to_vec();
    let report = fanout
        .run(inventory, targets, Arc::new(RaiseMapCount::new(remote.clone())))
        .await?;
    report.check()?;

    bundle.deploy(&remote, &leader.host, true).await?;
    tracing::info!("{} deployed on {}", LOGS_STACK, leader.alias);
    Ok(leader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlotillaError;
    use crate::inventory::{Inventory, InventoryStore, SwarmRole};
    use crate::ops::test_support::context;
    use crate::template;
    use crate::testing::ScriptedExecutor;
    use tempfile::tempdir;

    fn setup(ctx: &ClusterContext, proxy: bool) -> (tempfile::TempDir, InventoryStore) {
        let temp = tempdir().unwrap();
        let store = InventoryStore::new(temp.path());
        let mut leader = Node::new("10.0.0.1", "a");
        leader.docker_version = "24.0.7".to_string();
        leader.swarm_role = SwarmRole::Leader;
        leader.has_reverse_proxy = proxy;
        let mut worker = Node::new("10.0.0.2", "b");
        worker.docker_version = "24.0.7".to_string();
        worker.swarm_role = SwarmRole::Worker;
        store
            .save(&Inventory::from_nodes(vec![leader, worker]).unwrap())
            .unwrap();
        write_default_files(temp.path(), &ctx.config).unwrap();
        (temp, store)
    }

    #[tokio::test]
    async fn test_deploy_logs() {
        let executor = Arc::new(ScriptedExecutor::new());
        let mut ctx = context(executor.clone());
        ctx.config.domain = "example.com".to_string();
        let (temp, store) = setup(&ctx, true);
        let fanout = FanOut::new(store.clone());

        let leader = deploy_logs(&ctx, &fanout, temp.path(), "k1bana").await.unwrap();

        assert_eq!(leader.alias, "a");
        let worker = executor.commands_for("10.0.0.2");
        assert_eq!(worker[0], "sudo sysctl -w vm.max_map_count=262144");
        assert_eq!(worker.len(), 2);

        let commands = executor.commands_for("10.0.0.1");
        assert_eq!(commands.len(), 7);
        assert_eq!(commands[2], "mkdir -p elk");
        assert!(commands[3].starts_with("cat > elk/elk.yml << 'FLOTILLA_EOF'"));
        assert!(commands[3].contains("Host(`kibana.example.com`)"));
        assert!(commands[3].contains("basicauth.users=admin:$$2y$$"));
        assert!(commands[4].starts_with("cat > elk/filebeat.yml"));
        assert!(commands[5].starts_with("cat > elk/logstash.conf"));
        assert_eq!(commands[6], "sudo docker stack deploy -c elk/elk.yml elk");
    }

    #[tokio::test]
    async fn test_failed_node_blocks_deploy() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.fail_on("10.0.0.2", "sysctl");
        let ctx = context(executor.clone());
        let (temp, store) = setup(&ctx, true);
        let before = store.load().unwrap();

        let result = deploy_logs(&ctx, &FanOut::new(store.clone()), temp.path(), "k1bana").await;

        assert!(matches!(
            result,
            Err(FlotillaError::PartialFailure { failed: 1, total: 2 })
        ));
        assert!(!executor
            .commands_for("10.0.0.1")
            .iter()
            .any(|c| c.contains("stack deploy")));
        assert_eq!(store.load().unwrap(), before);
    }

    #[tokio::test]
    async fn test_requires_reverse_proxy_and_password() {
        let executor = Arc::new(ScriptedExecutor::new());
        let ctx = context(executor.clone());

        let (temp, store) = setup(&ctx, false);
        let result = deploy_logs(&ctx, &FanOut::new(store), temp.path(), "k1bana").await;
        assert!(matches!(result, Err(FlotillaError::Swarm(_))));

        let (temp, store) = setup(&ctx, true);
        let result = deploy_logs(&ctx, &FanOut::new(store), temp.path(), "").await;
        assert!(matches!(result, Err(FlotillaError::InvalidArgument(_))));

        assert!(executor.commands_for("10.0.0.1").is_empty());
        assert!(executor.commands_for("10.0.0.2").is_empty());
    }

    #[test]
    fn test_default_files_render() {
        let mut values = ClusterConfig::new("acme", "prod").template_values();
        values.insert("KibanaBasicAuth".to_string(), "admin:x".to_string());
        for file in [
            DEFAULT_LOGS_TEMPLATE,
            DEFAULT_LOGSTASH_PIPELINE,
            DEFAULT_FILEBEAT_CONFIG,
        ] {
            let rendered = template::render(file, &values).unwrap();
            assert!(!rendered.contains("{{"));
        }
    }
}
