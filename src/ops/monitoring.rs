//! Monitoring stack: Prometheus, Grafana, cAdvisor and node exporter

use super::label::{node_labels, NodeLabels};
use super::stack::{self, basic_auth, require_proxy_leader, StackBundle};
use super::ClusterContext;
use crate::config::ClusterConfig;
use crate::error::{FlotillaError, Result};
use crate::inventory::{InventoryStore, Node};
use std::path::{Path, PathBuf};

/// Stack name
pub const MONITORING_STACK: &str = "prom";

/// Node label selecting the Prometheus and Grafana node
pub const PROMETHEUS_LABEL: &str = "prometheus";

/// Compose template written by `flotilla init`
pub const DEFAULT_MONITORING_TEMPLATE: &str = r#"version: "3.7"

networks:
  net:
    driver: overlay
    attachable: true
  traefik:
    external: true

volumes:
  prometheus: {}
  grafana: {}

configs:
  prometheus_config:
    file: ./prometheus.yml

services:
  cadvisor:
    image: gcr.io/cadvisor/cadvisor:v0.47.2
    networks:
      - net
    volumes:
      - /:/rootfs:ro
      - /var/run:/var/run
      - /sys:/sys:ro
      - /var/lib/docker/:/var/lib/docker:ro
    deploy:
      mode: global

  node-exporter:
    image: prom/node-exporter:v1.7.0
    networks:
      - net
    command:
      - --path.procfs=/host/proc
      - --path.sysfs=/host/sys
      - --path.rootfs=/rootfs
    volumes:
      - /proc:/host/proc:ro
      - /sys:/host/sys:ro
      - /:/rootfs:ro
    deploy:
      mode: global

  prometheus:
    image: prom/prometheus:v2.48.1
    networks:
      - net
      - traefik
    command:
      - --config.file=/etc/prometheus/prometheus.yml
      - --storage.tsdb.path=/prometheus
      - --storage.tsdb.retention.time=24h
    configs:
      - source: prometheus_config
        target: /etc/prometheus/prometheus.yml
    volumes:
      - prometheus:/prometheus
    deploy:
      placement:
        constraints:
          - node.labels.prometheus == true
      labels:
        - traefik.enable=true
        - traefik.http.routers.prometheus.rule=Host(`prometheus.{{.Domain}}`)
        - traefik.http.routers.prometheus.middlewares=prometheus-auth
        - traefik.http.middlewares.prometheus-auth.basicauth.users={{.PrometheusBasicAuth}}
        - traefik.http.services.prometheus.loadbalancer.server.port=9090

  grafana:
    image: grafana/grafana:10.2.3
    networks:
      - net
      - traefik
    environment:
      - GF_SECURITY_ADMIN_USER={{.GrafanaUser}}
      - GF_SECURITY_ADMIN_PASSWORD={{.GrafanaPassword}}
      - GF_USERS_ALLOW_SIGN_UP=false
    volumes:
      - grafana:/var/lib/grafana
    deploy:
      placement:
        constraints:
          - node.labels.prometheus == true
      labels:
        - traefik.enable=true
        - traefik.http.routers.grafana.rule=Host(`grafana.{{.Domain}}`)
        - traefik.http.services.grafana.loadbalancer.server.port=3000
"#;

/// Prometheus scrape config uploaded next to the compose file
pub const DEFAULT_PROMETHEUS_CONFIG: &str = r#"global:
  scrape_interval: 15s

scrape_configs:
  - job_name: prometheus
    static_configs:
      - targets: ["localhost:9090"]

  - job_name: node-exporter
    dns_sd_configs:
      - names: ["tasks.node-exporter"]
        type: A
        port: 9100

  - job_name: cadvisor
    dns_sd_configs:
      - names: ["tasks.cadvisor"]
        type: A
        port: 8080
"#;

/// Web UI passwords, never written to disk locally
pub struct MonitoringCredentials {
    /// Grafana admin password
    pub grafana_password: String,
    /// Prometheus basic auth password
    pub prometheus_password: String,
}

/// Write the default monitoring files unless they exist already
pub fn write_default_files(working_dir: &Path, config: &ClusterConfig) -> Result<Vec<PathBuf>> {
    let (dir, name) = stack::compose_location(&config.monitoring_compose_file)?;
    stack::write_defaults(
        working_dir,
        dir,
        &[
            (name, DEFAULT_MONITORING_TEMPLATE),
            ("prometheus.yml", DEFAULT_PROMETHEUS_CONFIG),
        ],
    )
}

/// The single node labelled `prometheus=true`
pub fn prometheus_node(nodes: &[NodeLabels]) -> Result<&NodeLabels> {
    let labelled: Vec<&NodeLabels> = nodes
        .iter()
        .filter(|node| node.labels.get(PROMETHEUS_LABEL).map(String::as_str) == Some("true"))
        .collect();

    match labelled.as_slice() {
        [node] => Ok(*node),
        [] => Err(FlotillaError::Swarm(format!(
            "no node labelled {0}=true, run `flotilla label add <node> {0}=true`",
            PROMETHEUS_LABEL
        ))),
        many => Err(FlotillaError::Swarm(format!(
            "{} nodes labelled {}=true, there must be exactly one",
            many.len(),
            PROMETHEUS_LABEL
        ))),
    }
}

/// Deploy the monitoring stack on the leader
pub async fn deploy_monitoring(
    ctx: &ClusterContext,
    store: &InventoryStore,
    working_dir: &Path,
    credentials: &MonitoringCredentials,
) -> Result<Node> {
    let config = &ctx.config;
    let inventory = store.load()?;
    let leader = require_proxy_leader(&inventory, "mon")?.clone();

    if credentials.grafana_password.is_empty() {
        return Err(FlotillaError::InvalidArgument(
            "Grafana password must not be empty".to_string(),
        ));
    }
    let mut values = config.template_values();
    values.insert(
        "GrafanaPassword".to_string(),
        credentials.grafana_password.replace('$', "$$"),
    );
    values.insert(
        "PrometheusBasicAuth".to_string(),
        basic_auth(&config.prometheus_user, &credentials.prometheus_password)?,
    );
    let bundle = StackBundle::render(
        working_dir,
        MONITORING_STACK,
        &config.monitoring_compose_file,
        &values,
    )?;

    let remote = ctx.cluster_remote()?;
    let labels = node_labels(&remote, &leader).await?;
    let node = prometheus_node(&labels)?;
    tracing::info!("Prometheus and Grafana go to {}", node.hostname);

    bundle.deploy(&remote, &leader.host, true).await?;
    tracing::info!("{} deployed on {}", MONITORING_STACK, leader.alias);
    Ok(leader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Inventory, SwarmRole};
    use crate::ops::test_support::context;
    use crate::template;
    use crate::testing::{capture_logs, ScriptedExecutor};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::tempdir;

    const INSPECT: &str = r#"[
        {"Description": {"Hostname": "mon-1"}, "Spec": {"Labels": {"prometheus": "true"}}},
        {"Description": {"Hostname": "web-1"}, "Spec": {"Labels": {}}}
    ]"#;

    fn credentials() -> MonitoringCredentials {
        MonitoringCredentials {
            grafana_password: "gr4fana".to_string(),
            prometheus_password: "pr0m".to_string(),
        }
    }

    fn setup(ctx: &ClusterContext, proxy: bool) -> (tempfile::TempDir, InventoryStore) {
        let temp = tempdir().unwrap();
        let store = InventoryStore::new(temp.path());
        let mut leader = Node::new("10.0.0.1", "a");
        leader.docker_version = "24.0.7".to_string();
        leader.swarm_role = SwarmRole::Leader;
        leader.has_reverse_proxy = proxy;
        store.save(&Inventory::from_nodes(vec![leader]).unwrap()).unwrap();
        write_default_files(temp.path(), &ctx.config).unwrap();
        (temp, store)
    }

    fn labels(hostname: &str, pairs: &[(&str, &str)]) -> NodeLabels {
        NodeLabels {
            hostname: hostname.to_string(),
            labels: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_prometheus_node_needs_exactly_one() {
        let one = vec![labels("a", &[("prometheus", "true")]), labels("b", &[])];
        assert_eq!(prometheus_node(&one).unwrap().hostname, "a");

        let none = vec![labels("a", &[("prometheus", "false")])];
        assert!(matches!(prometheus_node(&none), Err(FlotillaError::Swarm(_))));

        let two = vec![
            labels("a", &[("prometheus", "true")]),
            labels("b", &[("prometheus", "true")]),
        ];
        assert!(matches!(prometheus_node(&two), Err(FlotillaError::Swarm(msg)) if msg.contains('2')));
    }

    #[tokio::test]
    async fn test_deploy_monitoring() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("10.0.0.1", "docker node inspect", INSPECT);
        let mut ctx = context(executor.clone());
        ctx.config.domain = "example.com".to_string();
        let (temp, store) = setup(&ctx, true);

        let (result, logs) =
            capture_logs(deploy_monitoring(&ctx, &store, temp.path(), &credentials())).await;

        assert_eq!(result.unwrap().alias, "a");
        let commands = executor.commands_for("10.0.0.1");
        assert_eq!(commands.len(), 5);
        assert_eq!(commands[1], "mkdir -p swarmprom");
        assert!(commands[2].starts_with("cat > swarmprom/prometheus.yml << 'FLOTILLA_EOF'"));
        assert!(commands[3].starts_with("cat > swarmprom/swarmprom.yml << 'FLOTILLA_EOF'"));
        assert!(commands[3].contains("GF_SECURITY_ADMIN_PASSWORD=gr4fana"));
        assert!(commands[3].contains("basicauth.users=admin:$$2y$$"));
        assert!(commands[3].contains("Host(`grafana.example.com`)"));
        assert_eq!(commands[4], "sudo docker stack deploy -c swarmprom/swarmprom.yml prom");
        assert!(!logs.contains("gr4fana"));
    }

    #[tokio::test]
    async fn test_requires_reverse_proxy() {
        let executor = Arc::new(ScriptedExecutor::new());
        let ctx = context(executor.clone());
        let (temp, store) = setup(&ctx, false);

        let result = deploy_monitoring(&ctx, &store, temp.path(), &credentials()).await;

        assert!(matches!(result, Err(FlotillaError::Swarm(msg)) if msg.contains("proxy")));
        assert!(executor.commands_for("10.0.0.1").is_empty());
    }

    #[tokio::test]
    async fn test_missing_label_stops_before_upload() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("10.0.0.1", "docker node inspect", "[]");
        let ctx = context(executor.clone());
        let (temp, store) = setup(&ctx, true);

        let result = deploy_monitoring(&ctx, &store, temp.path(), &credentials()).await;

        assert!(matches!(result, Err(FlotillaError::Swarm(_))));
        assert_eq!(executor.commands_for("10.0.0.1").len(), 1);
    }

    #[test]
    fn test_default_files_render() {
        let mut values = ClusterConfig::new("acme", "prod").template_values();
        values.insert("GrafanaPassword".to_string(), "x".to_string());
        values.insert("PrometheusBasicAuth".to_string(), "admin:x".to_string());
        for file in [DEFAULT_MONITORING_TEMPLATE, DEFAULT_PROMETHEUS_CONFIG] {
            let rendered = template::render(file, &values).unwrap();
            assert!(!rendered.contains("{{"));
        }
    }
}
