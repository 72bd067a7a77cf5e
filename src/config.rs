//! Cluster configuration file
//!
//! `flotilla.yml` lives next to `nodes.yml` in the working directory and is
//! never written by cluster commands; only `flotilla init` creates it.

use crate::error::{FlotillaError, Result};
use crate::remote::DEFAULT_SSH_PORT;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file name inside the working directory
pub const CONFIG_FILE_NAME: &str = "flotilla.yml";

/// Default reverse proxy compose template, relative to the working directory
pub const DEFAULT_PROXY_COMPOSE_FILE: &str = "traefik/traefik.yml";

/// Default monitoring compose template
pub const DEFAULT_MONITORING_COMPOSE_FILE: &str = "swarmprom/swarmprom.yml";

/// Default log stack compose template
pub const DEFAULT_LOGS_COMPOSE_FILE: &str = "elk/elk.yml";

/// Cluster settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Organization name, available to templates
    #[serde(default)]
    pub organization: String,
    /// Cluster name, also the default key file name
    pub cluster: String,
    /// User for first contact with fresh hosts
    #[serde(default = "default_root_user")]
    pub root_user: String,
    /// User created on every node and used afterwards
    #[serde(default = "default_cluster_user")]
    pub cluster_user: String,
    /// Public key path, `~/.ssh/<cluster>.pub` when unset
    #[serde(default)]
    pub public_key: Option<String>,
    /// Private key path, `~/.ssh/<cluster>` when unset
    #[serde(default)]
    pub private_key: Option<String>,
    /// SSH port on every node
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// Pinned `docker-ce` package version, latest when unset
    #[serde(default)]
    pub docker_version: Option<String>,
    /// Public domain served by the reverse proxy
    #[serde(default)]
    pub domain: String,
    /// Let's Encrypt registration email
    #[serde(default)]
    pub email: String,
    /// Request certificates from Let's Encrypt
    #[serde(default)]
    pub acme_enabled: bool,
    /// Create overlay networks with `--opt encrypted`
    #[serde(default)]
    pub encrypt_swarm_networks: bool,
    /// Reverse proxy image
    #[serde(default = "default_traefik_image")]
    pub traefik_image: String,
    /// Reverse proxy compose template, relative to the working directory
    #[serde(default = "default_proxy_compose_file")]
    pub proxy_compose_file: String,
    /// Monitoring compose template; its whole directory is uploaded
    #[serde(default = "default_monitoring_compose_file")]
    pub monitoring_compose_file: String,
    /// Log stack compose template; its whole directory is uploaded
    #[serde(default = "default_logs_compose_file")]
    pub logs_compose_file: String,
    /// Grafana admin user
    #[serde(default = "default_web_user")]
    pub grafana_user: String,
    /// Basic auth user in front of Prometheus
    #[serde(default = "default_web_user")]
    pub prometheus_user: String,
    /// Basic auth user in front of Kibana
    #[serde(default = "default_web_user")]
    pub kibana_user: String,
    /// How long to wait for the proxy certificate, in seconds
    #[serde(default = "default_certificate_timeout")]
    pub certificate_timeout_secs: u64,
    /// Interval between certificate checks, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_root_user() -> String {
    "root".to_string()
}

fn default_cluster_user() -> String {
    "cluster".to_string()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_traefik_image() -> String {
    "traefik:v2.11".to_string()
}

fn default_proxy_compose_file() -> String {
    DEFAULT_PROXY_COMPOSE_FILE.to_string()
}

fn default_monitoring_compose_file() -> String {
    DEFAULT_MONITORING_COMPOSE_FILE.to_string()
}

fn default_logs_compose_file() -> String {
    DEFAULT_LOGS_COMPOSE_FILE.to_string()
}

fn default_web_user() -> String {
    "admin".to_string()
}

fn default_certificate_timeout() -> u64 {
    180
}

fn default_poll_interval() -> u64 {
    10
}

impl ClusterConfig {
    /// Create a config with defaults for everything but the names
    pub fn new(organization: &str, cluster: &str) -> Self {
        Self {
            organization: organization.to_string(),
            cluster: cluster.to_string(),
            root_user: default_root_user(),
            cluster_user: default_cluster_user(),
            public_key: None,
            private_key: None,
            ssh_port: default_ssh_port(),
            docker_version: None,
            domain: String::new(),
            email: String::new(),
            acme_enabled: false,
            encrypt_swarm_networks: false,
            traefik_image: default_traefik_image(),
            proxy_compose_file: default_proxy_compose_file(),
            monitoring_compose_file: default_monitoring_compose_file(),
            logs_compose_file: default_logs_compose_file(),
            grafana_user: default_web_user(),
            prometheus_user: default_web_user(),
            kibana_user: default_web_user(),
            certificate_timeout_secs: default_certificate_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }

    /// Config file location for `working_dir`
    pub fn path(working_dir: &Path) -> PathBuf {
        working_dir.join(CONFIG_FILE_NAME)
    }

    /// Load and validate `flotilla.yml` from `working_dir`
    pub fn load(working_dir: &Path) -> Result<Self> {
        let path = Self::path(working_dir);
        if !path.exists() {
            return Err(FlotillaError::MissingFile(format!(
                "{} not found, run `flotilla init` first",
                path.display()
            )));
        }

        let content = fs::read_to_string(&path)?;
        let config: ClusterConfig = serde_yaml::from_str(&content).map_err(|e| {
            FlotillaError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;

        tracing::debug!("Loaded cluster config from {}", path.display());
        Ok(config)
    }

    /// Write this config as `flotilla.yml`, refusing to overwrite
    pub fn create(&self, working_dir: &Path) -> Result<PathBuf> {
        self.validate()?;

        let path = Self::path(working_dir);
        if path.exists() {
            return Err(FlotillaError::InvalidArgument(format!(
                "{} already exists",
                path.display()
            )));
        }

        fs::create_dir_all(working_dir)?;
        fs::write(&path, serde_yaml::to_string(self)?)?;
        Ok(path)
    }

    /// Check required settings
    pub fn validate(&self) -> Result<()> {
        if self.cluster.trim().is_empty() {
            return Err(FlotillaError::InvalidConfig(
                "cluster name must not be empty".to_string(),
            ));
        }
        if self.cluster_user.trim().is_empty() || self.root_user.trim().is_empty() {
            return Err(FlotillaError::InvalidConfig(
                "root_user and cluster_user must not be empty".to_string(),
            ));
        }
        if self.acme_enabled && (self.domain.is_empty() || self.email.is_empty()) {
            return Err(FlotillaError::InvalidConfig(
                "acme_enabled requires domain and email".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(FlotillaError::InvalidConfig(
                "poll_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Private key path
    pub fn private_key_path(&self) -> Result<PathBuf> {
        match &self.private_key {
            Some(path) => expand_home(path),
            None => Ok(ssh_dir()?.join(&self.cluster)),
        }
    }

    /// Public key path
    pub fn public_key_path(&self) -> Result<PathBuf> {
        match &self.public_key {
            Some(path) => expand_home(path),
            None => Ok(ssh_dir()?.join(format!("{}.pub", self.cluster))),
        }
    }

    /// Read the public key installed on new nodes
    pub fn read_public_key(&self) -> Result<String> {
        let path = self.public_key_path()?;
        if !path.exists() {
            return Err(FlotillaError::MissingFile(format!(
                "public key {}",
                path.display()
            )));
        }
        let key = fs::read_to_string(&path)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(FlotillaError::InvalidConfig(format!(
                "public key {} is empty",
                path.display()
            )));
        }
        Ok(key.to_string())
    }

    /// Values available to compose templates as `{{.Key}}`
    pub fn template_values(&self) -> HashMap<String, String> {
        let mut values = HashMap::new();
        values.insert("Organization".to_string(), self.organization.clone());
        values.insert("Cluster".to_string(), self.cluster.clone());
        values.insert("ClusterUser".to_string(), self.cluster_user.clone());
        values.insert("Domain".to_string(), self.domain.clone());
        values.insert("Email".to_string(), self.email.clone());
        values.insert("ACMEEnabled".to_string(), self.acme_enabled.to_string());
        values.insert("Traefik".to_string(), self.traefik_image.clone());
        values.insert("GrafanaUser".to_string(), self.grafana_user.clone());
        values
    }
}

fn ssh_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".ssh"))
        .ok_or_else(|| FlotillaError::InvalidConfig("cannot determine home directory".to_string()))
}

fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .ok_or_else(|| {
                FlotillaError::InvalidConfig("cannot determine home directory".to_string())
            }),
        None => Ok(PathBuf::from(path)),
    }
}
