//! Flotilla - Docker Swarm provisioning over SSH
//!
//! This is the main CLI entry point for Flotilla.

use clap::{Parser, Subcommand};
use flotilla::config::ClusterConfig;
use flotilla::error::{FlotillaError, Result};
use flotilla::fanout::{FanOut, FanOutReport};
use flotilla::inventory::InventoryStore;
use flotilla::ops::{self, CertificateWait, ClusterContext, MonitoringCredentials};
use flotilla::remote::SshExecutor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Flotilla - Docker Swarm provisioning over SSH
#[derive(Parser)]
#[command(name = "flotilla")]
#[command(version)]
#[command(about = "Provision a Docker Swarm cluster over SSH", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Directory holding flotilla.yml and nodes.yml
    #[arg(short, long, global = true, default_value = ".")]
    workdir: PathBuf,

    /// Passphrase for the cluster private key
    #[arg(long, global = true, env = "FLOTILLA_KEY_PASSPHRASE", hide_env_values = true)]
    key_passphrase: Option<String>,

    /// Fail a node whose work takes longer than this many seconds
    #[arg(long, global = true)]
    worker_timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create flotilla.yml and the default proxy template
    Init {
        /// Organization name
        #[arg(long)]
        organization: String,
        /// Cluster name, also the default key file name
        #[arg(long)]
        cluster: String,
    },

    /// Bootstrap hosts and add them to the inventory
    Add {
        /// Nodes as <alias>=<host>
        #[arg(required = true)]
        nodes: Vec<String>,
        /// Hosts already accept the cluster key, skip user and firewall setup
        #[arg(short, long)]
        skip_ssh: bool,
        /// Password of the root user on the new hosts
        #[arg(long, env = "FLOTILLA_ROOT_PASSWORD", hide_env_values = true)]
        root_password: Option<String>,
    },

    /// Install docker on nodes
    Docker {
        /// Node aliases, all nodes without docker when empty
        aliases: Vec<String>,
        /// Reinstall even where docker is present
        #[arg(short, long)]
        upgrade: bool,
    },

    /// Initialise the swarm or join nodes to it
    Swarm {
        /// Join as managers; the first alias initialises the swarm if needed
        #[arg(short, long)]
        manager: bool,
        /// Node aliases
        aliases: Vec<String>,
    },

    /// Deploy the reverse proxy stack on the leader
    Proxy,

    /// Deploy Prometheus and Grafana; needs the reverse proxy
    Mon {
        /// Grafana admin password
        #[arg(long, env = "FLOTILLA_GRAFANA_PASSWORD", hide_env_values = true)]
        grafana_password: String,
        /// Prometheus basic auth password
        #[arg(long, env = "FLOTILLA_PROMETHEUS_PASSWORD", hide_env_values = true)]
        prometheus_password: String,
    },

    /// Deploy the Elasticsearch, Logstash and Kibana stack; needs the reverse proxy
    Logs {
        /// Kibana basic auth password
        #[arg(long, env = "FLOTILLA_KIBANA_PASSWORD", hide_env_values = true)]
        kibana_password: String,
    },

    /// Manage swarm node labels
    Label {
        #[command(subcommand)]
        command: LabelCommands,
    },

    /// List known nodes
    Nodes,
}

#[derive(Subcommand)]
enum LabelCommands {
    /// List labels of every swarm node
    #[command(name = "ls")]
    List,
    /// Add a label (key or key=value) to a node
    Add {
        /// Swarm node name
        node: String,
        /// Label
        label: String,
    },
    /// Remove a label from a node
    #[command(name = "rm")]
    Remove {
        /// Swarm node name
        node: String,
        /// Label key
        key: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let workdir = cli.workdir;
    let passphrase = cli.key_passphrase;
    let fanout = {
        let fanout = FanOut::new(InventoryStore::new(&workdir));
        match cli.worker_timeout {
            Some(secs) => fanout.with_worker_timeout(Duration::from_secs(secs)),
            None => fanout,
        }
    };

    match cli.command {
        Commands::Init {
            organization,
            cluster,
        } => {
            let config = ClusterConfig::new(&organization, &cluster);
            let path = config.create(&workdir)?;
            println!("Created {}", path.display());
            if let Some(template) = ops::write_default_template(&workdir, &config)? {
                println!("Created {}", template.display());
            }
            let stack_files = ops::monitoring::write_default_files(&workdir, &config)?
                .into_iter()
                .chain(ops::logs::write_default_files(&workdir, &config)?);
            for file in stack_files {
                println!("Created {}", file.display());
            }
            println!("Review the settings, then run `flotilla add <alias>=<host>`");
        }

        Commands::Add {
            nodes,
            skip_ssh,
            root_password,
        } => {
            let ctx = load_context(&workdir, passphrase)?;
            let root_password = match (skip_ssh, root_password) {
                (true, _) => None,
                (false, Some(password)) => Some(password),
                (false, None) => {
                    return Err(FlotillaError::InvalidArgument(
                        "--root-password (or FLOTILLA_ROOT_PASSWORD) is required unless --skip-ssh"
                            .to_string(),
                    ))
                }
            };
            let report = ops::add_nodes(&ctx, &fanout, &nodes, root_password.as_deref()).await?;
            finish(&report)?;
        }

        Commands::Docker { aliases, upgrade } => {
            let ctx = load_context(&workdir, passphrase)?;
            let report = ops::install_docker(&ctx, &fanout, &aliases, upgrade).await?;
            finish(&report)?;
        }

        Commands::Swarm { manager, aliases } => {
            let ctx = load_context(&workdir, passphrase)?;
            match ops::join_swarm(&ctx, &fanout, &aliases, manager).await? {
                Some(report) => finish(&report)?,
                None => println!("Swarm initialised"),
            }
        }

        Commands::Proxy => {
            let ctx = load_context(&workdir, passphrase)?;
            let wait = CertificateWait::from_config(&ctx.config);
            let leader = ops::deploy_proxy(&ctx, fanout.store(), &workdir, wait).await?;
            println!("Reverse proxy deployed on {}", leader);
        }

        Commands::Mon {
            grafana_password,
            prometheus_password,
        } => {
            let ctx = load_context(&workdir, passphrase)?;
            let credentials = MonitoringCredentials {
                grafana_password,
                prometheus_password,
            };
            let leader =
                ops::deploy_monitoring(&ctx, fanout.store(), &workdir, &credentials).await?;
            println!("Monitoring deployed on {}", leader);
        }

        Commands::Logs { kibana_password } => {
            let ctx = load_context(&workdir, passphrase)?;
            let leader = ops::deploy_logs(&ctx, &fanout, &workdir, &kibana_password).await?;
            println!("Log stack deployed on {}", leader);
        }

        Commands::Label { command } => {
            let ctx = load_context(&workdir, passphrase)?;
            let inventory = fanout.store().load()?;
            let leader = ops::require_leader(&inventory, "label")?;
            let remote = ctx.cluster_remote()?;

            match command {
                LabelCommands::List => {
                    let nodes = ops::list_labels(&remote, leader).await?;
                    println!("{:<30} {}", "NODE", "LABELS");
                    for node in nodes {
                        println!("{:<30} {}", node.hostname, node);
                    }
                }
                LabelCommands::Add { node, label } => {
                    ops::add_label(&remote, leader, &node, &label).await?;
                    println!("ok");
                }
                LabelCommands::Remove { node, key } => {
                    ops::remove_label(&remote, leader, &node, &key).await?;
                    println!("ok");
                }
            }
        }

        Commands::Nodes => {
            let inventory = fanout.store().load()?;
            if inventory.is_empty() {
                println!("No nodes yet, add some with `flotilla add <alias>=<host>`");
                return Ok(());
            }
            println!(
                "{:<16} {:<20} {:<12} {:<10} {:<6}",
                "ALIAS", "HOST", "DOCKER", "SWARM", "PROXY"
            );
            for node in inventory.nodes() {
                let docker = if node.has_docker() {
                    node.docker_version.as_str()
                } else {
                    "-"
                };
                println!(
                    "{:<16} {:<20} {:<12} {:<10} {:<6}",
                    node.alias,
                    node.host,
                    docker,
                    node.swarm_role.to_string(),
                    if node.has_reverse_proxy { "yes" } else { "-" }
                );
            }
        }
    }

    Ok(())
}

/// Config, key and SSH transport for commands that reach the cluster
fn load_context(workdir: &Path, passphrase: Option<String>) -> Result<ClusterContext> {
    let config = ClusterConfig::load(workdir)?;
    let key = config.private_key_path()?;
    if !key.exists() {
        return Err(FlotillaError::MissingFile(format!(
            "private key {}",
            key.display()
        )));
    }
    Ok(ClusterContext::new(config, Arc::new(SshExecutor::new())).with_key_passphrase(passphrase))
}

fn finish(report: &FanOutReport) -> Result<()> {
    report.check()?;
    println!(
        "{}: done on {} node(s)",
        report.operation, report.total
    );
    Ok(())
}
