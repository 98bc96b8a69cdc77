//! WolfGossip - Gossip-Based Cluster Membership
//!
//! Daemon and operator CLI for the gossip membership service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfgossip::api::{EventLog, HttpServer};
use wolfgossip::config::{LoggingConfig, WolfGossipConfig};
use wolfgossip::discovery;
use wolfgossip::error::{Error, Result};
use wolfgossip::gossip::{Cluster, ClusterBootstrapper, GossipService, PeerClientFactory};
use wolfgossip::network::{NetworkClientFactory, NetworkServer};
use wolfgossip::state::{Node, NodeInformation};

/// WolfGossip - Gossip-Based Cluster Membership
#[derive(Parser)]
#[command(name = "wolfgossip")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfgossip.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gossip node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfgossip.toml")]
        output: PathBuf,

        /// Endpoint other nodes use to reach this one (host:port)
        #[arg(long, default_value = "127.0.0.1:7946")]
        endpoint: String,
    },

    /// Validate configuration file
    Validate,

    /// Show the health of a running node
    Status {
        /// HTTP API address to query
        #[arg(short, long, default_value = "localhost:8946")]
        address: String,
    },

    /// List the members a running node knows about
    Members {
        /// HTTP API address to query
        #[arg(short, long, default_value = "localhost:8946")]
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file when there is one
    let logging = WolfGossipConfig::from_file(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or(logging.level.clone());
    init_logging(&level, &logging);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init { output, endpoint } => run_init(output, endpoint),
        Commands::Validate => run_validate(cli.config),
        Commands::Status { address } => run_query(&address, "health").await,
        Commands::Members { address } => run_query(&address, "members").await,
    }
}

/// Initialize logging
fn init_logging(level: &str, logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the gossip node
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting WolfGossip node...");

    let config = match WolfGossipConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            return Err(e);
        }
    };
    tracing::info!("Loaded configuration for node: {}", config.node.endpoint);

    let options = config.cluster_options();
    let factory: Arc<dyn PeerClientFactory> =
        Arc::new(NetworkClientFactory::new(options.ping_timeout()));
    let seeds = discovery::from_config(&config)?;
    let cancel = CancellationToken::new();

    let self_info = NodeInformation::create_self_node(config.node.endpoint.as_str());
    tracing::info!(
        endpoint = %self_info.endpoint,
        "Node epoch {}",
        self_info.node_version
    );
    let node = Arc::new(Node::new(self_info.clone()));

    // Serve inbound gossip before joining so seeds can reach us back
    let service = Arc::new(GossipService::new(
        Arc::clone(&node),
        Arc::clone(&factory),
        &options,
        cancel.child_token(),
    ));
    let server = match NetworkServer::bind(config.bind_address(), service, cancel.clone()).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to bind gossip server on {}: {}", config.bind_address(), e);
            return Err(e);
        }
    };
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("Gossip server error: {}", e);
        }
    });

    // State changes go to the log and to the HTTP event history
    let events = Arc::new(EventLog::new());
    let recorder_handle = events.spawn_recorder(&node, cancel.clone());
    let watcher_handle = spawn_state_watcher(&node, cancel.clone());

    let http_handle = if config.api.enabled {
        let http = HttpServer::new(config.api.clone(), Arc::clone(&node), Arc::clone(&events));
        let http_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = http.start(http_cancel).await {
                tracing::error!("HTTP server error: {}", e);
            }
        }))
    } else {
        None
    };

    let bootstrapper = ClusterBootstrapper::new(self_info, seeds, options.clone());
    tokio::select! {
        result = bootstrapper.join(&node, factory.as_ref(), &cancel) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal during bootstrap");
            cancel.cancel();
            return Ok(());
        }
    }
    tracing::info!("Joined cluster, {} members known", node.len().await);

    let cluster = Arc::new(Cluster::new(Arc::clone(&node), options, factory));
    cluster.start().await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Received shutdown signal");

    // Cleanup
    cluster.stop().await;
    cancel.cancel();
    for handle in [server_handle, recorder_handle, watcher_handle] {
        let _ = handle.await;
    }
    if let Some(handle) = http_handle {
        let _ = handle.await;
    }

    tracing::info!("WolfGossip shutdown complete");
    Ok(())
}

/// Log every state change of the local table
fn spawn_state_watcher(node: &Node, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    let mut events = node.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => tracing::warn!(
                        endpoint = %event.endpoint,
                        "Node state changed: {} -> {}",
                        event.previous,
                        event.current
                    ),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Missed {} state changes", missed);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

/// Query the HTTP API of a running node
async fn run_query(address: &str, path: &str) -> Result<()> {
    let url = format!("http://{}/{}", address, path);

    match reqwest::get(&url).await {
        Ok(response) => {
            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| Error::Network(e.to_string()))?;
            let pretty = serde_json::to_string_pretty(&body)
                .map_err(|e| Error::Internal(e.to_string()))?;
            println!("{}", pretty);
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to query {}: {}", url, e);
            Err(Error::Network(e.to_string()))
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf, endpoint: String) -> Result<()> {
    let config_content = format!(
        r#"# WolfGossip Configuration
# Generated configuration file

[node]
# Endpoint other nodes use to reach this one; also the node's identity
endpoint = "{endpoint}"
# bind_address = "0.0.0.0:7946"

[cluster]
seeds = []
# seeds = ["node-2.example.com:7946", "node-3.example.com:7946"]
gossip_interval_ms = 1000
gossip_non_live_nodes_probability = 0.1
ping_timeout_ms = 200
forward_timeout_ms = 500
bootstrap_backoff_initial_ms = 200
bootstrap_backoff_max_ms = 5000

[discovery]
mode = "static"
# mode = "launcher"
# launcher_address = "http://launcher:9086"
# framework_name = "gossip"

[api]
enabled = true
bind_address = "0.0.0.0:8946"

[logging]
level = "info"
format = "pretty"
"#
    );

    // Never hand out a template that would not load
    WolfGossipConfig::from_str(&config_content)?;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to list your seed nodes.");
    println!("Then start with: wolfgossip --config {} start", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfGossipConfig::from_file(Path::new(&config_path)) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Endpoint:        {}", config.node.endpoint);
            println!("  Bind Address:    {}", config.bind_address());
            println!("  Discovery:       {:?}", config.discovery.mode);
            println!("  Seeds:           {}", config.cluster.seeds.len());
            println!("  Gossip Interval: {} ms", config.cluster.gossip_interval_ms);
            println!("  Ping Timeout:    {} ms", config.cluster.ping_timeout_ms);
            println!("  Forward Timeout: {} ms", config.cluster.forward_timeout_ms);
            if config.api.enabled {
                println!("  HTTP API:        {}", config.api.bind_address);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
