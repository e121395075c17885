use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use hashfleet::auth::StaticAuthenticator;
use hashfleet::config::{
    HooksConfig, QueueConfig, ResourceConfig, ResourceEntry, TlsConfig, ToolsConfig, UsersConfig,
};
use hashfleet::node::{QueueNode, ResourceNode};
use hashfleet::shutdown::install_shutdown_handler;
use hashfleet::tls::TlsIdentity;

#[derive(Parser, Debug)]
#[command(name = "hashfleet")]
#[command(version)]
#[command(about = "A distributed queue for pausable cracking and scanning jobs")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the queue: scheduler, keeper and JSON API
    Queue(QueueArgs),

    /// Start a resource agent that runs tools for the queue
    Resource(ResourceArgs),
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct TlsArgs {
    /// Enable mTLS between the queue and its resources
    #[arg(long)]
    tls: bool,

    /// Path to CA certificate (PEM format)
    #[arg(long, requires = "tls")]
    ca_cert: Option<PathBuf>,

    /// Path to this node's certificate (PEM format)
    #[arg(long, requires = "tls")]
    cert: Option<PathBuf>,

    /// Path to this node's private key (PEM format)
    #[arg(long, requires = "tls")]
    key: Option<PathBuf>,

    /// Allow running without TLS even when --tls is specified but certs are missing.
    /// Useful for development. NOT recommended for production.
    #[arg(long)]
    allow_insecure: bool,
}

impl From<TlsArgs> for TlsConfig {
    fn from(args: TlsArgs) -> Self {
        TlsConfig {
            enabled: args.tls,
            ca_cert_path: args.ca_cert,
            cert_path: args.cert,
            key_path: args.key,
            allow_insecure: args.allow_insecure,
        }
    }
}

// =============================================================================
// Queue Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct QueueArgs {
    /// Port for the JSON API
    #[arg(long, default_value = "9443")]
    port: u16,

    /// TOML file with the API accounts
    #[arg(long)]
    users: PathBuf,

    /// Resources to register at startup (format: "name,host:port,token").
    /// May be repeated.
    #[arg(long = "resource")]
    resources: Vec<String>,

    /// Seconds between keeper passes
    #[arg(long, default_value = "5")]
    keeper_interval: u64,

    /// Seconds a single resource RPC may take
    #[arg(long, default_value = "60")]
    rpc_timeout: u64,

    /// TOML file naming the targets notified of job and queue events
    #[arg(long)]
    hooks: Option<PathBuf>,

    #[command(flatten)]
    tls: TlsArgs,
}

// =============================================================================
// Resource Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ResourceArgs {
    /// Port to listen on for gRPC
    #[arg(long, default_value = "9444")]
    port: u16,

    /// Name this agent reports to the queue
    #[arg(long)]
    name: String,

    /// Shared secret the queue must present
    #[arg(long)]
    token: String,

    /// TOML file configuring the tools this agent offers
    #[arg(long)]
    tools: PathBuf,

    #[command(flatten)]
    tls: TlsArgs,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_resources(entries: &[String]) -> Vec<ResourceEntry> {
    entries
        .iter()
        .filter_map(|entry| {
            let parts: Vec<&str> = entry.trim().splitn(3, ',').collect();
            match parts.as_slice() {
                [name, address, token] if !name.is_empty() && address.contains(':') => {
                    Some(ResourceEntry {
                        name: name.to_string(),
                        address: address.to_string(),
                        auth_token: token.to_string(),
                    })
                }
                _ => {
                    tracing::warn!(resource = %entry, "Invalid resource format, expected name,host:port,token");
                    None
                }
            }
        })
        .collect()
}

// =============================================================================
// Entry Points
// =============================================================================

async fn run_queue(args: QueueArgs) -> Result<(), Box<dyn std::error::Error>> {
    let tls_config = TlsConfig::from(args.tls);
    let tls_identity = TlsIdentity::resolve(&tls_config).await?;
    let users = UsersConfig::load(&args.users)?;
    if users.users.is_empty() {
        tracing::warn!(path = %args.users.display(), "No API users configured");
    }

    let hooks = match &args.hooks {
        Some(path) => HooksConfig::load(path)?,
        None => HooksConfig::default(),
    };

    let config = QueueConfig {
        api_addr: format!("0.0.0.0:{}", args.port).parse::<SocketAddr>()?,
        keeper_interval: Duration::from_secs(args.keeper_interval.max(1)),
        rpc_timeout: Duration::from_secs(args.rpc_timeout),
        resources: parse_resources(&args.resources),
        hooks,
        tls: tls_config,
        ..QueueConfig::default()
    };

    tracing::info!(
        api_addr = %config.api_addr,
        tls_enabled = tls_identity.is_some(),
        resources = ?config.resources.iter().map(|r| format!("{}@{}", r.name, r.address)).collect::<Vec<_>>(),
        "Starting hashfleet queue"
    );

    let shutdown = install_shutdown_handler()?;
    let node = QueueNode::new(
        config,
        Arc::new(StaticAuthenticator::new(users)),
        tls_identity,
    );
    node.run(shutdown).await?;
    Ok(())
}

async fn run_resource(args: ResourceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let tls_config = TlsConfig::from(args.tls);
    let tls_identity = TlsIdentity::resolve(&tls_config).await?;

    let config = ResourceConfig {
        listen_addr: format!("0.0.0.0:{}", args.port).parse::<SocketAddr>()?,
        auth_token: args.token,
        tools: ToolsConfig::load(&args.tools)?,
        tls: tls_config,
    };

    tracing::info!(
        name = %args.name,
        listen_addr = %config.listen_addr,
        tls_enabled = tls_identity.is_some(),
        hardware = ?config.tools.hardware,
        "Starting hashfleet resource"
    );

    let shutdown = install_shutdown_handler()?;
    let node = ResourceNode::new(args.name, config, tls_identity)?;
    node.run(shutdown).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Queue(queue_args) => run_queue(queue_args).await?,
        Commands::Resource(resource_args) => run_resource(resource_args).await?,
    }

    Ok(())
}
