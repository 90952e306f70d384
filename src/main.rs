//! pgquay - Lock-guarded cluster state for replicated PostgreSQL
//!
//! Command line access to the cluster and member states and locks kept in
//! the shared object store, plus the HTTP API server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pgquay::api::HttpServer;
use pgquay::backoff::Backoff;
use pgquay::config::QuayConfig;
use pgquay::coordinator::{ClusterStore, LockTarget};
use pgquay::error::Result;
use pgquay::identity::Identity;
use pgquay::lock::LockInfo;
use pgquay::state::{ClusterState, Lifecycle, MemberState, Transition};

/// pgquay - Lock-guarded cluster state for replicated PostgreSQL
#[derive(Parser)]
#[command(name = "pgquay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "pgquay.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "pgquay.toml")]
        output: PathBuf,

        /// Namespace of this member
        #[arg(long)]
        namespace: Option<String>,

        /// Instance name of this member, e.g. pg-0
        #[arg(long)]
        name: Option<String>,
    },

    /// Validate configuration file
    Validate,

    /// Show member information
    Info,

    /// Create the cluster, coordination and own member objects
    Bootstrap,

    /// Read or move the cluster state
    ClusterState {
        #[command(subcommand)]
        action: Option<ClusterAction>,
    },

    /// Read or move a member state
    MemberState {
        /// Member to act on (defaults to this member)
        #[arg(short, long)]
        member: Option<String>,

        #[command(subcommand)]
        action: Option<MemberAction>,
    },

    /// Show the shared cluster configuration
    ClusterData,

    /// Inspect, take or release a lock
    Lock {
        /// Object whose lock to use
        #[arg(short, long, value_enum, default_value_t = TargetArg::Cluster)]
        target: TargetArg,

        /// Member for --target member (defaults to this member)
        #[arg(short, long)]
        member: Option<String>,

        #[command(subcommand)]
        action: Option<LockAction>,
    },

    /// Run the HTTP API
    Serve,
}

#[derive(Subcommand)]
enum ClusterAction {
    /// Show the current state
    Get,

    /// Move to a new state
    Set {
        /// Target state, case-insensitive
        #[arg(value_parser = parse_state::<ClusterState>)]
        state: ClusterState,

        /// Retry lock conflicts this many times
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },
}

#[derive(Subcommand)]
enum MemberAction {
    /// Show the current state
    Get,

    /// Move to a new state
    Set {
        /// Target state, case-insensitive
        #[arg(value_parser = parse_state::<MemberState>)]
        state: MemberState,

        /// Retry lock conflicts this many times
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },
}

#[derive(Subcommand)]
enum LockAction {
    /// Show the lock record
    Status,

    /// Take the lock, or extend it when already held
    Acquire {
        /// Retry conflicts this many times
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },

    /// Release the lock
    Release,
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetArg {
    Cluster,
    Member,
    Coordination,
}

fn parse_state<S: Lifecycle>(raw: &str) -> std::result::Result<S, String> {
    let state = S::parse(raw);
    if raw.is_empty() || state == S::UNKNOWN {
        let names: Vec<&str> = S::ALL
            .iter()
            .filter(|s| **s != S::UNKNOWN)
            .map(|s| s.name())
            .collect();
        return Err(format!("expected one of {}", names.join(", ")));
    }
    Ok(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output, namespace, name } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_init(output, namespace, name)
        }
        Commands::Validate => run_validate(cli.config),
        command => {
            let config = QuayConfig::from_file(&cli.config)?;
            let level = cli.log_level.unwrap_or_else(|| config.logging.level.clone());
            init_logging(&level, &config.logging.format);
            run_command(command, config).await
        }
    }
}

/// Initialize logging; RUST_LOG takes precedence over `level`
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Open the configured store and view it as this member
fn connect(config: &QuayConfig) -> Result<ClusterStore> {
    let identity = Identity::resolve(&config.node)?;
    let store = pgquay::store::open(&config.store)?;
    ClusterStore::new(store, identity, config)
}

async fn run_command(command: Commands, config: QuayConfig) -> Result<()> {
    match command {
        Commands::Info => run_info(&config),
        Commands::Bootstrap => run_bootstrap(&config).await,
        Commands::ClusterState { action } => {
            let cluster = connect(&config)?;
            match action.unwrap_or(ClusterAction::Get) {
                ClusterAction::Get => {
                    println!("{}", cluster.cluster_state().await?);
                    Ok(())
                }
                ClusterAction::Set { state, retries } => {
                    let t = Backoff::new(retries)
                        .retry("set cluster state", || cluster.set_cluster_state(state))
                        .await?;
                    print_transition("Cluster", t);
                    Ok(())
                }
            }
        }
        Commands::MemberState { member, action } => {
            let cluster = connect(&config)?;
            let name = member.unwrap_or_else(|| cluster.identity().name().to_string());
            match action.unwrap_or(MemberAction::Get) {
                MemberAction::Get => {
                    println!("{}", cluster.member_state(&name).await?);
                    Ok(())
                }
                MemberAction::Set { state, retries } => {
                    let t = Backoff::new(retries)
                        .retry("set member state", || cluster.set_member_state(&name, state))
                        .await?;
                    print_transition(&format!("Member {}", name), t);
                    Ok(())
                }
            }
        }
        Commands::ClusterData => {
            let cluster = connect(&config)?;
            for (key, value) in cluster.cluster_config().await? {
                println!("{}={}", key, value);
            }
            Ok(())
        }
        Commands::Lock { target, member, action } => {
            let cluster = connect(&config)?;
            let target = match target {
                TargetArg::Cluster => LockTarget::Cluster,
                TargetArg::Coordination => LockTarget::Coordination,
                TargetArg::Member => LockTarget::Member(member),
            };
            run_lock(&cluster, &target, action.unwrap_or(LockAction::Status)).await
        }
        Commands::Serve => run_serve(&config).await,
        Commands::Init { .. } | Commands::Validate => Ok(()),
    }
}

fn print_transition<S: Lifecycle>(what: &str, t: Transition<S>) {
    match t {
        Transition::Applied { from, to } => println!("{} state: {} -> {}", what, from, to),
        Transition::Unchanged(state) => println!("{} state already {}", what, state),
    }
}

fn print_lock(info: &LockInfo) {
    if info.owner.is_empty() {
        println!("Lock is free");
        return;
    }
    let expires = info
        .expires
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    let status = if info.held { "held" } else { "stale" };
    println!("Owner:    {}", info.owner);
    println!("Expires:  {}", expires);
    println!("Status:   {}", status);
}

async fn run_lock(cluster: &ClusterStore, target: &LockTarget, action: LockAction) -> Result<()> {
    match action {
        LockAction::Status => {
            print_lock(&cluster.lock_info(target).await?);
        }
        LockAction::Acquire { retries } => {
            Backoff::new(retries)
                .retry("acquire lock", || cluster.acquire_lock(target))
                .await?;
            println!("Lock acquired by {}", cluster.holder_id());
            print_lock(&cluster.lock_info(target).await?);
        }
        LockAction::Release => {
            cluster.release_lock(target).await?;
            println!("Lock released by {}", cluster.holder_id());
        }
    }
    Ok(())
}

async fn run_bootstrap(config: &QuayConfig) -> Result<()> {
    let cluster = connect(config)?;
    let created = cluster.bootstrap().await?;
    if created.is_empty() {
        println!("All objects already exist");
    }
    for key in created {
        println!("Created {}", key);
    }
    Ok(())
}

async fn run_serve(config: &QuayConfig) -> Result<()> {
    tracing::info!("Starting pgquay API...");

    let cluster = connect(config)?;
    tracing::info!("Member {} of cluster {}", cluster.identity(), cluster.cluster_name());
    cluster.bootstrap().await?;

    let http_server = HttpServer::new(config.api.clone(), Arc::new(cluster));

    tokio::select! {
        result = http_server.start() => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    Ok(())
}

fn run_init(output: PathBuf, namespace: Option<String>, name: Option<String>) -> Result<()> {
    let node = match (namespace, name) {
        (Some(ns), Some(name)) => format!("namespace = \"{ns}\"\nname = \"{name}\""),
        (Some(ns), None) => format!("namespace = \"{ns}\"\n# name = \"pg-0\""),
        (None, Some(name)) => format!("# namespace = \"default\"\nname = \"{name}\""),
        (None, None) => "# namespace = \"default\"\n# name = \"pg-0\"".to_string(),
    };

    let config_content = format!(r#"# pgquay Configuration
# Generated configuration file

[node]
# Unset values come from $POD_NAMESPACE and $HOSTNAME
{node}

[cluster]
# name = "pg"
coordination_object = "configdata"

[store]
backend = "sqlite"
path = "/var/lib/pgquay/store.db"
timeout_ms = 5000

[lock]
name = "pgquaylock"
lease_ms = 10000

[keys]
cluster_state = "ClusterState"
member_state = "MemberState"
protected_cluster = ["ClusterState"]
protected_member = ["MemberState"]
protected_coordination = []

[api]
enabled = true
bind_address = "0.0.0.0:8080"

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nPoint store.path at storage shared by all members.");
    println!("Then create the objects with: pgquay --config {} bootstrap", output.display());

    Ok(())
}

fn run_validate(config_path: PathBuf) -> Result<()> {
    match QuayConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Store: {:?} {}", config.store.backend, config.store.path.as_deref().map(|p| p.display().to_string()).unwrap_or_default());
            println!("  Lock: {} ({} ms lease)", config.lock.name, config.lock.lease_ms);
            match Identity::resolve(&config.node) {
                Ok(identity) => println!("  Member: {}", identity),
                Err(e) => println!("  Member: unresolved ({})", e),
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

fn run_info(config: &QuayConfig) -> Result<()> {
    let identity = Identity::resolve(&config.node)?;
    let cluster_name = match &config.cluster.name {
        Some(name) => name.clone(),
        None => identity.group_name()?.to_string(),
    };
    let spec = config.lock.spec();

    println!("pgquay Member Information");
    println!("=========================");
    println!();
    println!("Member:           {}", identity);
    println!("Holder ID:        {}", identity.holder_id());
    println!("Cluster Object:   {}", cluster_name);
    println!("Coordination:     {}", config.cluster.coordination_object);
    println!();
    println!("Store Configuration:");
    println!("  Backend:        {:?}", config.store.backend);
    if let Some(path) = &config.store.path {
        println!("  Path:           {}", path.display());
    }
    println!("  Timeout:        {} ms", config.store.timeout_ms);
    println!();
    println!("Lock Configuration:");
    println!("  Owner Key:      {}", spec.owner_key());
    println!("  Expiry Key:     {}", spec.expiry_key());
    println!("  Lease:          {} ms", config.lock.lease_ms);
    println!();
    println!("Protected Annotations:");
    println!("  Cluster:        {:?}", config.keys.protected_cluster);
    println!("  Member:         {:?}", config.keys.protected_member);
    println!("  Coordination:   {:?}", config.keys.protected_coordination);

    Ok(())
}
