//! quayctl - Command line client for a running pgquay API
//!
//! Usage:
//!   quayctl status                    - Ping the member
//!   quayctl cluster-state             - Show the cluster state
//!   quayctl set-cluster-state UP      - Move the cluster state
//!   quayctl member-state [--member]   - Show a member state
//!   quayctl set-member-state STANDBY  - Move a member state
//!   quayctl cluster-data              - Show the shared cluster configuration
//!   quayctl lock [--target]           - Show a lock record

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// pgquay Control Tool
#[derive(Parser)]
#[command(name = "quayctl")]
#[command(about = "Inspect and move pgquay cluster state", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/pgquay/config.toml")]
    config: PathBuf,

    /// API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show status of the local member
    Status,
    /// Show the cluster state
    ClusterState,
    /// Move the cluster to a new state
    SetClusterState {
        /// Target state, e.g. DOWN or UP
        state: String,
    },
    /// Show a member state and its annotations
    MemberState {
        /// Member name (defaults to the member serving the API)
        #[arg(short, long)]
        member: Option<String>,
    },
    /// Move a member to a new state
    SetMemberState {
        /// Target state, e.g. STANDBY or MASTER
        state: String,
        /// Member name (defaults to the member serving the API)
        #[arg(short, long)]
        member: Option<String>,
    },
    /// Show the shared cluster configuration
    ClusterData,
    /// Show a lock record
    Lock {
        /// cluster, member or coordination
        #[arg(short, long, default_value = "cluster")]
        target: String,
        /// Member for --target member
        #[arg(short, long)]
        member: Option<String>,
    },
}

// ============ API Response Types ============

#[derive(Debug, Deserialize)]
struct PingResponse {
    #[serde(default)]
    member: String,
    #[serde(default)]
    cluster: String,
    #[serde(default)]
    uptime_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct StateResponse {
    state: String,
}

#[derive(Debug, Deserialize)]
struct TransitionResponse {
    state: String,
    previous: String,
    applied: bool,
}

#[derive(Debug, Deserialize)]
struct LockResponse {
    #[serde(default)]
    owner: String,
    #[serde(default)]
    expires: Option<String>,
    #[serde(default)]
    held: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

// ============ Config ============

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    api: ApiConfig,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfig {
    #[serde(default = "default_api_bind")]
    bind_address: String,
}

fn default_api_bind() -> String {
    "0.0.0.0:8080".to_string()
}

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080";

/// Endpoint from the config file's API bind address
fn endpoint_from_config(path: &Path) -> String {
    let Ok(content) = std::fs::read_to_string(path) else {
        return DEFAULT_ENDPOINT.to_string();
    };
    let Ok(config) = toml::from_str::<Config>(&content) else {
        return DEFAULT_ENDPOINT.to_string();
    };

    // A wildcard bind is reachable on loopback
    let addr = config.api.bind_address;
    if addr.starts_with("0.0.0.0") {
        format!("http://127.0.0.1:{}", addr.split(':').nth(1).unwrap_or("8080"))
    } else {
        format!("http://{}", addr)
    }
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let endpoint = match &cli.endpoint {
        Some(e) => e.trim_end_matches('/').to_string(),
        None => endpoint_from_config(&cli.config),
    };

    let client = reqwest::Client::new();
    let result = match &cli.command {
        Commands::Status => show_status(&client, &endpoint).await,
        Commands::ClusterState => show_cluster_state(&client, &endpoint).await,
        Commands::SetClusterState { state } => set_cluster_state(&client, &endpoint, state).await,
        Commands::MemberState { member } => show_member_state(&client, &endpoint, member.as_deref()).await,
        Commands::SetMemberState { state, member } => {
            set_member_state(&client, &endpoint, state, member.as_deref()).await
        }
        Commands::ClusterData => show_cluster_data(&client, &endpoint).await,
        Commands::Lock { target, member } => show_lock(&client, &endpoint, target, member.as_deref()).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ============ Commands ============

type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Decode a success body, or turn an error body into an error
async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, Box<dyn std::error::Error>> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    match response.json::<ErrorResponse>().await {
        Ok(e) => Err(format!("{} ({}): {}", status, e.code, e.error).into()),
        Err(_) => Err(format!("API error: {}", status).into()),
    }
}

fn member_query(member: Option<&str>) -> Vec<(&'static str, String)> {
    member.map(|m| vec![("member", m.to_string())]).unwrap_or_default()
}

async fn show_status(client: &reqwest::Client, endpoint: &str) -> CmdResult {
    let url = format!("{}/api/v1/status/ping", endpoint);
    let ping: PingResponse = decode(client.get(&url).send().await?).await?;

    println!();
    println!("pgquay Member Status (quayctl v{})", env!("CARGO_PKG_VERSION"));
    println!("==================================");
    println!("Member:   {}", ping.member);
    println!("Cluster:  {}", ping.cluster);
    println!("Uptime:   {}s", ping.uptime_seconds);

    let url = format!("{}/api/v1/manage/clusterstate", endpoint);
    let cluster: StateResponse = decode(client.get(&url).send().await?).await?;
    println!("State:    {}", colored_state(&cluster.state));
    println!();

    Ok(())
}

async fn show_cluster_state(client: &reqwest::Client, endpoint: &str) -> CmdResult {
    let url = format!("{}/api/v1/manage/clusterstate", endpoint);
    let state: StateResponse = decode(client.get(&url).send().await?).await?;
    println!("{}", state.state);
    Ok(())
}

async fn set_cluster_state(client: &reqwest::Client, endpoint: &str, state: &str) -> CmdResult {
    let url = format!("{}/api/v1/manage/clusterstate/{}", endpoint, state);
    let t: TransitionResponse = decode(client.put(&url).send().await?).await?;
    if t.applied {
        println!("Cluster state: {} -> {}", t.previous, colored_state(&t.state));
    } else {
        println!("Cluster state already {}", colored_state(&t.state));
    }
    Ok(())
}

async fn show_member_state(client: &reqwest::Client, endpoint: &str, member: Option<&str>) -> CmdResult {
    let query = member_query(member);

    let url = format!("{}/api/v1/manage/memberstate", endpoint);
    let state: StateResponse = decode(client.get(&url).query(&query).send().await?).await?;

    let url = format!("{}/api/v1/manage/memberdata", endpoint);
    let data: BTreeMap<String, String> = decode(client.get(&url).query(&query).send().await?).await?;

    println!("State: {}", colored_state(&state.state));
    println!();
    println!("{:<30} VALUE", "ANNOTATION");
    println!("{}", "-".repeat(50));
    for (key, value) in &data {
        println!("{:<30} {}", key, value);
    }
    Ok(())
}

async fn set_member_state(
    client: &reqwest::Client,
    endpoint: &str,
    state: &str,
    member: Option<&str>,
) -> CmdResult {
    let url = format!("{}/api/v1/manage/memberstate/{}", endpoint, state);
    let request = client.put(&url).query(&member_query(member));
    let t: TransitionResponse = decode(request.send().await?).await?;
    let who = member.unwrap_or("local member");
    if t.applied {
        println!("Member {} state: {} -> {}", who, t.previous, colored_state(&t.state));
    } else {
        println!("Member {} state already {}", who, colored_state(&t.state));
    }
    Ok(())
}

async fn show_cluster_data(client: &reqwest::Client, endpoint: &str) -> CmdResult {
    let url = format!("{}/api/v1/manage/clusterdata", endpoint);
    let data: BTreeMap<String, String> = decode(client.get(&url).send().await?).await?;

    if data.is_empty() {
        println!("No cluster configuration");
        return Ok(());
    }
    println!("{:<30} VALUE", "KEY");
    println!("{}", "-".repeat(50));
    for (key, value) in &data {
        println!("{:<30} {}", key, value);
    }
    Ok(())
}

async fn show_lock(client: &reqwest::Client, endpoint: &str, target: &str, member: Option<&str>) -> CmdResult {
    let url = format!("{}/api/v1/manage/lock", endpoint);
    let mut query = member_query(member);
    query.push(("target", target.to_string()));
    let lock: LockResponse = decode(client.get(&url).query(&query).send().await?).await?;

    if lock.owner.is_empty() {
        println!("Lock on {} is free", target);
        return Ok(());
    }
    let status = if lock.held {
        "\x1b[33mheld\x1b[0m"
    } else {
        "stale"
    };
    println!("Owner:    {}", lock.owner);
    println!("Expires:  {}", lock.expires.as_deref().unwrap_or("never"));
    println!("Status:   {}", status);
    Ok(())
}

fn colored_state(state: &str) -> String {
    match state {
        "UP" | "MASTER" | "STANDBY" => format!("\x1b[32m{}\x1b[0m", state), // Green
        "DEGRADED" | "ELECTION" | "RESTART" | "SWITCHOVER" => format!("\x1b[33m{}\x1b[0m", state), // Yellow
        "DOWN" | "MASTERUNAVAILABLE" | "FAILOVER" | "STOP" => format!("\x1b[31m{}\x1b[0m", state), // Red
        _ => state.to_string(),
    }
}
