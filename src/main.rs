use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use genie_lite::cluster::{Cluster, ClusterCriteria, InMemoryClusterRegistry};
use genie_lite::config::{
    parse_strategy_binding, KillConfig, LoadBalancerKind, NodeConfig, PeerConfig, SandboxConfig,
};
use genie_lite::job::{CommandRef, JobRecord, JobRequest};
use genie_lite::node::Node;
use genie_lite::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "genie-lite")]
#[command(version)]
#[command(about = "A job orchestration service with cluster selection and process-group kill")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a genie-lite server node
    Server(ServerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Cluster commands
    Cluster {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: ClusterCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Host name recorded on job executions
    #[arg(long, default_value = "localhost")]
    host_name: String,

    /// Port to serve the REST API on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Directory job working directories are created in
    #[arg(long, default_value = "/tmp/genie/jobs")]
    jobs_dir: PathBuf,

    /// JSON file with the clusters jobs can run on
    #[arg(long)]
    clusters: PathBuf,

    /// Cluster type to strategy binding, e.g. "yarn=local" (repeatable)
    #[arg(long = "strategy", value_name = "TYPE=STRATEGY")]
    strategies: Vec<String>,

    /// Cluster load balancer
    #[arg(long, default_value = "least-loaded")]
    load_balancer: String,

    /// Peer addresses (comma-separated, format: "host:port")
    /// Example: "10.0.0.2:8080,10.0.0.3:8080"
    #[arg(long, default_value = "")]
    peers: String,

    /// Docker image for the docker strategy
    #[arg(long, default_value = "alpine:latest")]
    image: String,

    /// Ticks to wait for a killed job's processes before SIGKILL
    #[arg(long, default_value = "30")]
    kill_timeout_ticks: u32,

    /// Process count at which a killed job counts as gone (defaults per platform)
    #[arg(long)]
    kill_threshold: Option<u32>,

    /// How often running jobs are checked for completion
    #[arg(long, default_value = "500")]
    monitor_interval_ms: u64,

    /// Maximum number of jobs kept in memory
    #[arg(long, default_value = "10000")]
    max_jobs: usize,
}

// =============================================================================
// Client Arguments (shared by job and cluster commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a new job
    Submit {
        /// Job name
        #[arg(long)]
        name: String,

        /// Submitting user
        #[arg(long, default_value = "genie")]
        user: String,

        /// Command name
        #[arg(long)]
        command: String,

        /// Comma-separated cluster tags; repeat for fallback alternatives
        #[arg(long = "criteria", required = true)]
        criterias: Vec<String>,

        /// Memory for the job in MB
        #[arg(long)]
        memory: Option<u32>,

        /// Job tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Command line to run
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
    /// Get a job and its execution
    Status {
        job_id: String,
    },
    /// List jobs
    List {
        /// Only jobs in this status (repeatable)
        #[arg(long)]
        status: Vec<String>,

        /// Only jobs of this user
        #[arg(long)]
        user: Option<String>,

        /// Job name pattern, `%` matches anything
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "100")]
        limit: usize,
    },
    /// Kill a job
    Kill {
        job_id: String,

        /// Reason recorded with the kill
        #[arg(long)]
        reason: Option<String>,
    },
}

// =============================================================================
// Cluster Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum ClusterCommands {
    /// List registered clusters
    List,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_peers(peers_str: &str) -> Vec<PeerConfig> {
    peers_str
        .split(',')
        .map(str::trim)
        .filter(|peer| !peer.is_empty())
        .filter_map(|peer| {
            if peer.rsplit_once(':').is_some() {
                Some(PeerConfig {
                    addr: peer.to_string(),
                })
            } else {
                tracing::warn!(peer, "Invalid peer format, expected host:port");
                None
            }
        })
        .collect()
}

fn parse_criteria(value: &str) -> ClusterCriteria {
    ClusterCriteria::new(value.split(',').map(str::trim).filter(|t| !t.is_empty()))
}

fn api_url(client: &ClientArgs, path: &str) -> String {
    format!("{}/api/v3{}", client.addr.trim_end_matches('/'), path)
}

/// Turn an error response into a message and exit.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    eprintln!("Error ({}): {}", status.as_u16(), message);
    std::process::exit(1);
}

fn print_job(record: &JobRecord) {
    let job = &record.job;
    println!("Job ID:          {}", job.id);
    println!("Name:            {}", job.name);
    println!("User:            {}", job.user);
    println!("Status:          {}", job.status);
    if let Some(msg) = &job.status_msg {
        println!("Message:         {}", msg);
    }
    if let Some(cluster) = &job.execution_cluster {
        println!("Cluster:         {} ({})", cluster.name, cluster.id);
    }
    if let Some(host) = &job.client_host {
        println!("Client Host:     {}", host);
    }
    if let Some(execution) = &record.execution {
        println!("Host:            {}", execution.host_name);
        println!("Process ID:      {}", execution.process_id);
        println!("Working Dir:     {}", execution.working_dir.display());
        if let Some(code) = execution.exit_code {
            println!("Exit Code:       {}", code);
        }
        if let Some(reason) = &execution.kill_reason {
            println!("Kill Reason:     {}", reason);
        }
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let load_balancer: LoadBalancerKind = args.load_balancer.parse()?;
    let strategy_bindings: HashMap<String, String> = args
        .strategies
        .iter()
        .map(|binding| parse_strategy_binding(binding))
        .collect::<Result<_, _>>()?;

    let config = NodeConfig {
        host_name: args.host_name,
        listen_addr,
        jobs_dir: args.jobs_dir,
        peers: parse_peers(&args.peers),
        strategy_bindings,
        load_balancer,
        monitor_interval_ms: args.monitor_interval_ms,
        max_jobs: args.max_jobs,
        sandbox: SandboxConfig {
            image: args.image,
            ..SandboxConfig::default()
        },
        kill: KillConfig {
            max_ticks: args.kill_timeout_ticks,
            child_process_threshold: args.kill_threshold,
            ..KillConfig::default()
        },
    };

    let clusters = InMemoryClusterRegistry::from_file(&args.clusters).await?;

    tracing::info!(
        host_name = %config.host_name,
        listen_addr = %config.listen_addr,
        bindings = ?config.strategy_bindings,
        peers = ?config.peers.iter().map(|p| p.addr.as_str()).collect::<Vec<_>>(),
        "Starting genie-lite node"
    );

    let shutdown = install_shutdown_handler()?;
    let node = Node::new(config, Arc::new(clusters))?;
    node.run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

#[allow(clippy::too_many_arguments)]
async fn handle_job_submit(
    http: &reqwest::Client,
    client: &ClientArgs,
    name: String,
    user: String,
    command: String,
    criterias: Vec<String>,
    memory: Option<u32>,
    tags: Vec<String>,
    args: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = JobRequest {
        name,
        user,
        command: Some(CommandRef {
            id: String::new(),
            name: command,
        }),
        command_args: args.join(" "),
        memory,
        cluster_criterias: criterias.iter().map(|c| parse_criteria(c)).collect(),
        tags: tags.into_iter().collect(),
        ..JobRequest::default()
    };

    let response = check(http.post(api_url(client, "/jobs")).json(&request).send().await?).await?;
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    let job: serde_json::Value = response.json().await?;

    match client.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&job)?),
        OutputFormat::Table => {
            println!("Job submitted successfully!");
            println!("Job ID:   {}", job["id"].as_str().unwrap_or("-"));
            if let Some(location) = location {
                println!("Location: {}", location);
            }
        }
    }
    Ok(())
}

async fn handle_job_status(
    http: &reqwest::Client,
    client: &ClientArgs,
    job_id: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = check(http.get(api_url(client, &format!("/jobs/{}", job_id))).send().await?).await?;
    let record: JobRecord = response.json().await?;

    match client.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
        OutputFormat::Table => print_job(&record),
    }
    Ok(())
}

async fn handle_job_list(
    http: &reqwest::Client,
    client: &ClientArgs,
    status: Vec<String>,
    user: Option<String>,
    name: Option<String>,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut params: Vec<(&str, String)> = status.into_iter().map(|s| ("status", s)).collect();
    if let Some(user) = user {
        params.push(("userName", user));
    }
    if let Some(name) = name {
        params.push(("name", name));
    }
    params.push(("limit", limit.to_string()));

    let response = check(http.get(api_url(client, "/jobs")).query(&params).send().await?).await?;
    let jobs: Vec<JobRecord> = response.json().await?;

    match client.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!("{:<38} {:<10} {:<12} {:<16} NAME", "JOB ID", "STATUS", "USER", "CLUSTER");
                println!("{}", "-".repeat(90));
                for record in &jobs {
                    let job = &record.job;
                    let cluster = job
                        .execution_cluster
                        .as_ref()
                        .map(|c| c.name.as_str())
                        .unwrap_or("-");
                    println!(
                        "{:<38} {:<10} {:<12} {:<16} {}",
                        job.id,
                        job.status.to_string(),
                        job.user,
                        cluster,
                        job.name
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_job_kill(
    http: &reqwest::Client,
    client: &ClientArgs,
    job_id: String,
    reason: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut request = http.delete(api_url(client, &format!("/jobs/{}", job_id)));
    if let Some(reason) = reason {
        request = request.query(&[("reason", reason)]);
    }
    let record: JobRecord = check(request.send().await?).await?.json().await?;

    match client.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
        OutputFormat::Table => {
            println!("Kill requested for job {}", record.job.id);
            println!("Status: {}", record.job.status);
        }
    }
    Ok(())
}

async fn handle_cluster_list(
    http: &reqwest::Client,
    client: &ClientArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let clusters: Vec<Cluster> = check(http.get(api_url(client, "/clusters")).send().await?)
        .await?
        .json()
        .await?;

    match client.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&clusters)?),
        OutputFormat::Table => {
            if clusters.is_empty() {
                println!("No clusters registered.");
            } else {
                println!("{:<20} {:<20} {:<12} {:<16} TAGS", "ID", "NAME", "TYPE", "STATUS");
                println!("{}", "-".repeat(90));
                for cluster in &clusters {
                    let tags: Vec<&str> = cluster.tags.iter().map(String::as_str).collect();
                    println!(
                        "{:<20} {:<20} {:<12} {:<16} {}",
                        cluster.id,
                        cluster.name,
                        cluster.cluster_type,
                        cluster.status.to_string(),
                        tags.join(",")
                    );
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await,
        Commands::Job { client, command } => {
            let http = reqwest::Client::new();
            match command {
                JobCommands::Submit {
                    name,
                    user,
                    command,
                    criterias,
                    memory,
                    tags,
                    args,
                } => {
                    handle_job_submit(
                        &http, &client, name, user, command, criterias, memory, tags, args,
                    )
                    .await
                }
                JobCommands::Status { job_id } => handle_job_status(&http, &client, job_id).await,
                JobCommands::List {
                    status,
                    user,
                    name,
                    limit,
                } => handle_job_list(&http, &client, status, user, name, limit).await,
                JobCommands::Kill { job_id, reason } => {
                    handle_job_kill(&http, &client, job_id, reason).await
                }
            }
        }
        Commands::Cluster { client, command } => {
            let http = reqwest::Client::new();
            match command {
                ClusterCommands::List => handle_cluster_list(&http, &client).await,
            }
        }
    }
}
