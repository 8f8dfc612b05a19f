//! Test harness for node-level integration tests.
//!
//! Builds a node over a temporary jobs directory with a fixed set of
//! clusters, and provides polling helpers for asynchronous job state.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use genie_lite::api::{router, ApiState};
use genie_lite::cluster::{Cluster, ClusterCriteria, ClusterStatus, InMemoryClusterRegistry};
use genie_lite::config::{KillConfig, NodeConfig, PeerConfig};
use genie_lite::error::{GenieError, Result};
use genie_lite::job::{CommandRef, Job, JobExecution, JobRecord, JobRequest, JobStatus};
use genie_lite::kill::KillOutcome;
use genie_lite::node::Node;
use genie_lite::service::ExecutionService;
use genie_lite::strategy::{ExecutionStrategy, StrategyCatalogue};

/// Clusters every test node starts with:
/// - `c-local` (type `local`, bound) tagged `local`, `prod`
/// - `c-batch` (type `batch`, never bound) tagged `batch`
/// - `c-down` (type `local`, out of service) tagged `down`
pub fn test_clusters() -> Vec<Cluster> {
    vec![
        Cluster::new("c-local", "local-cluster", "local").with_tags(["local", "prod"]),
        Cluster::new("c-batch", "batch-cluster", "batch").with_tags(["batch"]),
        Cluster::new("c-down", "down-cluster", "local")
            .with_tags(["down"])
            .with_status(ClusterStatus::OutOfService),
    ]
}

/// Node config with short intervals for faster tests
pub fn test_node_config(jobs_dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::new(
        "test-host",
        "127.0.0.1:0".parse().unwrap(),
        jobs_dir.to_path_buf(),
    )
    .with_strategy("local", "local");
    config.monitor_interval_ms = 50;
    config.kill = KillConfig {
        max_ticks: 30,
        tick_interval_ms: 100,
        child_process_threshold: None,
    };
    config
}

/// Strategy that never starts a process. Launch waits `delay` and then
/// returns an execution for a pid that doesn't exist.
pub struct FakeStrategy {
    delay: Duration,
    fail: bool,
    killed: Arc<AtomicBool>,
    job_id: Option<String>,
}

impl FakeStrategy {
    pub fn new(delay: Duration, fail: bool, killed: Arc<AtomicBool>) -> Self {
        Self {
            delay,
            fail,
            killed,
            job_id: None,
        }
    }
}

#[async_trait]
impl ExecutionStrategy for FakeStrategy {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn init(&mut self, job: &Job, _cluster: &Cluster) -> Result<()> {
        self.job_id = Some(job.id.clone());
        Ok(())
    }

    async fn launch(&mut self) -> Result<JobExecution> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(GenieError::JobLaunch("fake launch failure".to_string()));
        }
        let job_id = self.job_id.clone().unwrap_or_default();
        Ok(JobExecution::new(job_id, "test-host", i32::MAX as u32, "c-local", "/nonexistent"))
    }

    async fn kill(&mut self, _reason: &str) -> Result<KillOutcome> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(KillOutcome::Signalled)
    }

    fn is_running(&mut self) -> bool {
        true
    }
}

/// Handle to a node whose monitor is running
pub struct TestNode {
    pub node: Node,
    pub dir: TempDir,
    shutdown: CancellationToken,
}

impl TestNode {
    /// Node running real launcher scripts through the `local` strategy.
    pub async fn start() -> Self {
        Self::start_with(StrategyCatalogue::builtin(), |_| {}).await
    }

    /// Node whose `local` binding points at a [`FakeStrategy`].
    pub async fn start_fake(delay: Duration, fail: bool, killed: Arc<AtomicBool>) -> Self {
        Self::start_fake_with_peers(delay, fail, killed, &[]).await
    }

    /// Like [`TestNode::start_fake`], relaying unknown jobs to `peers`.
    pub async fn start_fake_with_peers(
        delay: Duration,
        fail: bool,
        killed: Arc<AtomicBool>,
        peers: &[SocketAddr],
    ) -> Self {
        let catalogue = StrategyCatalogue::builtin().with("fake", move |_| {
            Box::new(FakeStrategy::new(delay, fail, killed.clone()))
        });
        Self::start_with(catalogue, |config| {
            config
                .strategy_bindings
                .insert("local".to_string(), "fake".to_string());
            for peer in peers {
                config.peers.push(PeerConfig {
                    addr: peer.to_string(),
                });
            }
        })
        .await
    }

    pub async fn start_with<F>(catalogue: StrategyCatalogue, configure: F) -> Self
    where
        F: FnOnce(&mut NodeConfig),
    {
        let dir = TempDir::new().unwrap();
        let mut config = test_node_config(dir.path());
        configure(&mut config);

        let registry = Arc::new(InMemoryClusterRegistry::new(test_clusters()));
        let node = Node::with_catalogue(config, registry, &catalogue).unwrap();

        let shutdown = CancellationToken::new();
        let monitor = node.service.clone();
        let interval = node.config.monitor_interval();
        let token = shutdown.clone();
        tokio::spawn(async move {
            monitor.run_monitor(interval, token).await;
        });

        Self {
            node,
            dir,
            shutdown,
        }
    }

    pub fn service(&self) -> &ExecutionService {
        &self.node.service
    }

    pub fn api_state(&self) -> ApiState {
        self.node.api_state()
    }

    /// Serve this node's API on an ephemeral local port until the node is
    /// dropped.
    pub async fn serve(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(self.api_state());
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .unwrap();
        });
        addr
    }

    pub async fn status(&self, job_id: &str) -> JobStatus {
        self.service().get_job(job_id).await.unwrap().job.status
    }

    /// Wait for a job to reach `status` and return its record
    pub async fn wait_for_status(&self, job_id: &str, status: JobStatus, timeout: Duration) -> JobRecord {
        let service = self.service().clone();
        let id = job_id.to_string();
        assert_eventually(
            || {
                let service = service.clone();
                let id = id.clone();
                async move {
                    service
                        .get_job(&id)
                        .await
                        .map(|r| r.job.status == status)
                        .unwrap_or(false)
                }
            },
            timeout,
            &format!("job {} never reached {}", job_id, status),
        )
        .await;
        self.service().get_job(job_id).await.unwrap()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A valid request running `args` on a cluster matching `tags`
pub fn job_request(name: &str, args: &str, tags: &[&str]) -> JobRequest {
    JobRequest {
        name: name.to_string(),
        user: "tester".to_string(),
        command: Some(CommandRef {
            id: String::new(),
            name: "bash".to_string(),
        }),
        command_args: args.to_string(),
        cluster_criterias: vec![ClusterCriteria::new(tags.iter().copied())],
        ..JobRequest::default()
    }
}

/// Whether the tools the launcher script relies on are installed
pub fn script_tools_available() -> bool {
    std::process::Command::new("bash")
        .args(["-c", "command -v pgrep && command -v pkill && command -v wc"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(50)).await;
    assert!(result, "{}", message);
}
