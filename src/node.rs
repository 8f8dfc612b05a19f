use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState, PeerForwarder};
use crate::cluster::{
    ClusterLoad, ClusterLoadBalancer, ClusterRegistry, ClusterService, LeastLoadedBalancer,
    RandomBalancer,
};
use crate::config::{LoadBalancerKind, NodeConfig};
use crate::error::Result;
use crate::job::JobStore;
use crate::kill::KillController;
use crate::service::ExecutionService;
use crate::strategy::{ExecutionStrategyRegistry, StrategyCatalogue, StrategyContext};

/// Main node that wires all components together
pub struct Node {
    pub config: NodeConfig,
    pub service: ExecutionService,
    pub forwarder: Arc<PeerForwarder>,
}

impl Node {
    /// Build a node with the built-in strategies.
    ///
    /// # Errors
    ///
    /// Fails if a strategy binding names a strategy that doesn't exist.
    pub fn new(config: NodeConfig, clusters: Arc<dyn ClusterRegistry>) -> Result<Self> {
        Self::with_catalogue(config, clusters, &StrategyCatalogue::builtin())
    }

    pub fn with_catalogue(
        config: NodeConfig,
        clusters: Arc<dyn ClusterRegistry>,
        catalogue: &StrategyCatalogue,
    ) -> Result<Self> {
        let load = Arc::new(ClusterLoad::new());
        let balancer: Arc<dyn ClusterLoadBalancer> = match config.load_balancer {
            LoadBalancerKind::LeastLoaded => Arc::new(LeastLoadedBalancer::new(load.clone())),
            LoadBalancerKind::Random => Arc::new(RandomBalancer),
        };

        let script = config.kill.script_settings();
        let kill = Arc::new(KillController::new(
            script.platform,
            config.kill.max_ticks,
            config.kill.tick_interval(),
        ));
        tracing::info!(
            kill_flag = script.platform.kill_flag.as_flag(),
            threshold = script.platform.child_process_threshold,
            max_ticks = script.max_ticks,
            "Resolved kill platform"
        );

        let context = StrategyContext {
            host_name: config.host_name.clone(),
            jobs_dir: config.jobs_dir.clone(),
            script,
            sandbox: config.sandbox.clone(),
            kill: kill.clone(),
        };
        let registry = ExecutionStrategyRegistry::new(
            ClusterService::new(clusters),
            balancer,
            &config.strategy_bindings,
            catalogue,
            context,
        )?;

        let service = ExecutionService::new(
            Arc::new(registry),
            JobStore::with_capacity(config.max_jobs),
            load,
            kill,
            config.jobs_dir.clone(),
        );
        let forwarder = Arc::new(PeerForwarder::new(
            config.host_name.clone(),
            config.peers.clone(),
        ));

        Ok(Self {
            config,
            service,
            forwarder,
        })
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            service: self.service.clone(),
            forwarder: self.forwarder.clone(),
        }
    }

    /// Run the node until `shutdown` is cancelled.
    ///
    /// 1. Recovers jobs left behind by an earlier run
    /// 2. Spawns the completion monitor
    /// 3. Runs the API server (blocking)
    ///
    /// Launched jobs keep running after shutdown and are picked up again by
    /// the next run through their job records and done files.
    ///
    /// # Errors
    ///
    /// Returns an error if the jobs directory can't be created or scanned.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.jobs_dir).await?;
        let recovered = self.service.recover_jobs().await?;
        if recovered > 0 {
            tracing::info!(recovered, "Recovered jobs from jobs directory");
        }

        let monitor = self.service.clone();
        let interval = self.config.monitor_interval();
        let monitor_shutdown = shutdown.clone();
        let monitor_handle = tokio::spawn(async move {
            monitor.run_monitor(interval, monitor_shutdown).await;
        });

        tracing::info!(
            host = %self.config.host_name,
            addr = %self.config.listen_addr,
            jobs_dir = %self.config.jobs_dir.display(),
            peers = self.config.peers.len(),
            "Node started"
        );
        run_api(self.config.listen_addr, self.api_state(), shutdown.clone()).await;

        shutdown.cancel();
        if let Err(e) = monitor_handle.await {
            tracing::warn!(error = %e, "Job monitor task failed");
        }
        tracing::info!("Node stopped");
        Ok(())
    }
}
