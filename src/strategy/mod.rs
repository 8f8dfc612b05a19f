//! Execution strategies and the registry binding them to cluster types.

pub mod docker;
pub mod local;
pub mod process;
pub mod registry;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::Cluster;
use crate::config::SandboxConfig;
use crate::error::Result;
use crate::job::{Job, JobExecution};
use crate::kill::{KillController, KillOutcome};
use crate::script::ScriptSettings;

pub use docker::DockerStrategy;
pub use local::LocalStrategy;
pub use process::ScriptProcess;
pub use registry::{ExecutionStrategyRegistry, StrategyCatalogue, StrategyFactory};

/// One way of running a job on a cluster.
///
/// A strategy instance serves a single job: `init` binds it, `launch` starts
/// the launcher script and `kill` asks it to stop.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn init(&mut self, job: &Job, cluster: &Cluster) -> Result<()>;

    async fn launch(&mut self) -> Result<JobExecution>;

    async fn kill(&mut self, reason: &str) -> Result<KillOutcome>;

    /// Whether the launcher script is still alive.
    fn is_running(&mut self) -> bool;
}

/// Node-wide inputs every strategy is built from.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub host_name: String,
    pub jobs_dir: PathBuf,
    pub script: ScriptSettings,
    pub sandbox: SandboxConfig,
    pub kill: Arc<KillController>,
}

/// The strategy chosen for a job and the cluster it will run on.
pub struct Dispatch {
    pub strategy: Box<dyn ExecutionStrategy>,
    pub cluster: Cluster,
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("strategy", &self.strategy.name())
            .field("cluster", &self.cluster.id)
            .finish()
    }
}
