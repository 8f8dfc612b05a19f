use async_trait::async_trait;

use crate::cluster::Cluster;
use crate::error::{GenieError, Result};
use crate::job::{Job, JobExecution};
use crate::kill::KillOutcome;
use crate::script::JobEnvironment;
use crate::strategy::{ExecutionStrategy, ScriptProcess, StrategyContext};

pub const NAME: &str = "local";

/// Runs the job's command line directly inside the launcher script.
#[derive(Debug)]
pub struct LocalStrategy {
    process: ScriptProcess,
    env: Option<JobEnvironment>,
}

impl LocalStrategy {
    pub fn new(context: StrategyContext) -> Self {
        Self {
            process: ScriptProcess::new(context),
            env: None,
        }
    }
}

#[async_trait]
impl ExecutionStrategy for LocalStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&mut self, job: &Job, cluster: &Cluster) -> Result<()> {
        let dir = self.process.bind(job, cluster);
        self.env = Some(JobEnvironment::new(job, cluster, &dir, job.command_args.clone()));
        Ok(())
    }

    async fn launch(&mut self) -> Result<JobExecution> {
        let env = self
            .env
            .clone()
            .ok_or_else(|| GenieError::Internal("local strategy launched before init".to_string()))?;
        self.process.launch(&env).await
    }

    async fn kill(&mut self, reason: &str) -> Result<KillOutcome> {
        self.process.kill(reason).await
    }

    fn is_running(&mut self) -> bool {
        self.process.is_running()
    }
}
