use async_trait::async_trait;

use crate::cluster::Cluster;
use crate::config::SandboxConfig;
use crate::error::{GenieError, Result};
use crate::job::{Job, JobExecution};
use crate::kill::KillOutcome;
use crate::script::{shell_quote, JobEnvironment, GENIE_VARIABLES};
use crate::strategy::{ExecutionStrategy, ScriptProcess, StrategyContext};
use crate::workdir::JobDirectory;

pub const NAME: &str = "docker";

/// Runs the job's command inside a sandboxed Docker container.
///
/// Containers run with:
/// - Network isolation (disabled by default)
/// - Dropped capabilities
/// - Read-only root filesystem, with only the job directory mounted writable
/// - Memory and CPU limits
///
/// `--init` forwards the script's signals to the command, and the script's
/// kill handler stops the container by name.
#[derive(Debug)]
pub struct DockerStrategy {
    process: ScriptProcess,
    env: Option<JobEnvironment>,
}

impl DockerStrategy {
    pub fn new(context: StrategyContext) -> Self {
        Self {
            process: ScriptProcess::new(context),
            env: None,
        }
    }
}

fn container_name(job: &Job) -> String {
    format!("genie-{}", job.id)
}

/// Stops the job's container; run by the kill handler.
pub fn docker_kill(job: &Job) -> String {
    ["docker".to_string(), "kill".to_string(), container_name(job)]
        .iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the `docker run` command line for a job.
pub fn docker_invocation(sandbox: &SandboxConfig, job: &Job, dir: &JobDirectory) -> String {
    let mut args = vec![
        "docker".to_string(),
        "run".to_string(),
        "--rm".to_string(),
        "--init".to_string(),
        format!("--name={}", container_name(job)),
    ];

    // Values come from the launcher script's exports
    for name in GENIE_VARIABLES {
        args.push(format!("--env={}", name));
    }

    // Network isolation
    if sandbox.network_disabled {
        args.push("--network=none".to_string());
    }

    // The job's own memory request wins over the node default
    match job.memory {
        Some(mb) => args.push(format!("--memory={}m", mb)),
        None => {
            if let Some(ref limit) = sandbox.memory_limit {
                args.push(format!("--memory={}", limit));
            }
        }
    }

    if let Some(ref limit) = sandbox.cpu_limit {
        args.push(format!("--cpus={}", limit));
    }

    // Security: drop all capabilities, no new privileges
    args.push("--cap-drop=ALL".to_string());
    args.push("--security-opt=no-new-privileges".to_string());
    args.push("--read-only".to_string());

    let root = dir.root().to_string_lossy();
    args.push(format!("--volume={}:{}", root, root));
    args.push(format!("--workdir={}", root));

    args.push(sandbox.image.clone());
    args.push("sh".to_string());
    args.push("-c".to_string());
    args.push(job.command_args.clone());

    args.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl ExecutionStrategy for DockerStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&mut self, job: &Job, cluster: &Cluster) -> Result<()> {
        let dir = self.process.bind(job, cluster);
        let invocation = docker_invocation(&self.process.context().sandbox, job, &dir);
        tracing::debug!(job_id = %job.id, image = %self.process.context().sandbox.image, "Prepared container invocation");
        let mut env = JobEnvironment::new(job, cluster, &dir, invocation);
        env.kill_hook = Some(docker_kill(job));
        self.env = Some(env);
        Ok(())
    }

    async fn launch(&mut self) -> Result<JobExecution> {
        let env = self
            .env
            .clone()
            .ok_or_else(|| GenieError::Internal("docker strategy launched before init".to_string()))?;
        self.process.launch(&env).await
    }

    async fn kill(&mut self, reason: &str) -> Result<KillOutcome> {
        self.process.kill(reason).await
    }

    fn is_running(&mut self) -> bool {
        self.process.is_running()
    }
}
