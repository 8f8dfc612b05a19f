use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::cluster::Cluster;
use crate::error::{GenieError, Result};
use crate::job::{Job, JobExecution};
use crate::kill::{process_alive, KillOutcome};
use crate::script::{synthesize, JobEnvironment};
use crate::strategy::StrategyContext;
use crate::workdir::JobDirectory;

/// How long a launcher script may take to install its signal handlers.
const READY_TIMEOUT: Duration = Duration::from_secs(10);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
struct Bound {
    job_id: String,
    command_id: String,
    cluster_id: String,
    dir: JobDirectory,
}

/// Launcher script lifecycle shared by the strategies: lay out the job
/// directory, write the script, start it as a process group leader and
/// signal it on kill.
#[derive(Debug)]
pub struct ScriptProcess {
    context: StrategyContext,
    bound: Option<Bound>,
    child: Option<Child>,
    pid: Option<u32>,
}

impl ScriptProcess {
    pub fn new(context: StrategyContext) -> Self {
        Self {
            context,
            bound: None,
            child: None,
            pid: None,
        }
    }

    pub fn context(&self) -> &StrategyContext {
        &self.context
    }

    /// Bind to a job and return its working directory.
    pub fn bind(&mut self, job: &Job, cluster: &Cluster) -> JobDirectory {
        let dir = JobDirectory::new(&self.context.jobs_dir, &job.id);
        self.bound = Some(Bound {
            job_id: job.id.clone(),
            command_id: job.command.id.clone(),
            cluster_id: cluster.id.clone(),
            dir: dir.clone(),
        });
        dir
    }

    fn bound(&self) -> Result<&Bound> {
        self.bound
            .as_ref()
            .ok_or_else(|| GenieError::Internal("strategy used before init".to_string()))
    }

    pub async fn launch(&mut self, env: &JobEnvironment) -> Result<JobExecution> {
        let bound = self.bound()?.clone();
        let dir = &bound.dir;

        dir.create(&bound.cluster_id, &bound.command_id)
            .await
            .map_err(|e| GenieError::JobLaunch(format!("creating job directory: {}", e)))?;
        let script = synthesize(env, &self.context.script);
        let script_path = dir
            .write_launcher_script(&script)
            .await
            .map_err(|e| GenieError::JobLaunch(format!("writing launcher script: {}", e)))?;

        let log = tokio::fs::File::create(dir.script_log())
            .await
            .map_err(|e| GenieError::JobLaunch(format!("opening script log: {}", e)))?
            .into_std()
            .await;
        let log_err = log.try_clone()?;

        let mut child = Command::new("bash")
            .arg(&script_path)
            .current_dir(dir.root())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .process_group(0)
            .spawn()
            .map_err(|e| GenieError::JobLaunch(format!("starting launcher script: {}", e)))?;
        let pid = child
            .id()
            .ok_or_else(|| GenieError::JobLaunch("launcher script exited immediately".to_string()))?;
        wait_until_ready(&mut child, dir, pid, READY_TIMEOUT).await?;

        tracing::info!(
            job_id = %bound.job_id,
            pid,
            dir = %dir.root().display(),
            "Launched job"
        );

        self.child = Some(child);
        self.pid = Some(pid);
        Ok(JobExecution::new(
            bound.job_id,
            self.context.host_name.clone(),
            pid,
            bound.cluster_id,
            dir.root(),
        ))
    }

    pub async fn kill(&mut self, reason: &str) -> Result<KillOutcome> {
        let bound = self.bound()?;
        let pid = self
            .pid
            .ok_or_else(|| GenieError::Kill(format!("job {} was never launched", bound.job_id)))?;
        self.context.kill.kill(&bound.dir, pid, reason).await
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => self.pid.is_some_and(process_alive),
        }
    }
}

/// Wait for the script to signal that its traps are in place. A script that
/// exits first is left for the monitor to classify from its done file.
async fn wait_until_ready(
    child: &mut Child,
    dir: &JobDirectory,
    pid: u32,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if dir.has_ready_file().await {
            return Ok(());
        }
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(pid, status = %status, "Launcher script exited before it was ready");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => {
                return Err(GenieError::JobLaunch(format!(
                    "checking launcher script: {}",
                    e
                )))
            }
        }
        if Instant::now() >= deadline {
            if let Err(e) = signal::killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                tracing::warn!(pid, error = %e, "Failed to stop launcher script");
            }
            return Err(GenieError::JobLaunch(format!(
                "launcher script not ready after {:?}",
                timeout
            )));
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spawn(dir: &JobDirectory, script: &str) -> Child {
        Command::new("bash")
            .args(["-c", script])
            .current_dir(dir.root())
            .process_group(0)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn ready_once_the_script_says_so() {
        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "job-1");
        dir.create("c", "c").await.unwrap();

        let mut child = spawn(&dir, "sleep 0.2; : > genie/genie.ready; sleep 5");
        let pid = child.id().unwrap();
        wait_until_ready(&mut child, &dir, pid, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(dir.has_ready_file().await);
        assert!(matches!(child.try_wait(), Ok(None)));
        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn exited_script_is_not_waited_on() {
        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "job-1");
        dir.create("c", "c").await.unwrap();

        let mut child = spawn(&dir, "exit 3");
        let pid = child.id().unwrap();
        wait_until_ready(&mut child, &dir, pid, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!dir.has_ready_file().await);
    }

    #[tokio::test]
    async fn script_that_never_gets_ready_is_stopped() {
        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "job-1");
        dir.create("c", "c").await.unwrap();

        let mut child = spawn(&dir, "sleep 30");
        let pid = child.id().unwrap();
        let err = wait_until_ready(&mut child, &dir, pid, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, GenieError::JobLaunch(_)));

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }
}
