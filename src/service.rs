use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterLoad, ClusterRef};
use crate::error::{GenieError, Result};
use crate::job::{
    Job, JobExecution, JobQuery, JobRecord, JobRequest, JobStatus, JobStore, KILLED_EXIT_CODE,
};
use crate::kill::{process_alive, KillController, KillOutcome};
use crate::strategy::{Dispatch, ExecutionStrategy, ExecutionStrategyRegistry};
use crate::workdir::JobDirectory;

pub const DEFAULT_KILL_REASON: &str = "Killed by user";

/// Accepts jobs, launches them through their strategy and drives them to a
/// terminal state from the done files their scripts leave behind.
#[derive(Clone)]
pub struct ExecutionService {
    registry: Arc<ExecutionStrategyRegistry>,
    store: Arc<RwLock<JobStore>>,
    /// Strategies of jobs launched by this process, by job id.
    active: Arc<Mutex<HashMap<String, Box<dyn ExecutionStrategy>>>>,
    load: Arc<ClusterLoad>,
    kill: Arc<KillController>,
    jobs_dir: PathBuf,
}

impl ExecutionService {
    pub fn new(
        registry: Arc<ExecutionStrategyRegistry>,
        store: JobStore,
        load: Arc<ClusterLoad>,
        kill: Arc<KillController>,
        jobs_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            store: Arc::new(RwLock::new(store)),
            active: Arc::new(Mutex::new(HashMap::new())),
            load,
            kill,
            jobs_dir,
        }
    }

    pub fn registry(&self) -> &ExecutionStrategyRegistry {
        &self.registry
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    pub fn load(&self) -> &ClusterLoad {
        &self.load
    }

    /// Validate and dispatch a job, returning it in `INIT`.
    ///
    /// Cluster and strategy resolution happen before anything is stored, so
    /// a job that can't be dispatched leaves no record. The launch itself
    /// runs in the background.
    pub async fn submit_job(&self, request: JobRequest, client_host: Option<String>) -> Result<Job> {
        let mut job = Job::from_request(request)?;
        job.assign_client_host(client_host);

        self.store.read().await.check_admission(&job.id)?;

        let dispatch = self.registry.get_execution_strategy(&job).await?;
        job.execution_cluster = Some(ClusterRef::from(&dispatch.cluster));

        self.store.write().await.add_job(job.clone())?;
        // Counted from dispatch so close submissions see each other
        self.load.job_started(&dispatch.cluster.id).await;
        tracing::info!(
            job_id = %job.id,
            user = %job.user,
            cluster_id = %dispatch.cluster.id,
            client_host = ?job.client_host,
            "Job accepted"
        );

        let service = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            service.launch(job_id, dispatch).await;
        });

        Ok(job)
    }

    async fn launch(&self, job_id: String, dispatch: Dispatch) {
        let Dispatch {
            mut strategy,
            cluster,
        } = dispatch;

        if !self.is_status(&job_id, JobStatus::Init).await {
            tracing::info!(job_id = %job_id, "Job left INIT before launch, skipping");
            return;
        }

        let execution = match strategy.launch().await {
            Ok(execution) => execution,
            Err(e) => {
                self.fail_launch(&job_id, &cluster.id, &e).await;
                return;
            }
        };

        let mut store = self.store.write().await;
        let Some(record) = store.get_mut(&job_id) else {
            return;
        };
        if !record.job.transition(JobStatus::Running, "Job is running.") {
            // Killed while the process was starting
            let reason = record.job.status_msg.clone().unwrap_or_default();
            drop(store);
            tracing::info!(job_id = %job_id, "Job killed during launch, stopping process");
            if let Err(e) = strategy.kill(&reason).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to stop process of killed job");
            }
            return;
        }
        record.execution = Some(execution);
        let snapshot = record.clone();
        self.active.lock().await.insert(job_id.clone(), strategy);
        drop(store);

        self.persist(&snapshot).await;
        tracing::info!(job_id = %job_id, cluster_id = %cluster.id, "Job running");
    }

    async fn fail_launch(&self, job_id: &str, cluster_id: &str, error: &GenieError) {
        tracing::error!(job_id = %job_id, error = %error, "Job launch failed");

        let dir = JobDirectory::new(&self.jobs_dir, job_id);
        if let Err(e) = dir.write_init_failure(&error.to_string()).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to write init failure details");
        }

        let message = format!("Job failed to launch: {}", error);
        let snapshot = {
            let mut store = self.store.write().await;
            match store.transition(job_id, JobStatus::Failed, &message) {
                Ok(true) => store.get(job_id).cloned(),
                Ok(false) => {
                    tracing::debug!(job_id = %job_id, "Job already terminal");
                    None
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to record launch failure");
                    None
                }
            }
        };
        if let Some(snapshot) = snapshot {
            self.load.job_finished(cluster_id).await;
            self.persist(&snapshot).await;
        }
    }

    async fn is_status(&self, job_id: &str, status: JobStatus) -> bool {
        self.store
            .read()
            .await
            .get(job_id)
            .is_some_and(|r| r.job.status == status)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<JobRecord> {
        self.store
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| GenieError::JobNotFound(job_id.to_string()))
    }

    pub async fn find_jobs(&self, query: &JobQuery) -> Vec<JobRecord> {
        self.store
            .read()
            .await
            .find(query)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Request a job be killed. Returns once the signal is on its way; the
    /// terminal state arrives through the done file.
    ///
    /// Killing a terminal job, or one that is already being killed, changes
    /// nothing.
    pub async fn kill_job(&self, job_id: &str, reason: &str) -> Result<JobRecord> {
        let execution = {
            let mut store = self.store.write().await;
            let record = store
                .get_mut(job_id)
                .ok_or_else(|| GenieError::JobNotFound(job_id.to_string()))?;

            match record.job.status {
                JobStatus::Init => {
                    record.job.transition(JobStatus::Killed, reason);
                    let snapshot = record.clone();
                    drop(store);
                    tracing::info!(job_id = %job_id, reason, "Job killed before launch");
                    if let Some(cluster) = &snapshot.job.execution_cluster {
                        self.load.job_finished(&cluster.id).await;
                    }
                    self.persist(&snapshot).await;
                    return Ok(snapshot);
                }
                status if status.is_terminal() => return Ok(record.clone()),
                _ => {}
            }

            let Some(execution) = record.execution.as_mut() else {
                return Err(GenieError::Internal(format!(
                    "running job {} has no execution",
                    job_id
                )));
            };
            if execution.kill_reason.is_some() {
                return Ok(record.clone());
            }
            execution.kill_reason = Some(reason.to_string());
            execution.clone()
        };

        let outcome = {
            let mut active = self.active.lock().await;
            match active.get_mut(job_id) {
                Some(strategy) => strategy.kill(reason).await,
                None => {
                    let dir = JobDirectory::at(&execution.working_dir);
                    self.kill.kill(&dir, execution.process_id, reason).await
                }
            }
        };

        match outcome {
            Ok(outcome) => {
                tracing::info!(job_id = %job_id, outcome = ?outcome, "Kill requested");
                if outcome == KillOutcome::AlreadyFinished {
                    self.poll_job(job_id, &execution).await;
                }
                self.get_job(job_id).await
            }
            Err(e) => {
                if let Some(exec) = self
                    .store
                    .write()
                    .await
                    .get_mut(job_id)
                    .and_then(|r| r.execution.as_mut())
                {
                    exec.kill_reason = None;
                }
                Err(e)
            }
        }
    }

    /// Poll completed jobs until `shutdown` is cancelled.
    pub async fn run_monitor(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Job monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_running_jobs().await;
                }
            }
        }
    }

    /// Apply terminal transitions for every running job that finished.
    pub async fn poll_running_jobs(&self) {
        let running = self.store.read().await.running();
        for (job_id, execution) in running {
            self.poll_job(&job_id, &execution).await;
        }
    }

    async fn poll_job(&self, job_id: &str, execution: &JobExecution) {
        let dir = JobDirectory::at(&execution.working_dir);
        match dir.read_done_file().await {
            Ok(Some(done)) => {
                self.finish_job(job_id, &dir, Some(done.exit_code)).await;
            }
            Ok(None) => {
                if self.is_alive(job_id, execution).await {
                    return;
                }
                // The script may have written the file just before exiting
                match dir.read_done_file().await {
                    Ok(Some(done)) => self.finish_job(job_id, &dir, Some(done.exit_code)).await,
                    _ => self.finish_job(job_id, &dir, None).await,
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Unreadable done file");
            }
        }
    }

    async fn is_alive(&self, job_id: &str, execution: &JobExecution) -> bool {
        match self.active.lock().await.get_mut(job_id) {
            Some(strategy) => strategy.is_running(),
            None => process_alive(execution.process_id),
        }
    }

    /// Move a running job to its terminal state. `None` means the process
    /// went away without writing a done file.
    async fn finish_job(&self, job_id: &str, dir: &JobDirectory, exit_code: Option<i32>) {
        let kill_reason = match dir.read_kill_reason().await {
            Ok(reason) => reason,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Unreadable kill reason");
                None
            }
        };

        // Killed before the script could handle the signal: write the done
        // file its kill handler would have
        let exit_code = match (exit_code, &kill_reason) {
            (None, Some(_)) => self.record_killed_exit(job_id, dir).await,
            (code, _) => code,
        };

        let (status, message) = match exit_code {
            Some(code) => {
                let status = JobStatus::from_exit_code(code);
                let message = match status {
                    JobStatus::Succeeded => "Job finished successfully.".to_string(),
                    JobStatus::Killed => kill_reason
                        .clone()
                        .unwrap_or_else(|| "Job was killed.".to_string()),
                    _ => format!("Job failed with exit code {}.", code),
                };
                (status, message)
            }
            None => (
                JobStatus::Failed,
                "Job process exited without writing a done file.".to_string(),
            ),
        };

        let snapshot = {
            let mut store = self.store.write().await;
            let Some(record) = store.get_mut(job_id) else {
                return;
            };
            if !record.job.transition(status, message) {
                return;
            }
            if let Some(execution) = record.execution.as_mut() {
                execution.exit_code = exit_code;
                execution.finished = Some(Utc::now());
                if kill_reason.is_some() {
                    execution.kill_reason = kill_reason;
                }
            }
            record.clone()
        };

        self.active.lock().await.remove(job_id);
        if let Some(execution) = &snapshot.execution {
            self.load.job_finished(&execution.cluster_id).await;
        }
        self.persist(&snapshot).await;

        tracing::info!(
            job_id = %job_id,
            status = %status,
            exit_code = ?exit_code,
            "Job finished"
        );
    }

    async fn record_killed_exit(&self, job_id: &str, dir: &JobDirectory) -> Option<i32> {
        match dir.write_done_file(KILLED_EXIT_CODE).await {
            Ok(true) => Some(KILLED_EXIT_CODE),
            // The script got there first after all
            Ok(false) => match dir.read_done_file().await {
                Ok(Some(done)) => Some(done.exit_code),
                _ => Some(KILLED_EXIT_CODE),
            },
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to write done file of killed job");
                Some(KILLED_EXIT_CODE)
            }
        }
    }

    /// Write the record to `genie/job.json`. Jobs that never launched get a
    /// directory of their own for it.
    async fn persist(&self, record: &JobRecord) {
        let dir = match &record.execution {
            Some(execution) => JobDirectory::at(&execution.working_dir),
            None => JobDirectory::new(&self.jobs_dir, &record.job.id),
        };
        if let Err(e) = dir.write_job_record(record).await {
            tracing::warn!(job_id = %record.job.id, error = %e, "Failed to persist job record");
        }
    }

    /// Take over a job launched by an earlier run of this node. The job is
    /// tracked through its done file and pid; there is no process handle.
    pub async fn recover_job(&self, record: JobRecord) -> Result<()> {
        let running = record.job.status == JobStatus::Running;
        let cluster_id = record.execution.as_ref().map(|e| e.cluster_id.clone());
        if running && cluster_id.is_none() {
            return Err(GenieError::Precondition(format!(
                "running job {} has no execution",
                record.job.id
            )));
        }

        let job_id = record.job.id.clone();
        self.store.write().await.insert_record(record)?;
        if let (true, Some(cluster_id)) = (running, cluster_id) {
            self.load.job_started(&cluster_id).await;
        }
        tracing::info!(job_id = %job_id, running, "Recovered job");
        Ok(())
    }

    /// Recover every job whose record is found under the jobs directory.
    /// Returns the number of jobs recovered.
    pub async fn recover_jobs(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.jobs_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut recovered = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let dir = JobDirectory::at(entry.path());
            match dir.read_job_record().await {
                Ok(Some(record)) => match self.recover_job(record).await {
                    Ok(()) => recovered += 1,
                    Err(e) => tracing::warn!(dir = %dir.root().display(), error = %e, "Skipping job"),
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(dir = %dir.root().display(), error = %e, "Unreadable job record")
                }
            }
        }
        Ok(recovered)
    }
}
