use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{GenieError, Result};
use crate::job::execution::JobExecution;
use crate::job::model::{Job, JobStatus};
use crate::job::query::JobQuery;

const DEFAULT_MAX_JOBS: usize = 10_000;

/// A job together with its execution, once it has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(flatten)]
    pub job: Job,
    pub execution: Option<JobExecution>,
}

impl JobRecord {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            execution: None,
        }
    }
}

/// In-memory job records keyed by job id.
#[derive(Debug)]
pub struct JobStore {
    jobs: HashMap<String, JobRecord>,
    max_jobs: usize,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            max_jobs,
        }
    }

    /// Check that `job_id` could be added right now. Only jobs that haven't
    /// finished count toward capacity.
    pub fn check_admission(&self, job_id: &str) -> Result<()> {
        if self.jobs.contains_key(job_id) {
            return Err(GenieError::JobAlreadyExists(job_id.to_string()));
        }
        if self.is_full() {
            return Err(GenieError::AtCapacity);
        }
        Ok(())
    }

    pub fn add_job(&mut self, job: Job) -> Result<()> {
        self.insert_record(JobRecord::new(job))
    }

    /// Insert a record as-is, e.g. one recovered after a restart.
    ///
    /// When the store holds `max_jobs` records the oldest finished one is
    /// dropped to make room.
    pub fn insert_record(&mut self, record: JobRecord) -> Result<()> {
        self.check_admission(&record.job.id)?;
        if self.jobs.len() >= self.max_jobs {
            self.evict_oldest_finished();
        }
        self.jobs.insert(record.job.id.clone(), record);
        Ok(())
    }

    fn evict_oldest_finished(&mut self) {
        let oldest = self
            .jobs
            .values()
            .filter(|r| r.job.status.is_terminal())
            .min_by_key(|r| r.job.finished.unwrap_or(r.job.updated))
            .map(|r| r.job.id.clone());
        if let Some(id) = oldest {
            tracing::debug!(job_id = %id, "Evicting finished job");
            self.jobs.remove(&id);
        }
    }

    pub fn get(&self, id: &str) -> Option<&JobRecord> {
        self.jobs.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut JobRecord> {
        self.jobs.get_mut(id)
    }

    /// Apply a lifecycle transition. `Ok(false)` when the job's current state
    /// doesn't allow it.
    pub fn transition(&mut self, id: &str, status: JobStatus, message: &str) -> Result<bool> {
        let record = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| GenieError::JobNotFound(id.to_string()))?;
        Ok(record.job.transition(status, message))
    }

    /// Records matching the query, ordered and paged.
    pub fn find(&self, query: &JobQuery) -> Vec<&JobRecord> {
        let mut matched: Vec<&JobRecord> = self
            .jobs
            .values()
            .filter(|record| query.matches(record))
            .collect();
        matched.sort_by(|a, b| query.compare(a, b));
        matched
            .into_iter()
            .skip(query.page.saturating_mul(query.limit))
            .take(query.limit)
            .collect()
    }

    /// Running jobs and their executions.
    pub fn running(&self) -> Vec<(String, JobExecution)> {
        self.jobs
            .values()
            .filter(|r| r.job.status == JobStatus::Running)
            .filter_map(|r| r.execution.clone().map(|e| (r.job.id.clone(), e)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of jobs that haven't reached a terminal state.
    pub fn active_len(&self) -> usize {
        self.jobs
            .values()
            .filter(|r| !r.job.status.is_terminal())
            .count()
    }

    pub fn is_full(&self) -> bool {
        self.active_len() >= self.max_jobs
    }
}
