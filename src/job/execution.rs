use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Runtime facts about a launched job process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
    pub job_id: String,
    pub host_name: String,
    /// Pid of the launcher script, which also leads the job's process group.
    pub process_id: u32,
    pub cluster_id: String,
    pub working_dir: PathBuf,
    pub exit_code: Option<i32>,
    pub kill_reason: Option<String>,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
}

impl JobExecution {
    pub fn new(
        job_id: impl Into<String>,
        host_name: impl Into<String>,
        process_id: u32,
        cluster_id: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            host_name: host_name.into(),
            process_id,
            cluster_id: cluster_id.into(),
            working_dir: working_dir.into(),
            exit_code: None,
            kill_reason: None,
            started: Utc::now(),
            finished: None,
        }
    }
}
