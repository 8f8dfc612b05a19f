use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::{ClusterCriteria, ClusterRef};
use crate::error::{GenieError, Result};

/// Exit code the launcher script records when a job was killed on request.
///
/// Real process exit codes are 0-255, so this can't collide with one.
pub const KILLED_EXIT_CODE: i32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Init,
    Running,
    Succeeded,
    Killed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Killed | JobStatus::Failed
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Init, JobStatus::Running)
            | (JobStatus::Init, JobStatus::Killed)
            | (JobStatus::Init, JobStatus::Failed) => true,
            (JobStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// Classify a finished job from the exit code in its done file.
    ///
    /// Only the sentinel written by the kill handler counts as killed; a
    /// process that died from SIGKILL (137) outside of a kill request failed.
    pub fn from_exit_code(exit_code: i32) -> Self {
        match exit_code {
            0 => JobStatus::Succeeded,
            KILLED_EXIT_CODE => JobStatus::Killed,
            _ => JobStatus::Failed,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Init => write!(f, "INIT"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Succeeded => write!(f, "SUCCEEDED"),
            JobStatus::Killed => write!(f, "KILLED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = GenieError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INIT" => Ok(JobStatus::Init),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "KILLED" => Ok(JobStatus::Killed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(GenieError::Precondition(format!(
                "Unknown job status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRef {
    /// Defaults to the name when not supplied.
    #[serde(default)]
    pub id: String,
    pub name: String,
}

/// A job submission as received from a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub command: Option<CommandRef>,
    #[serde(default)]
    pub command_args: String,
    #[serde(default)]
    pub applications: Vec<String>,
    #[serde(default)]
    pub memory: Option<u32>,
    #[serde(default)]
    pub cluster_criterias: Vec<ClusterCriteria>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub client_host: Option<String>,
}

impl JobRequest {
    /// Parse a request body. An empty body is a missing job, not a parse error.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(GenieError::Precondition(
                "No job entered. Unable to submit.".to_string(),
            ));
        }
        serde_json::from_slice(body)
            .map_err(|e| GenieError::Precondition(format!("Invalid job request: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub name: String,
    pub user: String,
    pub version: String,
    pub description: Option<String>,
    pub command: CommandRef,
    pub command_args: String,
    pub applications: Vec<String>,
    /// Memory for the job process in megabytes.
    pub memory: Option<u32>,
    pub cluster_criterias: Vec<ClusterCriteria>,
    pub tags: BTreeSet<String>,
    pub client_host: Option<String>,
    pub status: JobStatus,
    pub status_msg: Option<String>,
    pub execution_cluster: Option<ClusterRef>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
}

/// Whether `value` can be used as a single directory name: non-empty,
/// made of `[A-Za-z0-9._-]` and not `.` or `..`.
fn is_path_safe(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn require_path_safe(what: &str, value: &str) -> Result<()> {
    if is_path_safe(value) {
        return Ok(());
    }
    Err(GenieError::Precondition(format!(
        "{} '{}' may only contain letters, digits, '.', '_' and '-'",
        what, value
    )))
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        user: impl Into<String>,
        command: CommandRef,
        command_args: impl Into<String>,
        cluster_criterias: Vec<ClusterCriteria>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            user: user.into(),
            version: "NA".to_string(),
            description: None,
            command,
            command_args: command_args.into(),
            applications: Vec::new(),
            memory: None,
            cluster_criterias,
            tags: BTreeSet::new(),
            client_host: None,
            status: JobStatus::Init,
            status_msg: Some("Job accepted and in initialization phase.".to_string()),
            execution_cluster: None,
            created: now,
            updated: now,
            started: None,
            finished: None,
        }
    }

    /// Validate a submission and turn it into a job in `INIT`.
    pub fn from_request(request: JobRequest) -> Result<Self> {
        if blank(&request.name) {
            return Err(GenieError::Precondition("Job name is required".to_string()));
        }
        if blank(&request.user) {
            return Err(GenieError::Precondition("Job user is required".to_string()));
        }
        if blank(&request.command_args) {
            return Err(GenieError::Precondition(
                "Command arguments are required".to_string(),
            ));
        }
        let mut command = request
            .command
            .filter(|c| !blank(&c.name))
            .ok_or_else(|| GenieError::Precondition("Command name is required".to_string()))?;
        if blank(&command.id) {
            command.id = command.name.clone();
        }
        require_path_safe("Command id", &command.id)?;
        if let Some(id) = request.id.as_deref().filter(|id| !blank(id)) {
            require_path_safe("Job id", id)?;
        }
        for application in &request.applications {
            require_path_safe("Application", application)?;
        }
        if request.cluster_criterias.is_empty() {
            return Err(GenieError::Precondition(
                "At least one cluster criteria is required".to_string(),
            ));
        }
        if request.cluster_criterias.iter().any(ClusterCriteria::is_empty) {
            return Err(GenieError::Precondition(
                "Cluster criteria must not be empty".to_string(),
            ));
        }

        let mut job = Job::new(
            request.name,
            request.user,
            command,
            request.command_args,
            request.cluster_criterias,
        );
        if let Some(id) = request.id.filter(|id| !blank(id)) {
            job.id = id;
        }
        if let Some(version) = request.version.filter(|v| !blank(v)) {
            job.version = version;
        }
        job.description = request.description;
        job.applications = request.applications;
        job.memory = request.memory;
        job.tags = request.tags;
        job.client_host = request.client_host.filter(|h| !blank(h));
        Ok(job)
    }

    /// Record the submitter's host unless one is already present.
    pub fn assign_client_host(&mut self, host: Option<String>) {
        let has_host = self.client_host.as_deref().is_some_and(|h| !blank(h));
        if has_host {
            return;
        }
        if let Some(host) = host.filter(|h| !blank(h)) {
            self.client_host = Some(host);
        }
    }

    /// Move to `next` if the lifecycle allows it. Returns false otherwise;
    /// terminal jobs never change.
    pub fn transition(&mut self, next: JobStatus, message: impl Into<String>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }

        let now = Utc::now();
        self.status = next;
        self.status_msg = Some(message.into());
        self.updated = now;
        if next == JobStatus::Running {
            self.started = Some(now);
        } else if next.is_terminal() {
            self.finished = Some(now);
        }
        true
    }

    pub fn memory_or_default(&self) -> u32 {
        self.memory.unwrap_or(DEFAULT_JOB_MEMORY_MB)
    }
}

/// Memory exported to a job that didn't ask for any, in megabytes.
pub const DEFAULT_JOB_MEMORY_MB: u32 = 1536;
