//! Layout of a job's working directory and the files the orchestrator and
//! the launcher script exchange through it.
//!
//! ```text
//! <jobs_dir>/<job_id>/
//!     run                         launcher script
//!     stdout, stderr              output of the job command
//!     initFailureDetails.txt      only when the job failed before starting
//!     genie/genie.ready           written by the script once its traps are set
//!     genie/genie.done            {"exitCode": "<code>"}, written by the script
//!     genie/kill-reason           written once by the kill controller
//!     genie/job.json              job record, rewritten on each state change
//!     genie/logs/                 script log and environment dump
//!     genie/applications/
//!     genie/cluster/<id>/{config,dependencies}
//!     genie/command/<id>/{config,dependencies}
//! ```

use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::job::JobRecord;

pub const LAUNCHER_SCRIPT: &str = "run";
pub const DONE_FILE: &str = "genie/genie.done";
pub const READY_FILE: &str = "genie/genie.ready";
pub const KILL_REASON_FILE: &str = "genie/kill-reason";
pub const INIT_FAILURE_FILE: &str = "initFailureDetails.txt";
pub const STDOUT_FILE: &str = "stdout";
pub const STDERR_FILE: &str = "stderr";
pub const SCRIPT_LOG_FILE: &str = "genie/logs/genie.log";
pub const ENV_LOG_FILE: &str = "genie/logs/env.log";
pub const JOB_RECORD_FILE: &str = "genie/job.json";

const GENIE_DIR: &str = "genie";
const LOGS_DIR: &str = "logs";
const APPLICATIONS_DIR: &str = "applications";
const CLUSTER_DIR: &str = "cluster";
const COMMAND_DIR: &str = "command";
const CONFIG_DIR: &str = "config";
const DEPENDENCIES_DIR: &str = "dependencies";

/// Contents of the done file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneFile {
    #[serde(rename = "exitCode", deserialize_with = "exit_code_from_string_or_number")]
    pub exit_code: i32,
}

fn exit_code_from_string_or_number<'de, D>(deserializer: D) -> std::result::Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i32),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(code) => Ok(code),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KillReason {
    #[serde(rename = "killReason")]
    reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDirectory {
    root: PathBuf,
}

impl JobDirectory {
    pub fn new(jobs_dir: &Path, job_id: &str) -> Self {
        Self {
            root: jobs_dir.join(job_id),
        }
    }

    /// Wrap an existing working directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn launcher_script(&self) -> PathBuf {
        self.root.join(LAUNCHER_SCRIPT)
    }

    pub fn done_file(&self) -> PathBuf {
        self.root.join(DONE_FILE)
    }

    pub fn ready_file(&self) -> PathBuf {
        self.root.join(READY_FILE)
    }

    pub fn kill_reason_file(&self) -> PathBuf {
        self.root.join(KILL_REASON_FILE)
    }

    pub fn init_failure_file(&self) -> PathBuf {
        self.root.join(INIT_FAILURE_FILE)
    }

    pub fn stdout(&self) -> PathBuf {
        self.root.join(STDOUT_FILE)
    }

    pub fn stderr(&self) -> PathBuf {
        self.root.join(STDERR_FILE)
    }

    pub fn script_log(&self) -> PathBuf {
        self.root.join(SCRIPT_LOG_FILE)
    }

    pub fn env_log(&self) -> PathBuf {
        self.root.join(ENV_LOG_FILE)
    }

    pub fn job_record(&self) -> PathBuf {
        self.root.join(JOB_RECORD_FILE)
    }

    pub fn genie_dir(&self) -> PathBuf {
        self.root.join(GENIE_DIR)
    }

    pub fn application_dir(&self) -> PathBuf {
        self.genie_dir().join(APPLICATIONS_DIR)
    }

    pub fn cluster_dir(&self, cluster_id: &str) -> PathBuf {
        self.genie_dir().join(CLUSTER_DIR).join(cluster_id)
    }

    pub fn command_dir(&self, command_id: &str) -> PathBuf {
        self.genie_dir().join(COMMAND_DIR).join(command_id)
    }

    /// Create the directory tree for a job on the given cluster and command.
    pub async fn create(&self, cluster_id: &str, command_id: &str) -> Result<()> {
        let cluster_dir = self.cluster_dir(cluster_id);
        let command_dir = self.command_dir(command_id);
        let dirs = [
            self.genie_dir().join(LOGS_DIR),
            self.application_dir(),
            cluster_dir.join(CONFIG_DIR),
            cluster_dir.join(DEPENDENCIES_DIR),
            command_dir.join(CONFIG_DIR),
            command_dir.join(DEPENDENCIES_DIR),
        ];
        for dir in dirs {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    pub async fn write_launcher_script(&self, script: &str) -> Result<PathBuf> {
        let path = self.launcher_script();
        tokio::fs::write(&path, script).await?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        Ok(path)
    }

    /// Read the done file. `None` while the job hasn't finished, including
    /// the moment between the script creating the file and filling it.
    pub async fn read_done_file(&self) -> Result<Option<DoneFile>> {
        let contents = match tokio::fs::read(self.done_file()).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if contents.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&contents)?))
    }

    pub async fn has_done_file(&self) -> bool {
        tokio::fs::try_exists(self.done_file())
            .await
            .unwrap_or(false)
    }

    pub async fn has_ready_file(&self) -> bool {
        tokio::fs::try_exists(self.ready_file())
            .await
            .unwrap_or(false)
    }

    /// Write a done file for a script that died without writing its own.
    /// Returns false if one exists already.
    pub async fn write_done_file(&self, exit_code: i32) -> Result<bool> {
        let body = format!("{{\"exitCode\": \"{}\"}}\n", exit_code);
        write_once(&self.done_file(), body.as_bytes()).await
    }

    /// Record why the job is being killed. Returns false if a reason was
    /// already recorded, so only the first kill request writes it.
    pub async fn write_kill_reason(&self, reason: &str) -> Result<bool> {
        let body = serde_json::to_vec(&KillReason {
            reason: reason.to_string(),
        })?;
        write_once(&self.kill_reason_file(), &body).await
    }

    /// Forget a kill request so a later one can be made.
    pub async fn clear_kill_reason(&self) -> Result<()> {
        match tokio::fs::remove_file(self.kill_reason_file()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_kill_reason(&self) -> Result<Option<String>> {
        match tokio::fs::read(self.kill_reason_file()).await {
            Ok(contents) => {
                let parsed: KillReason = serde_json::from_slice(&contents)?;
                Ok(Some(parsed.reason))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the job record so a restarted node can pick the job up again.
    /// Written to a temporary file and renamed into place.
    pub async fn write_job_record(&self, record: &JobRecord) -> Result<()> {
        let path = self.job_record();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(record)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn read_job_record(&self) -> Result<Option<JobRecord>> {
        match tokio::fs::read(self.job_record()).await {
            Ok(contents) => Ok(Some(serde_json::from_slice(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Explain why a job never started. Creates the job directory if the
    /// failure happened before it existed.
    pub async fn write_init_failure(&self, details: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.init_failure_file(), details).await?;
        Ok(())
    }
}

/// Create `path` with `body` unless it already exists.
async fn write_once(path: &Path, body: &[u8]) -> Result<bool> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    file.write_all(body).await?;
    file.flush().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn done_file_accepts_string_and_number() {
        let done: DoneFile = serde_json::from_str(r#"{"exitCode": "999"}"#).unwrap();
        assert_eq!(done.exit_code, 999);
        let done: DoneFile = serde_json::from_str(r#"{"exitCode": 3}"#).unwrap();
        assert_eq!(done.exit_code, 3);
        assert!(serde_json::from_str::<DoneFile>(r#"{"exitCode": "x"}"#).is_err());
    }

    #[tokio::test]
    async fn create_builds_layout() {
        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "job-1");
        dir.create("cluster-1", "command-1").await.unwrap();

        assert!(dir.genie_dir().join("logs").is_dir());
        assert!(dir.application_dir().is_dir());
        assert!(dir.cluster_dir("cluster-1").join("config").is_dir());
        assert!(dir.cluster_dir("cluster-1").join("dependencies").is_dir());
        assert!(dir.command_dir("command-1").join("config").is_dir());
        assert!(dir.command_dir("command-1").join("dependencies").is_dir());
        assert_eq!(dir.root(), tmp.path().join("job-1"));
    }

    #[tokio::test]
    async fn launcher_script_is_executable() {
        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "job-1");
        dir.create("c", "c").await.unwrap();

        let path = dir.write_launcher_script("#!/usr/bin/env bash\n").await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(path, tmp.path().join("job-1").join("run"));
    }

    #[tokio::test]
    async fn read_done_file_states() {
        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "job-1");
        dir.create("c", "c").await.unwrap();

        assert_eq!(dir.read_done_file().await.unwrap(), None);
        assert!(!dir.has_done_file().await);

        std::fs::write(dir.done_file(), "").unwrap();
        assert_eq!(dir.read_done_file().await.unwrap(), None);

        std::fs::write(dir.done_file(), "{\"exitCode\": \"137\"}\n").unwrap();
        assert_eq!(
            dir.read_done_file().await.unwrap(),
            Some(DoneFile { exit_code: 137 })
        );
        assert!(dir.has_done_file().await);
    }

    #[tokio::test]
    async fn kill_reason_written_once() {
        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "job-1");

        assert!(dir.write_kill_reason("first").await.unwrap());
        assert!(!dir.write_kill_reason("second").await.unwrap());
        assert_eq!(
            dir.read_kill_reason().await.unwrap().as_deref(),
            Some("first")
        );

        dir.clear_kill_reason().await.unwrap();
        assert!(dir.read_kill_reason().await.unwrap().is_none());
        dir.clear_kill_reason().await.unwrap();
        assert!(dir.write_kill_reason("third").await.unwrap());
    }

    #[tokio::test]
    async fn written_done_file_never_replaces_the_scripts() {
        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "job-1");

        assert!(dir.write_done_file(999).await.unwrap());
        assert_eq!(
            dir.read_done_file().await.unwrap(),
            Some(DoneFile { exit_code: 999 })
        );
        assert!(!dir.write_done_file(1).await.unwrap());
        assert_eq!(dir.read_done_file().await.unwrap().unwrap().exit_code, 999);
    }

    #[tokio::test]
    async fn job_record_round_trip() {
        use crate::cluster::ClusterCriteria;
        use crate::job::{CommandRef, Job};

        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "job-1");
        assert!(dir.read_job_record().await.unwrap().is_none());

        let job = Job::new(
            "etl",
            "alice",
            CommandRef {
                id: "echo".to_string(),
                name: "echo".to_string(),
            },
            "hello",
            vec![ClusterCriteria::new(["prod"])],
        );
        let record = JobRecord::new(job);
        dir.write_job_record(&record).await.unwrap();
        assert_eq!(dir.read_job_record().await.unwrap(), Some(record));
        assert!(!dir.job_record().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn init_failure_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "never-started");
        dir.write_init_failure("boom").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.init_failure_file()).unwrap(),
            "boom"
        );
    }
}
