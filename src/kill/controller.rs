use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::error::{GenieError, Result};
use crate::kill::escalation::{EscalationPolicy, EscalationStep, KillEscalation};
use crate::kill::platform::KillPlatform;
use crate::workdir::JobDirectory;

/// Ticks the observer waits beyond the script's own bound before it reports
/// a group that outlived the forceful signal.
const OBSERVER_GRACE_TICKS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// SIGTERM delivered; the script's handler takes it from here.
    Signalled,
    /// The done file already exists, nothing to kill.
    AlreadyFinished,
    /// An earlier kill request is in progress.
    AlreadyRequested,
    /// The script was gone by the time the signal was sent.
    ProcessExited,
}

/// Starts the kill protocol for launched jobs.
///
/// The escalation itself runs inside the launcher script so it survives an
/// orchestrator restart. The controller only delivers SIGTERM to the script
/// and watches the process group drain.
#[derive(Debug, Clone)]
pub struct KillController {
    platform: KillPlatform,
    policy: EscalationPolicy,
}

impl KillController {
    pub fn new(platform: KillPlatform, max_ticks: u32, tick_interval: Duration) -> Self {
        Self {
            policy: EscalationPolicy::new(
                max_ticks,
                tick_interval,
                platform.child_process_threshold,
            ),
            platform,
        }
    }

    pub fn platform(&self) -> KillPlatform {
        self.platform
    }

    pub fn policy(&self) -> EscalationPolicy {
        self.policy
    }

    /// Ask the launcher script with pid `pid` to kill its job.
    pub async fn kill(&self, dir: &JobDirectory, pid: u32, reason: &str) -> Result<KillOutcome> {
        self.kill_with(dir, pid, reason, |pid, sig| signal::kill(pid, sig)).await
    }

    async fn kill_with<F>(
        &self,
        dir: &JobDirectory,
        pid: u32,
        reason: &str,
        send: F,
    ) -> Result<KillOutcome>
    where
        F: FnOnce(Pid, Signal) -> nix::Result<()>,
    {
        if dir.has_done_file().await {
            return Ok(KillOutcome::AlreadyFinished);
        }
        if !dir.write_kill_reason(reason).await? {
            tracing::debug!(pid, "Kill already requested");
            return Ok(KillOutcome::AlreadyRequested);
        }

        match send(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => {
                tracing::info!(pid, reason, "Sent SIGTERM to launcher script");
                self.observe(pid);
                Ok(KillOutcome::Signalled)
            }
            Err(Errno::ESRCH) => {
                tracing::info!(pid, "Launcher script already exited");
                Ok(KillOutcome::ProcessExited)
            }
            Err(e) => {
                // Nothing was signalled, so the request must not stick
                if let Err(clear) = dir.clear_kill_reason().await {
                    tracing::warn!(pid, error = %clear, "Failed to clear kill reason");
                }
                Err(GenieError::Kill(format!(
                    "failed to signal process {}: {}",
                    pid, e
                )))
            }
        }
    }

    /// Watch the job's process group until it drains, logging if it
    /// outlives the script's escalation.
    fn observe(&self, pid: u32) {
        let policy = EscalationPolicy::new(
            self.policy.max_ticks + OBSERVER_GRACE_TICKS,
            self.policy.tick_interval,
            0,
        );
        tokio::spawn(async move {
            let outcome = KillEscalation::new(policy)
                .run(|| async move { u32::from(group_alive(pid)) })
                .await;
            match outcome.step {
                EscalationStep::Escalate => tracing::warn!(
                    pid,
                    ticks = outcome.ticks,
                    "Process group still alive after kill escalation"
                ),
                _ => tracing::info!(pid, ticks = outcome.ticks, "Process group drained"),
            }
        });
    }
}

impl Default for KillController {
    fn default() -> Self {
        Self::new(
            KillPlatform::probe(),
            crate::kill::escalation::DEFAULT_MAX_TICKS,
            crate::kill::escalation::DEFAULT_TICK_INTERVAL,
        )
    }
}

/// Whether a process with this pid exists. Signal 0 checks without sending.
pub fn process_alive(pid: u32) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether any process remains in the group led by `pgid`.
pub fn group_alive(pgid: u32) -> bool {
    match signal::killpg(Pid::from_raw(pgid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn finished_job_is_not_signalled() {
        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "job-1");
        dir.create("c", "c").await.unwrap();
        std::fs::write(dir.done_file(), "{\"exitCode\": \"0\"}\n").unwrap();

        let controller = KillController::default();
        let outcome = controller.kill(&dir, u32::MAX >> 2, "user").await.unwrap();
        assert_eq!(outcome, KillOutcome::AlreadyFinished);
        assert!(!dir.kill_reason_file().exists());
    }

    #[tokio::test]
    async fn second_request_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "job-1");
        dir.create("c", "c").await.unwrap();
        dir.write_kill_reason("first").await.unwrap();

        let controller = KillController::default();
        let outcome = controller.kill(&dir, 1, "second").await.unwrap();
        assert_eq!(outcome, KillOutcome::AlreadyRequested);
        assert_eq!(
            dir.read_kill_reason().await.unwrap().as_deref(),
            Some("first")
        );
    }

    #[tokio::test]
    async fn failed_signal_can_be_retried() {
        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "job-1");
        dir.create("c", "c").await.unwrap();
        let controller = KillController::default();

        let err = controller
            .kill_with(&dir, 4242, "first", |_, _| Err(Errno::EPERM))
            .await
            .unwrap_err();
        assert!(matches!(err, GenieError::Kill(_)));
        assert!(!dir.kill_reason_file().exists());

        let outcome = controller
            .kill_with(&dir, 4242, "second", |pid, signal| {
                assert_eq!(pid, Pid::from_raw(4242));
                assert_eq!(signal, Signal::SIGTERM);
                Err(Errno::ESRCH)
            })
            .await
            .unwrap();
        assert_eq!(outcome, KillOutcome::ProcessExited);
        assert_eq!(
            dir.read_kill_reason().await.unwrap().as_deref(),
            Some("second")
        );
    }

    #[tokio::test]
    async fn exited_process_is_reported() {
        let tmp = TempDir::new().unwrap();
        let dir = JobDirectory::new(tmp.path(), "job-1");
        dir.create("c", "c").await.unwrap();

        // Reap a short-lived child so its pid is free
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let controller = KillController::default();
        let outcome = controller.kill(&dir, pid, "user").await.unwrap();
        assert_eq!(outcome, KillOutcome::ProcessExited);
        assert!(!process_alive(pid));
    }

    #[test]
    fn current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[test]
    fn policy_uses_platform_threshold() {
        let controller = KillController::new(KillPlatform::LINUX, 30, Duration::from_secs(1));
        assert_eq!(controller.policy().threshold, 3);
        assert_eq!(controller.policy().max_ticks, 30);
    }
}
