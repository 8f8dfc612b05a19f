/// How `pkill`/`pgrep` select the job's processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillFlag {
    /// `-g`: every process in the script's process group.
    ProcessGroup,
    /// `-P`: direct children of the script.
    ParentPid,
}

impl KillFlag {
    pub fn as_flag(&self) -> &'static str {
        match self {
            KillFlag::ProcessGroup => "-g",
            KillFlag::ParentPid => "-P",
        }
    }
}

/// Platform specifics of the in-script kill protocol.
///
/// `child_process_threshold` is the process count the script sees when the
/// job's own processes are gone. On Linux `pgrep -g` also counts the script,
/// the command substitution subshell and `wc`, so an idle group reads 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillPlatform {
    pub kill_flag: KillFlag,
    pub child_process_threshold: u32,
}

impl KillPlatform {
    pub const LINUX: KillPlatform = KillPlatform {
        kill_flag: KillFlag::ProcessGroup,
        child_process_threshold: 3,
    };

    pub const OTHER: KillPlatform = KillPlatform {
        kill_flag: KillFlag::ParentPid,
        child_process_threshold: 0,
    };

    /// Resolve the platform this process runs on.
    pub fn probe() -> Self {
        if cfg!(target_os = "linux") {
            Self::LINUX
        } else {
            Self::OTHER
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.child_process_threshold = threshold;
        self
    }
}

impl Default for KillPlatform {
    fn default() -> Self {
        Self::probe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_constants() {
        assert_eq!(KillPlatform::LINUX.kill_flag.as_flag(), "-g");
        assert_eq!(KillPlatform::LINUX.child_process_threshold, 3);
        assert_eq!(KillPlatform::OTHER.kill_flag.as_flag(), "-P");
        assert_eq!(KillPlatform::OTHER.child_process_threshold, 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn probe_on_linux() {
        assert_eq!(KillPlatform::probe(), KillPlatform::LINUX);
    }

    #[test]
    fn threshold_override_keeps_flag() {
        let platform = KillPlatform::LINUX.with_threshold(5);
        assert_eq!(platform.kill_flag, KillFlag::ProcessGroup);
        assert_eq!(platform.child_process_threshold, 5);
    }
}
