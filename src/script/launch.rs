use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cluster::Cluster;
use crate::job::{Job, KILLED_EXIT_CODE};
use crate::kill::escalation::{DEFAULT_MAX_TICKS, DEFAULT_TICK_INTERVAL};
use crate::kill::KillPlatform;
use crate::workdir::JobDirectory;

const SETUP_FILE: &str = "setup.sh";

/// Variables exported to every job, in the order the script sets them.
pub const GENIE_VARIABLES: [&str; 11] = [
    "GENIE_JOB_DIR",
    "GENIE_CLUSTER_DIR",
    "GENIE_CLUSTER_ID",
    "GENIE_CLUSTER_NAME",
    "GENIE_COMMAND_DIR",
    "GENIE_COMMAND_ID",
    "GENIE_COMMAND_NAME",
    "GENIE_APPLICATION_DIR",
    "GENIE_JOB_ID",
    "GENIE_JOB_NAME",
    "GENIE_JOB_MEMORY",
];

/// Everything the launcher script needs to know about one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEnvironment {
    pub job_id: String,
    pub job_name: String,
    pub job_memory: u32,
    pub job_dir: PathBuf,
    pub cluster_id: String,
    pub cluster_name: String,
    pub cluster_dir: PathBuf,
    pub command_id: String,
    pub command_name: String,
    pub command_dir: PathBuf,
    pub application_dir: PathBuf,
    /// Sourced in order when present: cluster, command, then applications.
    pub setup_files: Vec<PathBuf>,
    /// Shell text that runs the job itself.
    pub invocation: String,
    /// Shell text run by the kill handler before it signals the job's
    /// processes.
    pub kill_hook: Option<String>,
}

impl JobEnvironment {
    pub fn new(job: &Job, cluster: &Cluster, dir: &JobDirectory, invocation: impl Into<String>) -> Self {
        let cluster_dir = dir.cluster_dir(&cluster.id);
        let command_dir = dir.command_dir(&job.command.id);
        let application_dir = dir.application_dir();

        let mut setup_files = vec![cluster_dir.join(SETUP_FILE), command_dir.join(SETUP_FILE)];
        setup_files.extend(
            job.applications
                .iter()
                .map(|app| application_dir.join(app).join(SETUP_FILE)),
        );

        Self {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            job_memory: job.memory_or_default(),
            job_dir: dir.root().to_path_buf(),
            cluster_id: cluster.id.clone(),
            cluster_name: cluster.name.clone(),
            cluster_dir,
            command_id: job.command.id.clone(),
            command_name: job.command.name.clone(),
            command_dir,
            application_dir,
            setup_files,
            invocation: invocation.into(),
            kill_hook: None,
        }
    }
}

/// Node-wide knobs of the generated script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptSettings {
    pub platform: KillPlatform,
    pub max_ticks: u32,
    pub tick_interval: Duration,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            platform: KillPlatform::probe(),
            max_ticks: DEFAULT_MAX_TICKS,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

fn render_interval(interval: Duration) -> String {
    let millis = interval.as_millis();
    if millis % 1000 == 0 {
        (millis / 1000).to_string()
    } else {
        format!("{}.{:03}", millis / 1000, millis % 1000)
    }
}

/// Render the launcher script for a job.
///
/// The script writes `{"exitCode": "<code>"}` to the done file on every exit
/// path. The first write wins, so the kill handler's 999 survives the exit
/// trap that follows it.
pub fn synthesize(env: &JobEnvironment, settings: &ScriptSettings) -> String {
    let flag = settings.platform.kill_flag.as_flag();
    let threshold = settings.platform.child_process_threshold;
    let done_file = env.job_dir.join(crate::workdir::DONE_FILE);
    let kill_hook = env
        .kill_hook
        .as_deref()
        .map(|hook| format!("{} > /dev/null 2>&1 || true\n    ", hook.trim_end()))
        .unwrap_or_default();

    let mut script = String::new();
    script.push_str("#!/usr/bin/env bash\n\n");
    script.push_str("set -o nounset -o pipefail\n\n");

    script.push_str(&format!("SELF_PID=$$\nDONE_FILE={}\n\n", quote_path(&done_file)));

    script.push_str(
        "write_done_file() {\n    \
         ( set -o noclobber; printf '{\"exitCode\": \"%s\"}\\n' \"$1\" > \"${DONE_FILE}\" ) 2> /dev/null || true\n\
         }\n\n",
    );

    script.push_str(
        "handle_failure() {\n    \
         local exit_code=$?\n    \
         trap - ERR EXIT\n    \
         write_done_file \"${exit_code}\"\n    \
         exit \"${exit_code}\"\n\
         }\n\n",
    );

    let _ = write!(
        script,
        "count_processes() {{\n    \
         pgrep {flag} \"${{SELF_PID}}\" | wc -w\n\
         }}\n\n\
         handle_kill_request() {{\n    \
         KILL_EXIT_CODE={code}\n    \
         trap \"\" SIGTERM\n    \
         trap - ERR EXIT\n    \
         write_done_file \"${{KILL_EXIT_CODE}}\"\n    \
         {hook}pkill {flag} \"${{SELF_PID}}\" || true\n    \
         COUNTER=0\n    \
         NUM_PROCESSES=$(count_processes)\n    \
         while [ \"${{COUNTER}}\" -lt {ticks} ] && [ \"${{NUM_PROCESSES}}\" -gt {threshold} ]; do\n        \
         sleep {interval}\n        \
         COUNTER=$((COUNTER + 1))\n        \
         NUM_PROCESSES=$(count_processes)\n    \
         done\n    \
         if [ \"${{NUM_PROCESSES}}\" -le {threshold} ]; then\n        \
         exit \"${{KILL_EXIT_CODE}}\"\n    \
         fi\n    \
         pkill -9 {flag} \"${{SELF_PID}}\" || true\n    \
         exit \"${{KILL_EXIT_CODE}}\"\n\
         }}\n\n",
        flag = flag,
        hook = kill_hook,
        code = KILLED_EXIT_CODE,
        ticks = settings.max_ticks,
        threshold = threshold,
        interval = render_interval(settings.tick_interval),
    );

    script.push_str("trap \"handle_failure\" ERR EXIT\n");
    script.push_str("trap \"handle_kill_request\" SIGTERM\n");
    // The node waits for this before it reports the job running
    let _ = writeln!(
        script,
        ": > {}\n",
        quote_path(&env.job_dir.join(crate::workdir::READY_FILE))
    );

    let values: [String; 11] = [
        quote_path(&env.job_dir),
        quote_path(&env.cluster_dir),
        shell_quote(&env.cluster_id),
        shell_quote(&env.cluster_name),
        quote_path(&env.command_dir),
        shell_quote(&env.command_id),
        shell_quote(&env.command_name),
        quote_path(&env.application_dir),
        shell_quote(&env.job_id),
        shell_quote(&env.job_name),
        shell_quote(&env.job_memory.to_string()),
    ];
    for (name, value) in GENIE_VARIABLES.iter().zip(values) {
        let _ = writeln!(script, "export {}={}", name, value);
    }
    script.push('\n');

    for setup in &env.setup_files {
        let quoted = quote_path(setup);
        let _ = writeln!(script, "if [ -f {q} ]; then\n    source {q}\nfi", q = quoted);
    }
    script.push('\n');

    let _ = writeln!(
        script,
        "env | sort > {}\n",
        quote_path(&env.job_dir.join(crate::workdir::ENV_LOG_FILE))
    );

    // Backgrounded so `wait` returns as soon as SIGTERM arrives.
    let _ = write!(
        script,
        "(\n\
         set +o nounset +o pipefail\n\
         {invocation}\n\
         ) > {stdout} 2> {stderr} &\n\
         JOB_PID=$!\n\
         wait \"${{JOB_PID}}\" && JOB_EXIT_CODE=0 || JOB_EXIT_CODE=$?\n\
         write_done_file \"${{JOB_EXIT_CODE}}\"\n\
         exit \"${{JOB_EXIT_CODE}}\"\n",
        invocation = env.invocation.trim_end(),
        stdout = quote_path(&env.job_dir.join(crate::workdir::STDOUT_FILE)),
        stderr = quote_path(&env.job_dir.join(crate::workdir::STDERR_FILE)),
    );

    script
}
