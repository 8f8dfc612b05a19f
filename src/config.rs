use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::GenieError;
use crate::kill::KillPlatform;
use crate::script::ScriptSettings;

/// Configuration for the `docker` execution strategy.
///
/// Jobs run in sandboxed containers with:
/// - Network isolation (disabled by default)
/// - Dropped capabilities
/// - Read-only root filesystem
/// - Memory and CPU limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Docker image to run jobs in
    pub image: String,
    pub network_disabled: bool,
    /// Memory limit (e.g., "256m"); a job's own memory request takes precedence
    pub memory_limit: Option<String>,
    /// CPU limit (e.g., "0.5" for half a CPU)
    pub cpu_limit: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "alpine:latest".to_string(),
            network_disabled: true,
            memory_limit: Some("256m".to_string()),
            cpu_limit: Some("0.5".to_string()),
        }
    }
}

/// Bounds of the kill escalation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillConfig {
    /// Ticks the script waits for the process group to drain before SIGKILL
    pub max_ticks: u32,
    pub tick_interval_ms: u64,
    /// Overrides the platform's child process threshold when set
    pub child_process_threshold: Option<u32>,
}

impl Default for KillConfig {
    fn default() -> Self {
        Self {
            max_ticks: 30,
            tick_interval_ms: 1000,
            child_process_threshold: None,
        }
    }
}

impl KillConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// The platform probe with the configured threshold applied.
    pub fn platform(&self) -> KillPlatform {
        let platform = KillPlatform::probe();
        match self.child_process_threshold {
            Some(threshold) => platform.with_threshold(threshold),
            None => platform,
        }
    }

    pub fn script_settings(&self) -> ScriptSettings {
        ScriptSettings {
            platform: self.platform(),
            max_ticks: self.max_ticks,
            tick_interval: self.tick_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancerKind {
    #[default]
    LeastLoaded,
    Random,
}

impl FromStr for LoadBalancerKind {
    type Err = GenieError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "least-loaded" => Ok(LoadBalancerKind::LeastLoaded),
            "random" => Ok(LoadBalancerKind::Random),
            other => Err(GenieError::Precondition(format!(
                "Unknown load balancer: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Host name recorded on executions and used in `Location` headers
    pub host_name: String,
    pub listen_addr: SocketAddr,
    pub jobs_dir: PathBuf,
    pub peers: Vec<PeerConfig>,
    /// Cluster type to execution strategy name
    pub strategy_bindings: HashMap<String, String>,
    pub load_balancer: LoadBalancerKind,
    pub monitor_interval_ms: u64,
    pub max_jobs: usize,
    pub sandbox: SandboxConfig,
    pub kill: KillConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub addr: String, // host:port format, supports both IP and hostnames
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            jobs_dir: std::env::temp_dir().join("genie").join("jobs"),
            peers: Vec::new(),
            strategy_bindings: HashMap::new(),
            load_balancer: LoadBalancerKind::default(),
            monitor_interval_ms: 500,
            max_jobs: 10_000,
            sandbox: SandboxConfig::default(),
            kill: KillConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(host_name: impl Into<String>, listen_addr: SocketAddr, jobs_dir: PathBuf) -> Self {
        Self {
            host_name: host_name.into(),
            listen_addr,
            jobs_dir,
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, addr: String) -> Self {
        self.peers.push(PeerConfig { addr });
        self
    }

    pub fn with_strategy(mut self, cluster_type: impl Into<String>, strategy: impl Into<String>) -> Self {
        self.strategy_bindings
            .insert(cluster_type.into(), strategy.into());
        self
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

/// Parse a `TYPE=STRATEGY` binding from the command line.
pub fn parse_strategy_binding(value: &str) -> Result<(String, String), GenieError> {
    match value.split_once('=') {
        Some((cluster_type, strategy))
            if !cluster_type.trim().is_empty() && !strategy.trim().is_empty() =>
        {
            Ok((cluster_type.trim().to_string(), strategy.trim().to_string()))
        }
        _ => Err(GenieError::InvalidStrategyBinding(format!(
            "expected TYPE=STRATEGY, got '{}'",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kill::KillFlag;

    #[test]
    fn sandbox_config_default() {
        let cfg = SandboxConfig::default();
        assert_eq!(cfg.image, "alpine:latest");
        assert!(cfg.network_disabled);
        assert_eq!(cfg.memory_limit.as_deref(), Some("256m"));
        assert_eq!(cfg.cpu_limit.as_deref(), Some("0.5"));
    }

    #[test]
    fn kill_config_default() {
        let cfg = KillConfig::default();
        assert_eq!(cfg.max_ticks, 30);
        assert_eq!(cfg.tick_interval(), Duration::from_secs(1));
        assert_eq!(cfg.platform(), KillPlatform::probe());
    }

    #[test]
    fn kill_threshold_override() {
        let cfg = KillConfig {
            child_process_threshold: Some(7),
            ..Default::default()
        };
        let settings = cfg.script_settings();
        assert_eq!(settings.platform.child_process_threshold, 7);
        assert_eq!(settings.platform.kill_flag, KillPlatform::probe().kill_flag);
        assert_eq!(settings.max_ticks, 30);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn kill_platform_on_linux() {
        let platform = KillConfig::default().platform();
        assert_eq!(platform.kill_flag, KillFlag::ProcessGroup);
        assert_eq!(platform.child_process_threshold, 3);
    }

    #[test]
    fn node_config_default() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.host_name, "localhost");
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8080");
        assert!(cfg.peers.is_empty());
        assert!(cfg.strategy_bindings.is_empty());
        assert_eq!(cfg.load_balancer, LoadBalancerKind::LeastLoaded);
        assert_eq!(cfg.monitor_interval(), Duration::from_millis(500));
    }

    #[test]
    fn node_config_builders() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = NodeConfig::new("genie-1", addr, PathBuf::from("/var/genie"))
            .with_peer("10.0.0.2:9000".to_string())
            .with_peer("genie-3.example.com:9000".to_string())
            .with_strategy("yarn", "local");

        assert_eq!(cfg.host_name, "genie-1");
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.jobs_dir, PathBuf::from("/var/genie"));
        assert_eq!(cfg.peers.len(), 2);
        assert_eq!(cfg.peers[1].addr, "genie-3.example.com:9000");
        assert_eq!(cfg.strategy_bindings.get("yarn").map(String::as_str), Some("local"));
    }

    #[test]
    fn load_balancer_from_str() {
        assert_eq!(
            "least-loaded".parse::<LoadBalancerKind>().unwrap(),
            LoadBalancerKind::LeastLoaded
        );
        assert_eq!("random".parse::<LoadBalancerKind>().unwrap(), LoadBalancerKind::Random);
        assert!("round-robin".parse::<LoadBalancerKind>().is_err());
    }

    #[test]
    fn strategy_binding_parsing() {
        assert_eq!(
            parse_strategy_binding("yarn=docker").unwrap(),
            ("yarn".to_string(), "docker".to_string())
        );
        assert!(matches!(
            parse_strategy_binding("yarn"),
            Err(GenieError::InvalidStrategyBinding(_))
        ));
        assert!(parse_strategy_binding("=local").is_err());
    }
}
