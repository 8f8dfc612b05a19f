use std::time::Duration;

use crate::config::PeerConfig;
use crate::job::JobRecord;

/// Marks a request relayed by another node. Carries the relaying host.
pub const FORWARDED_FROM_HEADER: &str = "Genie-Forwarded-From";

const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

/// Relays requests for jobs this node doesn't know to its peers.
#[derive(Debug, Clone)]
pub struct PeerForwarder {
    client: reqwest::Client,
    host_name: String,
    peers: Vec<PeerConfig>,
}

impl PeerForwarder {
    pub fn new(host_name: impl Into<String>, peers: Vec<PeerConfig>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FORWARD_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            host_name: host_name.into(),
            peers,
        }
    }

    pub fn has_peers(&self) -> bool {
        !self.peers.is_empty()
    }

    /// Ask each peer in turn to kill the job. Returns the record from the
    /// first peer that owns it.
    pub async fn kill_job(&self, job_id: &str, reason: Option<&str>) -> Option<JobRecord> {
        for peer in &self.peers {
            let url = format!("http://{}/api/v3/jobs/{}", peer.addr, job_id);
            let mut request = self
                .client
                .delete(&url)
                .header(FORWARDED_FROM_HEADER, &self.host_name);
            if let Some(reason) = reason {
                request = request.query(&[("reason", reason)]);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<JobRecord>().await {
                        Ok(record) => {
                            tracing::info!(job_id, peer = %peer.addr, "Kill forwarded to peer");
                            return Some(record);
                        }
                        Err(e) => {
                            tracing::warn!(job_id, peer = %peer.addr, error = %e, "Bad response from peer")
                        }
                    }
                }
                Ok(response) => {
                    tracing::debug!(job_id, peer = %peer.addr, status = %response.status(), "Peer declined kill");
                }
                Err(e) => {
                    tracing::warn!(job_id, peer = %peer.addr, error = %e, "Failed to reach peer");
                }
            }
        }
        None
    }
}
