use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;

use crate::cluster::model::Cluster;
use crate::error::{GenieError, Result};

/// Picks one cluster out of the candidates produced by cluster resolution.
#[async_trait]
pub trait ClusterLoadBalancer: Send + Sync {
    /// Always returns a member of `candidates`; fails only when it is empty.
    async fn select_cluster(&self, candidates: &[Cluster]) -> Result<Cluster>;
}

/// Number of active jobs per cluster id.
#[derive(Debug, Default)]
pub struct ClusterLoad {
    active: RwLock<HashMap<String, usize>>,
}

impl ClusterLoad {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn job_started(&self, cluster_id: &str) {
        let mut active = self.active.write().await;
        *active.entry(cluster_id.to_string()).or_insert(0) += 1;
    }

    pub async fn job_finished(&self, cluster_id: &str) {
        let mut active = self.active.write().await;
        if let Some(count) = active.get_mut(cluster_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                active.remove(cluster_id);
            }
        }
    }

    pub async fn active_jobs(&self, cluster_id: &str) -> usize {
        self.active
            .read()
            .await
            .get(cluster_id)
            .copied()
            .unwrap_or(0)
    }
}

/// Selects the cluster running the fewest jobs; ties go to the earliest
/// candidate so registry priority is kept.
#[derive(Debug, Clone)]
pub struct LeastLoadedBalancer {
    load: Arc<ClusterLoad>,
}

impl LeastLoadedBalancer {
    pub fn new(load: Arc<ClusterLoad>) -> Self {
        Self { load }
    }
}

#[async_trait]
impl ClusterLoadBalancer for LeastLoadedBalancer {
    async fn select_cluster(&self, candidates: &[Cluster]) -> Result<Cluster> {
        let active = self.load.active.read().await;
        let cluster = candidates
            .iter()
            .min_by_key(|c| active.get(&c.id).copied().unwrap_or(0))
            .ok_or(GenieError::EmptyCandidateSet)?;

        tracing::debug!(cluster_id = %cluster.id, candidates = candidates.len(), "Selected least loaded cluster");
        Ok(cluster.clone())
    }
}

/// Selects a candidate uniformly at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBalancer;

#[async_trait]
impl ClusterLoadBalancer for RandomBalancer {
    async fn select_cluster(&self, candidates: &[Cluster]) -> Result<Cluster> {
        candidates
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(GenieError::EmptyCandidateSet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<Cluster> {
        vec![
            Cluster::new("a", "a", "local"),
            Cluster::new("b", "b", "local"),
            Cluster::new("c", "c", "local"),
        ]
    }

    #[tokio::test]
    async fn least_loaded_prefers_idle_cluster() {
        let load = Arc::new(ClusterLoad::new());
        load.job_started("a").await;
        load.job_started("b").await;
        load.job_started("b").await;

        let balancer = LeastLoadedBalancer::new(load);
        let selected = balancer.select_cluster(&candidates()).await.unwrap();
        assert_eq!(selected.id, "c");
    }

    #[tokio::test]
    async fn least_loaded_ties_go_to_first_candidate() {
        let balancer = LeastLoadedBalancer::new(Arc::new(ClusterLoad::new()));
        let selected = balancer.select_cluster(&candidates()).await.unwrap();
        assert_eq!(selected.id, "a");
    }

    #[tokio::test]
    async fn job_finished_releases_load() {
        let load = Arc::new(ClusterLoad::new());
        load.job_started("a").await;
        assert_eq!(load.active_jobs("a").await, 1);
        load.job_finished("a").await;
        load.job_finished("a").await;
        assert_eq!(load.active_jobs("a").await, 0);
    }

    #[tokio::test]
    async fn random_always_returns_a_candidate() {
        let candidates = candidates();
        for _ in 0..50 {
            let selected = RandomBalancer.select_cluster(&candidates).await.unwrap();
            assert!(candidates.contains(&selected));
        }
    }

    #[tokio::test]
    async fn empty_candidates_rejected() {
        let err = RandomBalancer.select_cluster(&[]).await.unwrap_err();
        assert!(matches!(err, GenieError::EmptyCandidateSet));

        let balancer = LeastLoadedBalancer::new(Arc::new(ClusterLoad::new()));
        let err = balancer.select_cluster(&[]).await.unwrap_err();
        assert!(matches!(err, GenieError::EmptyCandidateSet));
    }
}
