use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cluster::model::{Cluster, ClusterCriteria, ClusterStatus};
use crate::error::{GenieError, Result};

/// Source of truth for the clusters jobs can run on.
///
/// Results are returned in registry order, which callers treat as priority.
#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    /// Usable clusters whose tags are a superset of `criteria`.
    async fn find_clusters(&self, criteria: &ClusterCriteria) -> Result<Vec<Cluster>>;

    async fn all_clusters(&self) -> Result<Vec<Cluster>>;
}

/// Registry held in memory, optionally seeded from a JSON file.
#[derive(Debug, Default)]
pub struct InMemoryClusterRegistry {
    clusters: RwLock<Vec<Cluster>>,
}

impl InMemoryClusterRegistry {
    pub fn new(clusters: Vec<Cluster>) -> Self {
        Self {
            clusters: RwLock::new(clusters),
        }
    }

    /// Load clusters from a JSON array file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read(path).await?;
        let clusters: Vec<Cluster> = serde_json::from_slice(&contents)?;
        tracing::info!(path = %path.display(), count = clusters.len(), "Loaded clusters");
        Ok(Self::new(clusters))
    }

    /// Add a cluster, replacing any existing cluster with the same id.
    pub async fn register(&self, cluster: Cluster) {
        let mut clusters = self.clusters.write().await;
        if let Some(existing) = clusters.iter_mut().find(|c| c.id == cluster.id) {
            *existing = cluster;
        } else {
            clusters.push(cluster);
        }
    }

    pub async fn set_status(&self, cluster_id: &str, status: ClusterStatus) -> Result<()> {
        let mut clusters = self.clusters.write().await;
        let cluster = clusters
            .iter_mut()
            .find(|c| c.id == cluster_id)
            .ok_or_else(|| GenieError::Internal(format!("Unknown cluster {}", cluster_id)))?;
        cluster.status = status;
        Ok(())
    }
}

#[async_trait]
impl ClusterRegistry for InMemoryClusterRegistry {
    async fn find_clusters(&self, criteria: &ClusterCriteria) -> Result<Vec<Cluster>> {
        let clusters = self.clusters.read().await;
        Ok(clusters
            .iter()
            .filter(|c| c.matches(criteria))
            .cloned()
            .collect())
    }

    async fn all_clusters(&self) -> Result<Vec<Cluster>> {
        Ok(self.clusters.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn find_clusters_keeps_registry_order() {
        let registry = InMemoryClusterRegistry::new(vec![
            Cluster::new("b", "b", "local").with_tags(["x"]),
            Cluster::new("a", "a", "local").with_tags(["x"]),
            Cluster::new("c", "c", "local").with_tags(["y"]),
        ]);

        let found = registry
            .find_clusters(&ClusterCriteria::new(["x"]))
            .await
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn register_replaces_by_id() {
        let registry = InMemoryClusterRegistry::new(vec![Cluster::new("a", "old", "local")]);
        registry.register(Cluster::new("a", "new", "docker")).await;

        let all = registry.all_clusters().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "new");
        assert_eq!(all[0].cluster_type, "docker");
    }

    #[tokio::test]
    async fn set_status_hides_cluster_from_lookup() {
        let registry =
            InMemoryClusterRegistry::new(vec![Cluster::new("a", "a", "local").with_tags(["x"])]);
        registry
            .set_status("a", ClusterStatus::Terminated)
            .await
            .unwrap();

        let found = registry
            .find_clusters(&ClusterCriteria::new(["x"]))
            .await
            .unwrap();
        assert!(found.is_empty());
        assert!(registry.set_status("missing", ClusterStatus::Up).await.is_err());
    }

    #[tokio::test]
    async fn from_file_reads_json_array() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": "c1", "name": "one", "clusterType": "local", "status": "UP", "tags": ["t"]}}]"#
        )
        .unwrap();

        let registry = InMemoryClusterRegistry::from_file(file.path()).await.unwrap();
        let all = registry.all_clusters().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].tags.contains("t"));
    }
}
