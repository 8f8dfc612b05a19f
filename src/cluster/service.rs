use std::sync::Arc;

use crate::cluster::model::{Cluster, ClusterCriteria};
use crate::cluster::registry::ClusterRegistry;
use crate::error::{GenieError, Result};

/// Resolves a job's ordered cluster criteria against the registry.
#[derive(Clone)]
pub struct ClusterService {
    registry: Arc<dyn ClusterRegistry>,
}

impl ClusterService {
    pub fn new(registry: Arc<dyn ClusterRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<dyn ClusterRegistry> {
        &self.registry
    }

    /// Return the clusters matching the first alternative that matches any.
    ///
    /// Resolution is first-match: a later alternative is never consulted once
    /// an earlier one produced a cluster, even if it would produce more.
    pub async fn resolve_clusters(&self, alternatives: &[ClusterCriteria]) -> Result<Vec<Cluster>> {
        if alternatives.is_empty() {
            return Err(GenieError::Precondition(
                "No cluster criteria supplied".to_string(),
            ));
        }
        if let Some(pos) = alternatives.iter().position(ClusterCriteria::is_empty) {
            return Err(GenieError::Precondition(format!(
                "Cluster criteria at position {} has no tags",
                pos
            )));
        }

        for (index, criteria) in alternatives.iter().enumerate() {
            let clusters = self.registry.find_clusters(criteria).await?;
            if !clusters.is_empty() {
                tracing::debug!(
                    criteria = %criteria,
                    index,
                    matched = clusters.len(),
                    "Cluster criteria matched"
                );
                return Ok(clusters);
            }
        }

        let tried: Vec<String> = alternatives.iter().map(ToString::to_string).collect();
        Err(GenieError::NoClusterFound(tried.join(" | ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::model::ClusterStatus;
    use crate::cluster::registry::InMemoryClusterRegistry;

    fn service() -> ClusterService {
        ClusterService::new(Arc::new(InMemoryClusterRegistry::new(vec![
            Cluster::new("adhoc-1", "adhoc-1", "local").with_tags(["sched:adhoc"]),
            Cluster::new("sla-1", "sla-1", "local").with_tags(["sched:sla", "type:batch"]),
            Cluster::new("sla-2", "sla-2", "local").with_tags(["sched:sla", "type:batch"]),
            Cluster::new("down", "down", "local")
                .with_tags(["sched:old"])
                .with_status(ClusterStatus::OutOfService),
        ])))
    }

    #[tokio::test]
    async fn first_matching_alternative_wins() {
        // The second alternative matches two clusters, the first only one.
        let alternatives = vec![
            ClusterCriteria::new(["sched:adhoc"]),
            ClusterCriteria::new(["sched:sla"]),
        ];
        let clusters = service().resolve_clusters(&alternatives).await.unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].id, "adhoc-1");
    }

    #[tokio::test]
    async fn falls_through_to_later_alternative() {
        let alternatives = vec![
            ClusterCriteria::new(["sched:nothing"]),
            ClusterCriteria::new(["sched:old"]),
            ClusterCriteria::new(["type:batch"]),
        ];
        let clusters = service().resolve_clusters(&alternatives).await.unwrap();
        let ids: Vec<&str> = clusters.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["sla-1", "sla-2"]);
    }

    #[tokio::test]
    async fn no_match_is_an_error() {
        let alternatives = vec![
            ClusterCriteria::new(["sched:nothing"]),
            ClusterCriteria::new(["sched:old"]),
        ];
        let err = service().resolve_clusters(&alternatives).await.unwrap_err();
        assert!(matches!(err, GenieError::NoClusterFound(_)));
    }

    #[tokio::test]
    async fn empty_criteria_rejected() {
        let err = service().resolve_clusters(&[]).await.unwrap_err();
        assert!(matches!(err, GenieError::Precondition(_)));

        let alternatives = vec![
            ClusterCriteria::new(["sched:adhoc"]),
            ClusterCriteria::new(Vec::<String>::new()),
        ];
        let err = service().resolve_clusters(&alternatives).await.unwrap_err();
        assert!(matches!(err, GenieError::Precondition(_)));
    }
}
