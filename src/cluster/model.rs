use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    Up,
    OutOfService,
    Terminated,
}

impl ClusterStatus {
    /// Only clusters that are up may receive new jobs.
    pub fn is_usable(&self) -> bool {
        matches!(self, ClusterStatus::Up)
    }
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterStatus::Up => write!(f, "UP"),
            ClusterStatus::OutOfService => write!(f, "OUT_OF_SERVICE"),
            ClusterStatus::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// An execution cluster as known to the cluster registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub name: String,
    /// Selects the execution strategy through the configured bindings.
    pub cluster_type: String,
    pub status: ClusterStatus,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Cluster {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        cluster_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cluster_type: cluster_type.into(),
            status: ClusterStatus::Up,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_status(mut self, status: ClusterStatus) -> Self {
        self.status = status;
        self
    }

    /// True when the cluster is usable and carries every tag of `criteria`.
    pub fn matches(&self, criteria: &ClusterCriteria) -> bool {
        self.status.is_usable() && criteria.tags.is_subset(&self.tags)
    }
}

/// One alternative of a job's cluster criteria: a set of tags that a cluster
/// must all carry to be eligible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCriteria {
    pub tags: BTreeSet<String>,
}

impl ClusterCriteria {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl std::fmt::Display for ClusterCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        write!(f, "[{}]", tags.join(", "))
    }
}

/// Reference to the cluster a job was dispatched to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRef {
    pub id: String,
    pub name: String,
}

impl From<&Cluster> for ClusterRef {
    fn from(cluster: &Cluster) -> Self {
        Self {
            id: cluster.id.clone(),
            name: cluster.name.clone(),
        }
    }
}
