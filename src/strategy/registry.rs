use std::collections::HashMap;
use std::sync::Arc;

use crate::cluster::{ClusterLoadBalancer, ClusterService};
use crate::error::{GenieError, Result};
use crate::job::Job;
use crate::strategy::{docker, local, Dispatch, DockerStrategy, ExecutionStrategy, LocalStrategy, StrategyContext};

pub type StrategyFactory =
    Arc<dyn Fn(&StrategyContext) -> Box<dyn ExecutionStrategy> + Send + Sync>;

/// Strategy implementations known to this build, by name.
#[derive(Clone, Default)]
pub struct StrategyCatalogue {
    factories: HashMap<String, StrategyFactory>,
}

impl StrategyCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `local` and `docker` strategies.
    pub fn builtin() -> Self {
        Self::new()
            .with(local::NAME, |ctx| Box::new(LocalStrategy::new(ctx.clone())))
            .with(docker::NAME, |ctx| Box::new(DockerStrategy::new(ctx.clone())))
    }

    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&StrategyContext) -> Box<dyn ExecutionStrategy> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn get(&self, name: &str) -> Option<StrategyFactory> {
        self.factories.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for StrategyCatalogue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyCatalogue")
            .field("names", &self.names())
            .finish()
    }
}

/// Picks the cluster for a job and the strategy that runs it there.
pub struct ExecutionStrategyRegistry {
    clusters: ClusterService,
    balancer: Arc<dyn ClusterLoadBalancer>,
    bindings: HashMap<String, (String, StrategyFactory)>,
    context: StrategyContext,
}

impl ExecutionStrategyRegistry {
    /// Resolve every cluster type binding against the catalogue up front.
    /// A binding naming an unknown strategy fails here, not per job.
    pub fn new(
        clusters: ClusterService,
        balancer: Arc<dyn ClusterLoadBalancer>,
        bindings: &HashMap<String, String>,
        catalogue: &StrategyCatalogue,
        context: StrategyContext,
    ) -> Result<Self> {
        let mut resolved = HashMap::with_capacity(bindings.len());
        for (cluster_type, name) in bindings {
            let factory = catalogue.get(name).ok_or_else(|| {
                GenieError::InvalidStrategyBinding(format!(
                    "cluster type '{}' is bound to unknown strategy '{}' (known: {})",
                    cluster_type,
                    name,
                    catalogue.names().join(", ")
                ))
            })?;
            tracing::info!(cluster_type = %cluster_type, strategy = %name, "Bound execution strategy");
            resolved.insert(cluster_type.clone(), (name.clone(), factory));
        }

        Ok(Self {
            clusters,
            balancer,
            bindings: resolved,
            context,
        })
    }

    pub fn clusters(&self) -> &ClusterService {
        &self.clusters
    }

    /// Strategy name bound to a cluster type.
    pub fn binding(&self, cluster_type: &str) -> Option<&str> {
        self.bindings.get(cluster_type).map(|(name, _)| name.as_str())
    }

    /// Choose a cluster for `job` and return an initialised strategy for it.
    pub async fn get_execution_strategy(&self, job: &Job) -> Result<Dispatch> {
        if job.id.trim().is_empty() {
            return Err(GenieError::Precondition("Job id is required".to_string()));
        }

        let candidates = self.clusters.resolve_clusters(&job.cluster_criterias).await?;
        let cluster = self.balancer.select_cluster(&candidates).await?;

        let (name, factory) = self
            .bindings
            .get(&cluster.cluster_type)
            .ok_or_else(|| GenieError::UnknownClusterType(cluster.cluster_type.clone()))?;

        let mut strategy = factory(&self.context);
        strategy.init(job, &cluster)?;
        tracing::info!(
            job_id = %job.id,
            cluster_id = %cluster.id,
            cluster_type = %cluster.cluster_type,
            strategy = %name,
            "Dispatched job"
        );

        Ok(Dispatch { strategy, cluster })
    }
}
