//! Cluster resolution and load balancing.
//!
//! A job declares an ordered list of [`ClusterCriteria`] alternatives. The
//! [`ClusterService`] walks them in order and returns the clusters matching the
//! first alternative that matches anything; a [`ClusterLoadBalancer`] then
//! narrows that set down to the one cluster the job is dispatched to.

pub mod balancer;
pub mod model;
pub mod registry;
pub mod service;

pub use balancer::{ClusterLoad, ClusterLoadBalancer, LeastLoadedBalancer, RandomBalancer};
pub use model::{Cluster, ClusterCriteria, ClusterRef, ClusterStatus};
pub use registry::{ClusterRegistry, InMemoryClusterRegistry};
pub use service::ClusterService;
