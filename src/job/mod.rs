pub mod client_host;
pub mod execution;
pub mod model;
pub mod query;
pub mod store;

pub use client_host::resolve_client_host;
pub use execution::JobExecution;
pub use model::{CommandRef, Job, JobRequest, JobStatus, KILLED_EXIT_CODE};
pub use query::{JobQuery, OrderBy};
pub use store::{JobRecord, JobStore};
