use async_trait::async_trait;

use crate::schedule::types::{Job, JobStatus};
use crate::storage::RepositoryError;

pub mod entity;
pub mod mapping;
pub mod memory;
pub mod sqlite;

pub use memory::InMemoryJobRepository;
pub use sqlite::SqliteJobRepository;

/// Persistence contract for jobs. The repository is the only writer of job state.
#[async_trait]
pub trait JobRepository: Send + Sync + 'static {
    async fn create(&self, job: &Job) -> Result<(), RepositoryError>;
    async fn update(&self, job: &Job) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, job_id: &str) -> Result<Job, RepositoryError>;
    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, RepositoryError>;
}

#[cfg(test)]
mod tests;
