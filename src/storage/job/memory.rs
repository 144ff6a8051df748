use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::JobRepository;
use crate::schedule::types::{Job, JobStatus};
use crate::storage::RepositoryError;

/// Process-local repository. Also records every persisted status per job so
/// callers can check the path a job took through the state machine.
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<String, Job>>,
    history: RwLock<HashMap<String, Vec<JobStatus>>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted statuses of a job, oldest first.
    pub fn status_history(&self, job_id: &str) -> Vec<JobStatus> {
        self.history
            .read()
            .map(|history| history.get(job_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn record_status(&self, job: &Job) -> Result<(), RepositoryError> {
        let mut history = self
            .history
            .write()
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        let statuses = history.entry(job.id.clone()).or_default();
        if statuses.last() != Some(&job.status) {
            statuses.push(job.status);
        }
        Ok(())
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &Job) -> Result<(), RepositoryError> {
        {
            let mut jobs = self
                .jobs
                .write()
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
            if jobs.contains_key(&job.id) {
                return Err(RepositoryError::AlreadyExists(job.id.clone()));
            }
            jobs.insert(job.id.clone(), job.clone());
        }
        self.record_status(job)
    }

    async fn update(&self, job: &Job) -> Result<(), RepositoryError> {
        {
            let mut jobs = self
                .jobs
                .write()
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
            match jobs.get_mut(&job.id) {
                Some(stored) => *stored = job.clone(),
                None => return Err(RepositoryError::NotFound(job.id.clone())),
            }
        }
        self.record_status(job)
    }

    async fn find_by_id(&self, job_id: &str) -> Result<Job, RepositoryError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(job_id.to_string()))
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, RepositoryError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        let mut matching: Vec<Job> = jobs.values().filter(|j| j.status == status).cloned().collect();
        matching.sort_by_key(|j| j.created_at);
        Ok(matching)
    }
}
