use async_trait::async_trait;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, SqlErr,
};
use tracing::{debug, info};

use super::entity::{ActiveModel as JobActiveModel, Column, Entity as JobEntity};
use super::JobRepository;
use crate::schedule::types::{Job, JobStatus};
use crate::storage::RepositoryError;

pub struct SqliteJobRepository {
    db: DatabaseConnection,
}

impl SqliteJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        info!("Initializing SQLite job repository");
        Self { db }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn create(&self, job: &Job) -> Result<(), RepositoryError> {
        let model = JobActiveModel::try_from(job)?;
        JobEntity::insert(model)
            .exec_without_returning(&self.db)
            .await
            .map_err(|e| match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => {
                    RepositoryError::AlreadyExists(job.id.clone())
                }
                _ => e.into(),
            })?;
        debug!(job_id = %job.id, status = %job.status, "Job created");
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<(), RepositoryError> {
        let model = JobActiveModel::try_from(job)?;
        match JobEntity::update(model).exec(&self.db).await {
            Ok(_) => {
                debug!(job_id = %job.id, status = %job.status, "Job updated");
                Ok(())
            }
            Err(DbErr::RecordNotUpdated) => Err(RepositoryError::NotFound(job.id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, job_id: &str) -> Result<Job, RepositoryError> {
        let model = JobEntity::find_by_id(job_id.to_string())
            .one(&self.db)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(job_id.to_string()))?;
        Job::try_from(model)
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, RepositoryError> {
        JobEntity::find()
            .filter(Column::Status.eq(status.as_str()))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }
}
