use std::str::FromStr;

use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Schema, SqlxSqliteConnector};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

pub mod job;
pub mod profile;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound(_))
    }
}

impl From<DbErr> for RepositoryError {
    fn from(error: DbErr) -> Self {
        RepositoryError::Database(error.to_string())
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        RepositoryError::Database(error.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(error: serde_json::Error) -> Self {
        RepositoryError::Serialization(error.to_string())
    }
}

/// Opens (creating when missing) the SQLite database and makes sure every table exists.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, RepositoryError> {
    info!("Opening SQLite database at {}", database_url);
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    let db = SqlxSqliteConnector::from_sqlx_sqlite_pool(pool);
    create_schema(&db).await?;
    Ok(db)
}

async fn create_schema(db: &DatabaseConnection) -> Result<(), RepositoryError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut jobs = schema.create_table_from_entity(job::entity::Entity);
    jobs.if_not_exists();
    db.execute(backend.build(&jobs)).await?;

    let mut profiles = schema.create_table_from_entity(profile::entity::Entity);
    profiles.if_not_exists();
    db.execute(backend.build(&profiles)).await?;

    Ok(())
}
