use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::types::Parameters;
use crate::storage::RepositoryError;

pub mod entity;
pub mod sqlite;

pub use sqlite::SqliteProfileRepository;

/// A named model + parameter preset that submissions fall back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionProfile {
    pub id: String,
    pub name: String,
    pub model_id: String,
    pub parameters: Parameters,
    pub diarization: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl TranscriptionProfile {
    pub fn new(name: impl Into<String>, model_id: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            model_id: model_id.into(),
            parameters,
            diarization: false,
            is_default: false,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ProfileRepository: Send + Sync + 'static {
    async fn create(&self, profile: &TranscriptionProfile) -> Result<(), RepositoryError>;
    async fn find_default(&self) -> Result<TranscriptionProfile, RepositoryError>;
    /// Profiles ordered by creation time, plus the total count.
    async fn list(&self, offset: u64, limit: u64) -> Result<(Vec<TranscriptionProfile>, u64), RepositoryError>;
}

/// Resolves the profile a submission should use: the default one, else the first listed.
pub async fn default_or_first(
    repo: &dyn ProfileRepository,
) -> Result<Option<TranscriptionProfile>, RepositoryError> {
    match repo.find_default().await {
        Ok(profile) => return Ok(Some(profile)),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    let (profiles, _) = repo.list(0, 1).await?;
    Ok(profiles.into_iter().next())
}

#[derive(Default)]
pub struct InMemoryProfileRepository {
    profiles: RwLock<Vec<TranscriptionProfile>>,
}

impl InMemoryProfileRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn create(&self, profile: &TranscriptionProfile) -> Result<(), RepositoryError> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        if profiles.iter().any(|p| p.id == profile.id) {
            return Err(RepositoryError::AlreadyExists(profile.id.clone()));
        }
        profiles.push(profile.clone());
        Ok(())
    }

    async fn find_default(&self) -> Result<TranscriptionProfile, RepositoryError> {
        let profiles = self
            .profiles
            .read()
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        profiles
            .iter()
            .find(|p| p.is_default)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound("default profile".to_string()))
    }

    async fn list(&self, offset: u64, limit: u64) -> Result<(Vec<TranscriptionProfile>, u64), RepositoryError> {
        let profiles = self
            .profiles
            .read()
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        let page = profiles
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, profiles.len() as u64))
    }
}
