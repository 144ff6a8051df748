use async_trait::async_trait;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};

use super::entity::{ActiveModel, Column, Entity as ProfileEntity, Model};
use super::{ProfileRepository, TranscriptionProfile};
use crate::storage::RepositoryError;

pub struct SqliteProfileRepository {
    db: DatabaseConnection,
}

impl SqliteProfileRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_profile(model: Model) -> Result<TranscriptionProfile, RepositoryError> {
    Ok(TranscriptionProfile {
        parameters: serde_json::from_str(&model.parameters)?,
        id: model.id,
        name: model.name,
        model_id: model.model_id,
        diarization: model.diarization,
        is_default: model.is_default,
        created_at: model.created_at,
    })
}

#[async_trait]
impl ProfileRepository for SqliteProfileRepository {
    async fn create(&self, profile: &TranscriptionProfile) -> Result<(), RepositoryError> {
        let model = ActiveModel {
            id: Set(profile.id.clone()),
            name: Set(profile.name.clone()),
            model_id: Set(profile.model_id.clone()),
            parameters: Set(serde_json::to_string(&profile.parameters)?),
            diarization: Set(profile.diarization),
            is_default: Set(profile.is_default),
            created_at: Set(profile.created_at),
        };
        ProfileEntity::insert(model)
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn find_default(&self) -> Result<TranscriptionProfile, RepositoryError> {
        let model = ProfileEntity::find()
            .filter(Column::IsDefault.eq(true))
            .order_by_asc(Column::CreatedAt)
            .one(&self.db)
            .await?
            .ok_or_else(|| RepositoryError::NotFound("default profile".to_string()))?;
        to_profile(model)
    }

    async fn list(&self, offset: u64, limit: u64) -> Result<(Vec<TranscriptionProfile>, u64), RepositoryError> {
        let total = ProfileEntity::find().count(&self.db).await?;
        let profiles = ProfileEntity::find()
            .order_by_asc(Column::CreatedAt)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_profile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((profiles, total))
    }
}
