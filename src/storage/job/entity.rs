use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transcription_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub title: Option<String>,
    pub audio_path: Option<String>,
    pub audio_uri: Option<String>,
    pub model_id: String,
    #[sea_orm(column_type = "Text")]
    pub parameters: String, // JSON object
    pub diarization: bool,
    pub status: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub transcript: Option<String>, // 序列化后的 TranscriptResult
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub output_bucket: Option<String>,
    #[sea_orm(column_type = "Text")]
    pub tags: String, // JSON array of {Key, Value}
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
