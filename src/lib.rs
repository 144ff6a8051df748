pub mod adapters;
pub mod asr;
pub mod audio;
pub mod config;
pub mod files;
pub mod schedule;
pub mod storage;
pub mod utils;
pub mod web;

#[cfg(test)]
mod test_support;

use std::path::Path;
use std::sync::Arc;

use adapters::AdapterRegistry;
use files::FileService;
use schedule::{Submission, TaskQueue};
use storage::job::JobRepository;
use storage::profile::ProfileRepository;

pub const ASR_SQLITE_PATH: &str = "sqlite://./asr_data/database/storage.db?mode=rwc";
pub const ASR_UPLOAD_DIR: &str = "./asr_data/uploads/";

/// Shared handles for the HTTP layer.
pub struct AppContext {
    pub jobs: Arc<dyn JobRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub registry: Arc<AdapterRegistry>,
    pub queue: Arc<TaskQueue>,
    pub submission: Arc<Submission>,
    pub files: Arc<FileService>,
}

/// Loads `.env` and makes sure the database and upload directories exist.
pub fn init_env(config: &config::Config) -> std::io::Result<()> {
    dotenv::dotenv().ok();

    // 确保数据目录存在
    if let Some(db_path) = config.database_url.strip_prefix("sqlite://") {
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        if let Some(dir) = Path::new(db_path).parent() {
            std::fs::create_dir_all(dir)?;
        }
    }
    std::fs::create_dir_all(&config.upload_dir)
}
