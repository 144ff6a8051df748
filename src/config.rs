use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::adapters::runpod::WHISPERX_RUNPOD;
use crate::files::cache::{DEFAULT_RETENTION, DEFAULT_SWEEP_INTERVAL};
use crate::schedule::publish::events::{DEFAULT_BUS, DEFAULT_SOURCE};
use crate::schedule::publish::DEFAULT_PUBLISH_TIMEOUT;
use crate::schedule::queue::QueueConfig;
use crate::{ASR_SQLITE_PATH, ASR_UPLOAD_DIR};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Runtime settings. Every field can be set from the environment or `.env`.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub upload_dir: PathBuf,
    pub workers: usize,
    pub shutdown_timeout: Duration,
    pub job_timeout: Option<Duration>,
    pub cache_retention: Duration,
    pub cache_sweep_interval: Duration,
    pub publish_timeout: Duration,
    /// Root for local object storage. Unset means S3 configured from `AWS_*`.
    pub storage_root: Option<PathBuf>,
    pub event_bus: String,
    pub event_source: String,
    pub event_endpoint: Option<String>,
    pub runpod_endpoint: Option<String>,
    pub runpod_api_key: Option<String>,
    /// Public base url of this service. When set, RunPod fetches audio from us instead of inline base64.
    pub callback_base_url: Option<String>,
    pub modal_function_url: Option<String>,
    pub modal_token: Option<String>,
    pub local_whisperx_url: Option<String>,
    pub whisper_model_path: Option<PathBuf>,
    pub default_model: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).or_else(|_| dotenv::var(key)).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // 空字符串视为未设置
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = QueueConfig::default();

        let bind_addr = match get("ASR_BIND_ADDR") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "ASR_BIND_ADDR", value })?,
            None => SocketAddr::from(([127, 0, 0, 1], 7200)),
        };

        let workers = parse(get("ASR_WORKERS"), "ASR_WORKERS")?.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(ConfigError::Invalid {
                key: "ASR_WORKERS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            database_url: get("ASR_SQLITE_PATH").unwrap_or_else(|| ASR_SQLITE_PATH.to_string()),
            upload_dir: PathBuf::from(get("ASR_UPLOAD_DIR").unwrap_or_else(|| ASR_UPLOAD_DIR.to_string())),
            workers,
            shutdown_timeout: secs(get("ASR_SHUTDOWN_TIMEOUT_SECS"), "ASR_SHUTDOWN_TIMEOUT_SECS")?
                .unwrap_or(defaults.shutdown_timeout),
            job_timeout: secs(get("ASR_JOB_TIMEOUT_SECS"), "ASR_JOB_TIMEOUT_SECS")?.filter(|d| !d.is_zero()),
            cache_retention: secs(get("ASR_CACHE_RETENTION_SECS"), "ASR_CACHE_RETENTION_SECS")?
                .unwrap_or(DEFAULT_RETENTION),
            cache_sweep_interval: secs(get("ASR_CACHE_SWEEP_SECS"), "ASR_CACHE_SWEEP_SECS")?
                .unwrap_or(DEFAULT_SWEEP_INTERVAL),
            publish_timeout: secs(get("ASR_PUBLISH_TIMEOUT_SECS"), "ASR_PUBLISH_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_PUBLISH_TIMEOUT),
            storage_root: get("ASR_STORAGE_ROOT").map(PathBuf::from),
            event_bus: get("EVENT_BUS_NAME").unwrap_or_else(|| DEFAULT_BUS.to_string()),
            event_source: get("EVENT_SOURCE").unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            event_endpoint: get("EVENT_ENDPOINT"),
            runpod_endpoint: get("RUNPOD_ENDPOINT"),
            runpod_api_key: get("RUNPOD_API_KEY"),
            callback_base_url: get("ASR_CALLBACK_BASE_URL").map(|u| u.trim_end_matches('/').to_string()),
            modal_function_url: get("MODAL_FUNCTION_URL"),
            modal_token: get("MODAL_TOKEN"),
            local_whisperx_url: get("LOCAL_WHISPERX_URL"),
            whisper_model_path: get("WHISPER_MODEL_PATH").map(PathBuf::from),
            default_model: get("DEFAULT_MODEL_ID").unwrap_or_else(|| WHISPERX_RUNPOD.to_string()),
        })
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            workers: self.workers,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

fn parse<T: std::str::FromStr>(value: Option<String>, key: &'static str) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| v.trim().parse().map_err(|_| ConfigError::Invalid { key, value: v }))
        .transpose()
}

fn secs(value: Option<String>, key: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(value, key)?.map(Duration::from_secs))
}
