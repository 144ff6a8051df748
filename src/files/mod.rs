use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub mod cache;
pub mod object_storage;

pub use cache::DownloadCache;
pub use object_storage::{BucketStorage, ObjectStorage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid audio reference: {0}")]
    InvalidReference(String),
    #[error("audio file does not exist: {0}")]
    Missing(PathBuf),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("download of {url} failed with status {status}")]
    Http { url: String, status: u16 },
    #[error("download failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a job's audio lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    Local(PathBuf),
    ObjectStorage { bucket: String, key: String },
    Http(String),
}

impl AudioSource {
    pub fn parse(reference: &str) -> Result<Self, ResolveError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ResolveError::InvalidReference("empty reference".to_string()));
        }

        if let Some(rest) = reference.strip_prefix("s3://") {
            return match rest.split_once('/') {
                Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() && !key.ends_with('/') => {
                    Ok(AudioSource::ObjectStorage {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    })
                }
                _ => Err(ResolveError::InvalidReference(reference.to_string())),
            };
        }
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(AudioSource::Http(reference.to_string()));
        }
        let path = reference.strip_prefix("file://").unwrap_or(reference);
        Ok(AudioSource::Local(PathBuf::from(path)))
    }

    /// File name the download is stored under.
    fn file_name(&self) -> Result<String, ResolveError> {
        let name = match self {
            AudioSource::Local(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            AudioSource::ObjectStorage { key, .. } => key.rsplit('/').next().map(str::to_string),
            AudioSource::Http(url) => reqwest::Url::parse(url)
                .ok()
                .and_then(|u| u.path_segments().and_then(|mut s| s.next_back().map(str::to_string))),
        };
        match name {
            Some(name) if !name.is_empty() && name != "." && name != ".." => Ok(name),
            _ => Err(ResolveError::InvalidReference(format!("{:?} has no file name", self))),
        }
    }
}

/// Turns audio references into local files, downloading remote ones into the upload directory.
pub struct FileService {
    upload_dir: PathBuf,
    storage: Arc<dyn ObjectStorage>,
    http: reqwest::Client,
    cache: Arc<DownloadCache>,
    // 同一目标文件的并发下载串行化
    fetch_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileService {
    pub fn new(upload_dir: impl Into<PathBuf>, storage: Arc<dyn ObjectStorage>, cache: Arc<DownloadCache>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            storage,
            http: reqwest::Client::new(),
            cache,
            fetch_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn cache(&self) -> &Arc<DownloadCache> {
        &self.cache
    }

    /// Resolves `reference` to a readable local path.
    pub async fn resolve(&self, reference: &str) -> Result<PathBuf, ResolveError> {
        let source = AudioSource::parse(reference)?;
        if let AudioSource::Local(path) = source {
            if !tokio::fs::try_exists(&path).await? {
                return Err(ResolveError::Missing(path));
            }
            return Ok(path);
        }

        let target = self.upload_dir.join(source.file_name()?);
        let lock = self.fetch_lock(&target);
        let _guard = lock.lock().await;

        if tokio::fs::try_exists(&target).await? {
            debug!("Cache hit for {} at {:?}", reference, target);
            // 命中也刷新时间，避免正在使用的文件被清理
            self.cache.record(&target);
            return Ok(target);
        }

        tokio::fs::create_dir_all(&self.upload_dir).await?;
        info!("Downloading {} to {:?}", reference, target);
        match &source {
            AudioSource::ObjectStorage { bucket, key } => self.fetch_object(bucket, key, &target).await?,
            AudioSource::Http(url) => self.fetch_http(url, &target).await?,
            AudioSource::Local(_) => {}
        }
        self.cache.record(&target);
        Ok(target)
    }

    fn fetch_lock(&self, target: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.fetch_locks.lock().unwrap_or_else(|e| e.into_inner());
        // 只保留仍有人持有的锁
        locks.retain(|_, l| Arc::strong_count(l) > 1);
        locks.entry(target.to_path_buf()).or_default().clone()
    }

    /// Temp file in the upload dir, renamed onto `target` once complete.
    fn temp_file(&self) -> Result<(tokio::fs::File, tempfile::TempPath), ResolveError> {
        let (file, path) = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.upload_dir)?
            .into_parts();
        Ok((tokio::fs::File::from_std(file), path))
    }

    async fn fetch_object(&self, bucket: &str, key: &str, target: &Path) -> Result<(), ResolveError> {
        let mut stream = self.storage.get_object(bucket, key).await?;
        let (mut file, temp_path) = self.temp_file()?;
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);
        temp_path.persist(target).map_err(|e| ResolveError::Io(e.error))?;
        Ok(())
    }

    async fn fetch_http(&self, url: &str, target: &Path) -> Result<(), ResolveError> {
        let mut response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ResolveError::Http {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let (mut file, temp_path) = self.temp_file()?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        temp_path.persist(target).map_err(|e| ResolveError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
