use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutOptions, PutPayload, TagSet};
use tracing::debug;

use crate::schedule::types::Tag;

pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("object storage error: {0}")]
    Backend(String),
}

impl StorageError {
    fn from_store(bucket: &str, key: &str, e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { .. } => StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// Bucket/key addressed blob storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, StorageError>;

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes, tags: &[Tag]) -> Result<(), StorageError>;
}

#[derive(Debug, Clone)]
enum Backend {
    S3,
    Local(PathBuf),
    Memory,
}

/// `ObjectStorage` over the `object_store` crate, one store per bucket built on first use.
pub struct BucketStorage {
    backend: Backend,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl BucketStorage {
    /// S3 configured from the usual `AWS_*` environment variables.
    pub fn s3_from_env() -> Self {
        Self::with_backend(Backend::S3)
    }

    /// Buckets are sub-directories of `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::with_backend(Backend::Local(root.into()))
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Backend::Memory)
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            stores: Mutex::new(HashMap::new()),
        }
    }

    fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(store) = stores.get(bucket) {
            return Ok(store.clone());
        }

        let store: Arc<dyn ObjectStore> = match &self.backend {
            Backend::S3 => Arc::new(
                AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| StorageError::Backend(e.to_string()))?,
            ),
            Backend::Local(root) => {
                let dir = root.join(bucket);
                std::fs::create_dir_all(&dir).map_err(|e| StorageError::Backend(e.to_string()))?;
                Arc::new(LocalFileSystem::new_with_prefix(dir).map_err(|e| StorageError::Backend(e.to_string()))?)
            }
            Backend::Memory => Arc::new(InMemory::new()),
        };
        debug!("Opened object store for bucket '{}'", bucket);
        stores.insert(bucket.to_string(), store.clone());
        Ok(store)
    }
}

#[async_trait]
impl ObjectStorage for BucketStorage {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, StorageError> {
        let store = self.store(bucket)?;
        let result = store
            .get(&StorePath::from(key))
            .await
            .map_err(|e| StorageError::from_store(bucket, key, e))?;

        let (bucket, key) = (bucket.to_string(), key.to_string());
        Ok(result
            .into_stream()
            .map_err(move |e| StorageError::from_store(&bucket, &key, e))
            .boxed())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes, tags: &[Tag]) -> Result<(), StorageError> {
        let store = self.store(bucket)?;
        let mut tag_set = TagSet::default();
        for tag in tags {
            tag_set.push(&tag.key, &tag.value);
        }
        let opts = PutOptions {
            tags: tag_set,
            ..Default::default()
        };

        store
            .put_opts(&StorePath::from(key), PutPayload::from(body), opts)
            .await
            .map_err(|e| StorageError::from_store(bucket, key, e))?;
        Ok(())
    }
}

/// Reads a whole object into memory.
#[cfg(test)]
pub async fn read_object(storage: &dyn ObjectStorage, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
    let mut stream = storage.get_object(bucket, key).await?;
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(body))
}
