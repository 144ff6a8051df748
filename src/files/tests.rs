use super::*;
use crate::files::object_storage::ByteStream;
use crate::schedule::types::Tag;
use crate::test_support::spawn_server;
use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// In-memory storage that counts reads.
struct CountingStorage {
    inner: BucketStorage,
    reads: AtomicUsize,
}

impl CountingStorage {
    async fn with_object(bucket: &str, key: &str, body: &'static [u8]) -> Arc<Self> {
        let inner = BucketStorage::in_memory();
        inner.put_object(bucket, key, Bytes::from_static(body), &[]).await.unwrap();
        Arc::new(Self {
            inner,
            reads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ObjectStorage for CountingStorage {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_object(bucket, key).await
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes, tags: &[Tag]) -> Result<(), StorageError> {
        self.inner.put_object(bucket, key, body, tags).await
    }
}

fn service(dir: &TempDir, storage: Arc<dyn ObjectStorage>) -> FileService {
    FileService::new(dir.path().join("uploads"), storage, Arc::new(DownloadCache::default()))
}

fn uploads(dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.path().join("uploads"))
        .map(|entries| {
            entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[test]
fn test_parse_audio_source() {
    assert_eq!(
        AudioSource::parse("s3://bucket/calls/clip.mp3").unwrap(),
        AudioSource::ObjectStorage {
            bucket: "bucket".into(),
            key: "calls/clip.mp3".into()
        }
    );
    assert_eq!(
        AudioSource::parse("https://cdn.example.com/a/b.wav?sig=1").unwrap(),
        AudioSource::Http("https://cdn.example.com/a/b.wav?sig=1".into())
    );
    assert_eq!(
        AudioSource::parse("file:///data/a.wav").unwrap(),
        AudioSource::Local(PathBuf::from("/data/a.wav"))
    );
    assert_eq!(
        AudioSource::parse("./a.wav").unwrap(),
        AudioSource::Local(PathBuf::from("./a.wav"))
    );
    for bad in ["", "s3://bucket", "s3://bucket/", "s3:///key"] {
        assert!(AudioSource::parse(bad).is_err(), "{}", bad);
    }
}

#[tokio::test]
async fn test_local_reference_is_used_in_place() {
    let dir = TempDir::new().unwrap();
    let local = dir.path().join("meeting.wav");
    std::fs::write(&local, b"RIFF").unwrap();
    let files = service(&dir, Arc::new(BucketStorage::in_memory()));

    assert_eq!(files.resolve(local.to_str().unwrap()).await.unwrap(), local);
    assert!(matches!(
        files.resolve("/nonexistent/meeting.wav").await,
        Err(ResolveError::Missing(_))
    ));
    assert!(files.cache().is_empty());
}

#[tokio::test]
async fn test_object_storage_reference_fetched_once() {
    let dir = TempDir::new().unwrap();
    let storage = CountingStorage::with_object("bucket", "clip.mp3", b"mp3 bytes").await;
    let files = service(&dir, storage.clone());

    let first = files.resolve("s3://bucket/clip.mp3").await.unwrap();
    let second = files.resolve("s3://bucket/clip.mp3").await.unwrap();

    assert_eq!(first, dir.path().join("uploads/clip.mp3"));
    assert_eq!(first, second);
    assert_eq!(std::fs::read(&first).unwrap(), b"mp3 bytes");
    assert_eq!(storage.reads.load(Ordering::SeqCst), 1);
    assert!(files.cache().contains(&first));
    assert_eq!(uploads(&dir), vec!["clip.mp3"]);
}

#[tokio::test]
async fn test_concurrent_resolves_share_one_fetch() {
    let dir = TempDir::new().unwrap();
    let storage = CountingStorage::with_object("bucket", "a/clip.mp3", b"data").await;
    let files = Arc::new(service(&dir, storage.clone()));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let files = files.clone();
            tokio::spawn(async move { files.resolve("s3://bucket/a/clip.mp3").await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(storage.reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_evicted_file_is_fetched_again() {
    let dir = TempDir::new().unwrap();
    let storage = CountingStorage::with_object("bucket", "clip.mp3", b"x").await;
    let files = service(&dir, storage.clone());

    let path = files.resolve("s3://bucket/clip.mp3").await.unwrap();
    let report = files.cache().sweep(Utc::now() + chrono::Duration::hours(4)).await;
    assert_eq!(report.deleted, 1);
    assert!(!path.exists());

    files.resolve("s3://bucket/clip.mp3").await.unwrap();
    assert_eq!(storage.reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cache_hit_refreshes_retention() {
    let dir = TempDir::new().unwrap();
    let storage = CountingStorage::with_object("bucket", "clip.mp3", b"x").await;
    let files = service(&dir, storage.clone());

    let path = files.resolve("s3://bucket/clip.mp3").await.unwrap();
    files.cache().record_at(&path, Utc::now() - chrono::Duration::hours(4));

    // a new job reuses the file
    files.resolve("s3://bucket/clip.mp3").await.unwrap();
    let report = files.cache().sweep(Utc::now()).await;

    assert_eq!(report.deleted, 0);
    assert!(path.exists());
    assert!(files.cache().contains(&path));
    assert_eq!(storage.reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_object_is_storage_error() {
    let dir = TempDir::new().unwrap();
    let files = service(&dir, Arc::new(BucketStorage::in_memory()));

    let err = files.resolve("s3://bucket/none.mp3").await.unwrap_err();
    assert!(matches!(err, ResolveError::Storage(StorageError::NotFound { .. })));
    assert!(uploads(&dir).is_empty());
}

#[tokio::test]
async fn test_http_download_and_status_error() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new()
        .route(
            "/media/talk.wav",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Bytes::from_static(b"RIFF....WAVE")
                }
            }),
        )
        .route("/media/gone.wav", get(|| async { StatusCode::NOT_FOUND }));
    let base = spawn_server(app).await;

    let dir = TempDir::new().unwrap();
    let files = service(&dir, Arc::new(BucketStorage::in_memory()));

    let path = files.resolve(&format!("{}/media/talk.wav", base)).await.unwrap();
    files.resolve(&format!("{}/media/talk.wav", base)).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"RIFF....WAVE");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let err = files.resolve(&format!("{}/media/gone.wav", base)).await.unwrap_err();
    assert!(matches!(err, ResolveError::Http { status: 404, .. }));
    // the failed download leaves no temp file behind
    assert_eq!(uploads(&dir), vec!["talk.wav"]);
}
