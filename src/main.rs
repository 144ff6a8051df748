#![allow(clippy::uninlined_format_args)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use asr_jobs::adapters::runpod::{WHISPERX_LOCAL, WHISPERX_RUNPOD};
use asr_jobs::adapters::{AdapterRegistry, AudioDelivery, ModalAdapter, RunPodAdapter};
use asr_jobs::config::Config;
use asr_jobs::files::{BucketStorage, DownloadCache, FileService, ObjectStorage};
use asr_jobs::schedule::publish::EventPublisher;
use asr_jobs::schedule::{
    BroadcastEventPublisher, HttpEventPublisher, ResultPublisher, Submission, TaskQueue, TranscriptionJobProcessor,
};
use asr_jobs::storage::job::SqliteJobRepository;
use asr_jobs::storage::profile::SqliteProfileRepository;
use asr_jobs::{storage, utils::logger, AppContext};

fn build_registry(config: &Config) -> Result<AdapterRegistry> {
    let mut builder = AdapterRegistry::builder();

    if let Some(endpoint) = &config.runpod_endpoint {
        let mut adapter = RunPodAdapter::new(endpoint);
        if let Some(key) = &config.runpod_api_key {
            adapter = adapter.with_api_key(key);
        }
        // 有公网地址时让 RunPod 回源拉取音频
        if let Some(base_url) = &config.callback_base_url {
            adapter = adapter.with_delivery(AudioDelivery::Callback {
                base_url: base_url.clone(),
                headers: HashMap::new(),
            });
        }
        builder.register(WHISPERX_RUNPOD, Arc::new(adapter));
    }

    if let Some(url) = &config.local_whisperx_url {
        let adapter = RunPodAdapter::new(url).with_model_family(WHISPERX_LOCAL, "whisperx");
        builder.register(WHISPERX_LOCAL, Arc::new(adapter));
    }

    if let Some(url) = &config.modal_function_url {
        let mut adapter = ModalAdapter::new(url);
        if let Some(token) = &config.modal_token {
            adapter = adapter.with_token(token);
        }
        builder.register(asr_jobs::adapters::modal::MODAL_WHISPERX, Arc::new(adapter));
    }

    #[cfg(feature = "whisper")]
    if let Some(model_path) = &config.whisper_model_path {
        use asr_jobs::adapters::local::LOCAL_WHISPER;
        use asr_jobs::adapters::LocalWhisperAdapter;
        use asr_jobs::asr::whisper::WhisperAsr;

        info!("Loading whisper model from {:?}", model_path);
        let engine = WhisperAsr::new(&model_path.to_string_lossy())?;
        builder.register(LOCAL_WHISPER, Arc::new(LocalWhisperAdapter::new(Arc::new(engine), model_path)));
    }
    #[cfg(not(feature = "whisper"))]
    if config.whisper_model_path.is_some() {
        warn!("WHISPER_MODEL_PATH is set but the binary was built without the `whisper` feature");
    }

    Ok(builder.build())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志系统
    let _guard = logger::init("./logs")?;

    let config = Config::from_env()?;
    asr_jobs::init_env(&config)?;
    info!("Starting asr-jobs {} ...", env!("GIT_HASH"));

    // 初始化 storage
    info!("Initializing Storage...");
    let db = storage::connect(&config.database_url).await?;
    let jobs = Arc::new(SqliteJobRepository::new(db.clone()));
    let profiles = Arc::new(SqliteProfileRepository::new(db));

    let object_storage: Arc<dyn ObjectStorage> = match &config.storage_root {
        Some(root) => {
            info!("Using local object storage at {:?}", root);
            Arc::new(BucketStorage::local(root))
        }
        None => Arc::new(BucketStorage::s3_from_env()),
    };

    // 初始化模型适配器
    info!("Initializing adapters...");
    let registry = Arc::new(build_registry(&config)?);
    if registry.model_ids().is_empty() {
        warn!("No transcription adapters configured, every job will fail");
    }
    for status in registry.prepare_all().await {
        if status.ready {
            info!("Adapter '{}' ready", status.model_id);
        }
    }

    let shutdown = CancellationToken::new();

    let cache = Arc::new(DownloadCache::new(config.cache_retention));
    let sweeper = cache
        .clone()
        .spawn_sweeper(config.cache_sweep_interval, shutdown.child_token());
    let files = Arc::new(FileService::new(&config.upload_dir, object_storage.clone(), cache));

    let events: Arc<dyn EventPublisher> = match &config.event_endpoint {
        Some(endpoint) => Arc::new(HttpEventPublisher::new(endpoint)),
        None => {
            info!("EVENT_ENDPOINT not set, notifications stay in-process");
            let (publisher, _) = BroadcastEventPublisher::new(64);
            Arc::new(publisher)
        }
    };
    let publisher = ResultPublisher::new(object_storage, events)
        .with_bus(&config.event_bus, &config.event_source)
        .with_timeout(config.publish_timeout);

    // 初始化任务队列
    info!("Initializing task queue with {} workers...", config.workers);
    let processor = TranscriptionJobProcessor::new(jobs.clone(), registry.clone(), files.clone())
        .with_publisher(publisher)
        .with_job_timeout(config.job_timeout);
    let queue = Arc::new(TaskQueue::new(config.queue_config(), Arc::new(processor)));
    queue.start().await?;

    let submission = Arc::new(
        Submission::new(jobs.clone(), queue.clone(), registry.clone(), &config.default_model)
            .with_profiles(profiles.clone()),
    );
    let resumed = submission.resume_pending().await?;
    let requeued = submission.requeue_uploaded().await?;
    info!("Recovered {} pending and {} uploaded jobs", resumed, requeued);

    // 创建应用上下文
    let ctx = Arc::new(AppContext {
        jobs,
        profiles,
        registry,
        queue: queue.clone(),
        submission,
        files,
    });

    tokio::spawn(shutdown_signal(shutdown.clone()));

    // 启动 HTTP 服务器
    if let Err(e) = asr_jobs::web::start_server(ctx, config.bind_addr, shutdown.clone()).await {
        tracing::error!("Server error: {}", e);
        shutdown.cancel();
        queue.stop().await;
        return Err(e);
    }

    // 优雅关闭
    info!("Shutting down...");
    shutdown.cancel();
    let report = queue.stop().await;
    info!(
        "Queue stopped: {} finished, {} abandoned at the deadline",
        report.finished, report.timed_out
    );
    let _ = sweeper.await;

    Ok(())
}
