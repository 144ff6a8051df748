use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info,asr_jobs=debug,sqlx=warn,sea_orm=warn";

/// 初始化日志：控制台 + 按天滚动的文件日志
///
/// 返回的 guard 必须在进程退出前一直持有，否则文件日志会丢失尾部内容。
pub fn init(log_dir: impl AsRef<Path>) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir.as_ref())?;

    let file_appender = tracing_appender::rolling::daily(log_dir.as_ref(), "asr-jobs.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()?;

    Ok(guard)
}
