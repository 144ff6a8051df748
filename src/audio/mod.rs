use std::path::{Path, PathBuf};
use std::process::Command;

use hound::{SampleFormat, WavReader};
use rayon::prelude::*;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, WindowFunction};
use tracing::{debug, info};

pub const TARGET_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffmpeg conversion failed: {0}")]
    Conversion(String),
    #[error("invalid wav data: {0}")]
    Wav(#[from] hound::Error),
    #[error("unsupported wav format: {0}")]
    Unsupported(String),
    #[error("resampling failed: {0}")]
    Resample(String),
}

/// 解析音频文件，输出 16kHz 单声道、归一化后的 f32 样本
///
/// 非 WAV 文件会先通过 ffmpeg 转码到临时文件，临时文件在返回前删除。
pub fn decode_to_pcm16k(path: &Path) -> Result<Vec<f32>, AudioError> {
    let converted = ensure_wav_format(path)?;
    let wav_path = converted
        .as_ref()
        .map(|tmp| tmp.path().to_path_buf())
        .unwrap_or_else(|| path.to_path_buf());

    let (samples, num_channels, sample_rate) = read_wav_file(&wav_path)?;
    // 临时 WAV 随 NamedTempFile drop 删除
    drop(converted);

    let mono = convert_to_mono(&samples, num_channels);
    let normalized = normalize_audio(&mono);

    if sample_rate == TARGET_SAMPLE_RATE {
        debug!("Sample rate is already {} Hz, no resampling needed", TARGET_SAMPLE_RATE);
        return Ok(normalized);
    }
    resample_audio(&normalized, sample_rate)
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

/// 确保音频为 WAV 格式，否则用 ffmpeg 转码到临时文件
fn ensure_wav_format(path: &Path) -> Result<Option<tempfile::NamedTempFile>, AudioError> {
    if is_wav(path) {
        return Ok(None);
    }

    let output = tempfile::Builder::new().suffix(".wav").tempfile()?;
    info!("Converting {:?} to WAV with ffmpeg", path);

    let status = Command::new("ffmpeg")
        .arg("-y")
        .arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(path)
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg("-ar")
        .arg(TARGET_SAMPLE_RATE.to_string())
        .arg(output.path())
        .status()
        .map_err(|e| AudioError::Conversion(format!("failed to execute ffmpeg: {}", e)))?;

    if !status.success() {
        return Err(AudioError::Conversion(format!("ffmpeg exited with {}", status)));
    }
    Ok(Some(output))
}

/// 读取 16 位整数 WAV，返回样本、通道数、采样率
fn read_wav_file(path: &PathBuf) -> Result<(Vec<f32>, usize, u32), AudioError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(AudioError::Unsupported(format!(
            "expected 16-bit integer samples, got {:?}/{}",
            spec.sample_format, spec.bits_per_sample
        )));
    }
    if spec.channels == 0 {
        return Err(AudioError::Unsupported("zero channels".to_string()));
    }

    debug!("Original sample rate: {} Hz, channels: {}", spec.sample_rate, spec.channels);

    let samples = reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32))
        .collect::<Result<Vec<f32>, _>>()?;

    Ok((samples, spec.channels as usize, spec.sample_rate))
}

/// 多声道取平均转单声道
fn convert_to_mono(samples: &[f32], num_channels: usize) -> Vec<f32> {
    if num_channels == 1 {
        return samples.to_vec();
    }
    samples
        .par_chunks(num_channels)
        .map(|chunk| chunk.iter().sum::<f32>() / num_channels as f32)
        .collect()
}

/// 归一化到 [-1, 1]
fn normalize_audio(samples: &[f32]) -> Vec<f32> {
    let max_abs = samples
        .par_iter()
        .map(|s| s.abs())
        .reduce(|| 0.0, f32::max);
    if max_abs == 0.0 {
        return samples.to_vec();
    }
    samples.par_iter().map(|s| s / max_abs).collect()
}

fn resample_audio(samples: &[f32], original_sample_rate: u32) -> Result<Vec<f32>, AudioError> {
    info!("Resampling from {} Hz to {} Hz", original_sample_rate, TARGET_SAMPLE_RATE);
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: rubato::SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        TARGET_SAMPLE_RATE as f64 / original_sample_rate as f64,
        2.0,
        params,
        samples.len(),
        1,
    )
    .map_err(|e| AudioError::Resample(e.to_string()))?;

    let mut resampled = resampler
        .process(&[samples.to_vec()], None)
        .map_err(|e| AudioError::Resample(e.to_string()))?;

    Ok(resampled.pop().unwrap_or_default())
}
