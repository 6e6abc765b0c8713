use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatcher::{DispatcherConfig, DEFAULT_COOLDOWN, DEFAULT_JPEG_QUALITY, DEFAULT_PAUSE};
use crate::ingest::http::{HttpStreamConfig, DEFAULT_CHUNK_BYTES};
use crate::settings::{validate_stream_url, validate_threshold};

const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_MODEL_EXTENSION: &str = "onnx";
const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;
const DEFAULT_STREAM_URL: &str = "http://192.168.0.104/";
const DEFAULT_THRESHOLD: f32 = 0.6;
const DEFAULT_STREAM_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct CamwatchConfigFile {
    models: Option<ModelsConfigFile>,
    stream: Option<StreamConfigFile>,
    detection: Option<DetectionConfigFile>,
    telegram: Option<TelegramConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsConfigFile {
    dir: Option<PathBuf>,
    extension: Option<String>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    chunk_bytes: Option<usize>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    threshold: Option<f32>,
    pause_ms: Option<u64>,
    cooldown_ms: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Deserialize, Default)]
struct TelegramConfigFile {
    api_base: Option<String>,
    token: Option<String>,
    poll_timeout_secs: Option<u64>,
}

impl fmt::Debug for TelegramConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfigFile")
            .field("api_base", &self.api_base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CamwatchConfig {
    pub models: ModelSettings,
    pub stream: StreamSettings,
    pub detection: DetectionSettings,
    pub telegram: TelegramSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub dir: PathBuf,
    pub extension: String,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    pub chunk_bytes: usize,
    /// `None` disables the timeout.
    pub connect_timeout: Option<Duration>,
    /// Always set once validated.
    pub read_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub threshold: f32,
    pub pause: Duration,
    pub cooldown: Duration,
    pub jpeg_quality: u8,
}

#[derive(Clone)]
pub struct TelegramSettings {
    pub api_base: String,
    pub token: Option<String>,
    pub poll_timeout: Duration,
}

impl fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("api_base", &self.api_base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

impl CamwatchConfig {
    /// Load from `$CAMWATCH_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAMWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (or defaults), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CamwatchConfigFile) -> Self {
        let models = file.models.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let telegram = file.telegram.unwrap_or_default();

        Self {
            models: ModelSettings {
                dir: models.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
                extension: models
                    .extension
                    .unwrap_or_else(|| DEFAULT_MODEL_EXTENSION.to_string()),
                input_size: models.input_size.unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
            },
            stream: StreamSettings {
                url: stream.url.unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
                chunk_bytes: stream.chunk_bytes.unwrap_or(DEFAULT_CHUNK_BYTES),
                connect_timeout: optional_millis(
                    stream.connect_timeout_ms.unwrap_or(DEFAULT_STREAM_TIMEOUT_MS),
                ),
                read_timeout: optional_millis(
                    stream.read_timeout_ms.unwrap_or(DEFAULT_STREAM_TIMEOUT_MS),
                ),
            },
            detection: DetectionSettings {
                threshold: detection.threshold.unwrap_or(DEFAULT_THRESHOLD),
                pause: detection
                    .pause_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_PAUSE),
                cooldown: detection
                    .cooldown_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_COOLDOWN),
                jpeg_quality: detection.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            telegram: TelegramSettings {
                api_base: telegram
                    .api_base
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API.to_string()),
                token: telegram.token,
                poll_timeout: Duration::from_secs(
                    telegram.poll_timeout_secs.unwrap_or(DEFAULT_POLL_TIMEOUT_SECS),
                ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("CAMWATCH_STREAM_URL") {
            if !url.trim().is_empty() {
                self.stream.url = url;
            }
        }
        if let Ok(dir) = std::env::var("CAMWATCH_MODEL_DIR") {
            if !dir.trim().is_empty() {
                self.models.dir = PathBuf::from(dir);
            }
        }
        if let Ok(threshold) = std::env::var("CAMWATCH_THRESHOLD") {
            self.detection.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAMWATCH_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Ok(chunk) = std::env::var("CAMWATCH_CHUNK_BYTES") {
            self.stream.chunk_bytes = chunk
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAMWATCH_CHUNK_BYTES must be an integer number of bytes"))?;
        }
        if let Ok(pause) = std::env::var("CAMWATCH_PAUSE_MS") {
            let millis: u64 = pause
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAMWATCH_PAUSE_MS must be an integer number of milliseconds"))?;
            self.detection.pause = Duration::from_millis(millis);
        }
        if let Ok(cooldown) = std::env::var("CAMWATCH_COOLDOWN_MS") {
            let millis: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("CAMWATCH_COOLDOWN_MS must be an integer number of milliseconds")
            })?;
            self.detection.cooldown = Duration::from_millis(millis);
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.trim().is_empty() {
                self.telegram.token = Some(token.trim().to_string());
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.stream.url = validate_stream_url(&self.stream.url)?;
        self.detection.threshold = validate_threshold(self.detection.threshold)?;

        if self.stream.chunk_bytes == 0 {
            return Err(anyhow!("stream chunk size must be greater than zero"));
        }
        // An unbounded read would hold a stopped run's blocking reader forever.
        if self.stream.read_timeout.is_none() {
            return Err(anyhow!("stream read timeout must be greater than zero"));
        }
        if !(1..=100).contains(&self.detection.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be between 1 and 100"));
        }
        if self.models.input_size == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        self.models.extension = self
            .models
            .extension
            .trim()
            .trim_start_matches('.')
            .to_string();
        if self.models.extension.is_empty() {
            return Err(anyhow!("model extension must not be empty"));
        }
        Ok(())
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            pause: self.detection.pause,
            cooldown: self.detection.cooldown,
            jpeg_quality: self.detection.jpeg_quality,
        }
    }

    pub fn http_stream_config(&self) -> HttpStreamConfig {
        HttpStreamConfig {
            chunk_bytes: self.stream.chunk_bytes,
            connect_timeout: self.stream.connect_timeout,
            read_timeout: self.stream.read_timeout,
        }
    }
}

fn read_config_file(path: &Path) -> Result<CamwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn optional_millis(millis: u64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}
