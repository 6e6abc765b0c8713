//! Shared runtime settings.
//!
//! `SharedConfig` is the one piece of mutable state shared by the command layer
//! (writer) and the detection dispatcher (reader). Every write goes through a
//! validated setter, so an invalid value never becomes visible; every read by
//! the dispatcher goes through `snapshot()`, so one iteration never sees a mix
//! of old and new fields.

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use url::Url;

use crate::detect::ModelRegistry;
use crate::transport::ChatId;

/// Validation failures for settings updates. The prior value is always kept.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SettingsError {
    #[error("invalid stream url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("threshold must be a number between 0 and 1, got '{0}'")]
    InvalidThreshold(String),

    #[error("unknown model '{0}'")]
    UnknownModel(String),
}

/// One consistent copy of all settings.
#[derive(Clone, Debug, PartialEq)]
pub struct SettingsSnapshot {
    pub stream_url: String,
    pub threshold: f32,
    pub model: String,
    pub destination: Option<ChatId>,
}

/// Cloneable handle to the process-wide settings.
#[derive(Clone, Debug)]
pub struct SharedConfig {
    inner: Arc<Mutex<SettingsSnapshot>>,
}

impl SharedConfig {
    /// Create settings with validated initial values and no destination.
    pub fn new(stream_url: &str, threshold: f32, model: &str) -> Result<Self, SettingsError> {
        let stream_url = validate_stream_url(stream_url)?;
        let threshold = validate_threshold(threshold)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(SettingsSnapshot {
                stream_url,
                threshold,
                model: model.to_string(),
                destination: None,
            })),
        })
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        self.lock().clone()
    }

    pub fn stream_url(&self) -> String {
        self.lock().stream_url.clone()
    }

    /// Replace the stream URL. Returns the normalized URL that was stored.
    pub fn set_stream_url(&self, raw: &str) -> Result<String, SettingsError> {
        let url = validate_stream_url(raw)?;
        self.lock().stream_url = url.clone();
        Ok(url)
    }

    pub fn threshold(&self) -> f32 {
        self.lock().threshold
    }

    pub fn set_threshold(&self, threshold: f32) -> Result<f32, SettingsError> {
        let threshold = validate_threshold(threshold)?;
        self.lock().threshold = threshold;
        Ok(threshold)
    }

    /// Parse and store a textual threshold (as typed by a user).
    pub fn set_threshold_str(&self, raw: &str) -> Result<f32, SettingsError> {
        let threshold = parse_threshold(raw)?;
        self.set_threshold(threshold)
    }

    pub fn model(&self) -> String {
        self.lock().model.clone()
    }

    /// Select the active model. Only names known to `registry` are accepted.
    pub fn set_model(&self, name: &str, registry: &ModelRegistry) -> Result<String, SettingsError> {
        let name = name.trim();
        if !registry.contains(name) {
            return Err(SettingsError::UnknownModel(name.to_string()));
        }
        self.lock().model = name.to_string();
        Ok(name.to_string())
    }

    pub fn destination(&self) -> Option<ChatId> {
        self.lock().destination
    }

    pub fn set_destination(&self, destination: ChatId) {
        self.lock().destination = Some(destination);
    }

    pub fn clear_destination(&self) {
        self.lock().destination = None;
    }

    // Settings are plain values written in a single assignment, so a poisoned
    // lock still guards a consistent value.
    fn lock(&self) -> MutexGuard<'_, SettingsSnapshot> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Accept absolute `http`/`https` URLs with a host.
pub fn validate_stream_url(raw: &str) -> Result<String, SettingsError> {
    let raw = raw.trim();
    let invalid = |reason: &str| SettingsError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(url.to_string())
}

pub fn validate_threshold(threshold: f32) -> Result<f32, SettingsError> {
    if threshold.is_finite() && (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(SettingsError::InvalidThreshold(threshold.to_string()))
    }
}

pub fn parse_threshold(raw: &str) -> Result<f32, SettingsError> {
    let raw = raw.trim();
    let value: f32 = raw
        .parse()
        .map_err(|_| SettingsError::InvalidThreshold(raw.to_string()))?;
    validate_threshold(value).map_err(|_| SettingsError::InvalidThreshold(raw.to_string()))
}
