//! Configuration for surfline.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SURFLINE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/surfline/config.toml
//!   3. ~/.config/surfline/config.toml
//!
//! Transport code never reads the environment. It receives a
//! [`FramingConfig`] built once from the loaded settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ── Framing limits ────────────────────────────────────────────────────────────

pub const DEFAULT_CHUNK_SIZE: usize = 14 * 1024;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_INFLIGHT: usize = 512;
pub const DEFAULT_MAX_BYTES: usize = 8 * 1024 * 1024;
pub const DEFAULT_RECENT_CAPACITY: usize = 256;

pub const MIN_CHUNK_SIZE: usize = 512;
pub const MIN_TIMEOUT_MS: u64 = 1;
pub const MIN_MAX_INFLIGHT: usize = 1;
pub const MIN_MAX_BYTES: usize = 1024;

/// Immutable limits shared by the encoder and the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramingConfig {
    /// Maximum payload bytes per frame.
    pub chunk_size: usize,
    /// How long a partial assembly (or a completed key) is remembered.
    pub timeout: Duration,
    /// Concurrent partial assemblies before the oldest is evicted.
    pub max_inflight: usize,
    /// Largest logical message accepted in either direction.
    pub max_bytes: usize,
    /// Completed keys kept for duplicate suppression.
    pub recent_capacity: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_inflight: DEFAULT_MAX_INFLIGHT,
            max_bytes: DEFAULT_MAX_BYTES,
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }
}

impl FramingConfig {
    /// Build a config, replacing any value below its floor with the default.
    pub fn new(chunk_size: usize, timeout: Duration, max_inflight: usize, max_bytes: usize) -> Self {
        Self {
            chunk_size: floor_or_default("chunk_size", chunk_size, MIN_CHUNK_SIZE, DEFAULT_CHUNK_SIZE),
            timeout: Duration::from_millis(floor_or_default(
                "timeout_ms",
                timeout.as_millis().min(u64::MAX as u128) as u64,
                MIN_TIMEOUT_MS,
                DEFAULT_TIMEOUT_MS,
            )),
            max_inflight: floor_or_default(
                "max_inflight",
                max_inflight,
                MIN_MAX_INFLIGHT,
                DEFAULT_MAX_INFLIGHT,
            ),
            max_bytes: floor_or_default("max_bytes", max_bytes, MIN_MAX_BYTES, DEFAULT_MAX_BYTES),
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }

    pub fn from_settings(settings: &FramingSettings) -> Self {
        Self::new(
            settings.chunk_size,
            Duration::from_millis(settings.timeout_ms),
            settings.max_inflight,
            settings.max_bytes,
        )
        .with_recent_capacity(settings.recent_capacity)
    }

    pub fn with_recent_capacity(mut self, capacity: usize) -> Self {
        self.recent_capacity = capacity;
        self
    }

    /// Outbound bytes a sender may have queued before it should back off.
    pub fn backpressure_budget(&self) -> usize {
        self.max_bytes.saturating_mul(2)
    }
}

fn floor_or_default<T>(name: &str, value: T, floor: T, default: T) -> T
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if value < floor {
        tracing::warn!(setting = name, value = %value, floor = %floor, default = %default, "framing setting below floor, using default");
        default
    } else {
        value
    }
}

// ── File config ───────────────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurflineConfig {
    pub framing: FramingSettings,
    pub signaling: SignalingSettings,
    pub negotiation: NegotiationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingSettings {
    pub chunk_size: usize,
    pub timeout_ms: u64,
    pub max_inflight: usize,
    pub max_bytes: usize,
    /// Duplicate-suppression window.
    pub recent_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingSettings {
    /// WebSocket URL of the signaling server. Empty = must be given on the command line.
    pub url: String,
    /// Label announced on join.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub join_timeout_ms: u64,
    /// Ping interval. 0 = no heartbeat.
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationSettings {
    /// Attempts per request while the server answers 409.
    pub max_attempts: u32,
    /// Delay used when a 409 carries no Retry-After.
    pub default_delay_ms: u64,
    /// Upper bound on any single retry delay.
    pub max_delay_ms: u64,
    /// Interval between polls while waiting for a peer's SDP.
    pub poll_interval_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for FramingSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_inflight: DEFAULT_MAX_INFLIGHT,
            max_bytes: DEFAULT_MAX_BYTES,
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }
}

impl Default for SignalingSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            label: None,
            join_timeout_ms: 10_000,
            heartbeat_secs: 30,
        }
    }
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            default_delay_ms: 250,
            max_delay_ms: 5_000,
            poll_interval_ms: 250,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("surfline")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SurflineConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            SurflineConfig::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SURFLINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&SurflineConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Framing limits for the transport layer.
    pub fn framing_config(&self) -> FramingConfig {
        FramingConfig::from_settings(&self.framing)
    }

    /// Apply SURFLINE_* overrides from `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let framing = &mut self.framing;
        if let Some(v) = lookup("SURFLINE_FRAMED_CHUNK_SIZE") {
            framing.chunk_size =
                parse_limit("SURFLINE_FRAMED_CHUNK_SIZE", &v, MIN_CHUNK_SIZE, DEFAULT_CHUNK_SIZE);
        }
        if let Some(v) = lookup("SURFLINE_FRAMED_TIMEOUT_MS") {
            framing.timeout_ms =
                parse_limit("SURFLINE_FRAMED_TIMEOUT_MS", &v, MIN_TIMEOUT_MS, DEFAULT_TIMEOUT_MS);
        }
        if let Some(v) = lookup("SURFLINE_FRAMED_MAX_INFLIGHT") {
            framing.max_inflight = parse_limit(
                "SURFLINE_FRAMED_MAX_INFLIGHT",
                &v,
                MIN_MAX_INFLIGHT,
                DEFAULT_MAX_INFLIGHT,
            );
        }
        if let Some(v) = lookup("SURFLINE_FRAMED_MAX_BYTES") {
            framing.max_bytes =
                parse_limit("SURFLINE_FRAMED_MAX_BYTES", &v, MIN_MAX_BYTES, DEFAULT_MAX_BYTES);
        }
        if let Some(v) = lookup("SURFLINE_SIGNALING__URL") {
            self.signaling.url = v;
        }
        if let Some(v) = lookup("SURFLINE_NEGOTIATION__MAX_ATTEMPTS") {
            if let Ok(n) = v.trim().parse::<u32>() {
                self.negotiation.max_attempts = n.max(1);
            }
        }
    }
}

/// Parse a numeric limit. Unparsable or below-floor values yield the default.
fn parse_limit<T>(name: &str, raw: &str, floor: T, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Copy + std::fmt::Display,
{
    match raw.trim().parse::<T>() {
        Ok(value) if value >= floor => value,
        Ok(value) => {
            tracing::warn!(var = name, value = %value, floor = %floor, default = %default, "value below floor, using default");
            default
        }
        Err(_) => {
            tracing::warn!(var = name, raw, default = %default, "invalid value, using default");
            default
        }
    }
}
