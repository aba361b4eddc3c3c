/*!
 * Configuration types for upload streams
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{UploadError, UploadResult};
use crate::protocol::{MAX_PART_SIZE, MIN_PART_SIZE};

#[cfg(feature = "s3-native")]
use crate::protocol::s3::S3Config;

/// What to do when close finds nothing left to send as the final part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmptyFinalPart {
    /// Transmit a zero-length final part (what S3 expects for an empty object)
    #[default]
    Send,

    /// Complete with the parts already acknowledged, possibly none
    Skip,
}

/// Tuning of a single upload stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Upper bound on bytes held between writes.
    ///
    /// Only a ceiling: parts are cut as soon as the buffer reaches the flush
    /// point, so a stream never holds more than `min_part_size` bytes (plus the
    /// withheld byte under encryption) whatever this is set to. Raising it does
    /// not produce larger parts; use `min_part_size` for that.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Size at which a non-final part is cut
    #[serde(default = "default_min_part_size")]
    pub min_part_size: usize,

    /// Maximum wait for the operation lock in milliseconds
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Behavior when the final part would be empty
    #[serde(default)]
    pub empty_final_part: EmptyFinalPart,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            min_part_size: default_min_part_size(),
            lock_timeout_ms: default_lock_timeout_ms(),
            empty_final_part: EmptyFinalPart::default(),
        }
    }
}

fn default_buffer_capacity() -> usize {
    3 * MIN_PART_SIZE
}

fn default_min_part_size() -> usize {
    MIN_PART_SIZE
}

fn default_lock_timeout_ms() -> u64 {
    60_000
}

impl StreamConfig {
    /// Start building a validated configuration
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }

    /// Check every constraint the stream relies on
    pub fn validate(&self) -> UploadResult<()> {
        if self.min_part_size < MIN_PART_SIZE {
            return Err(UploadError::Config(format!(
                "min_part_size {} is below the protocol minimum of {} bytes",
                self.min_part_size, MIN_PART_SIZE
            )));
        }

        if self.min_part_size > MAX_PART_SIZE {
            return Err(UploadError::Config(format!(
                "min_part_size {} exceeds the protocol maximum of {} bytes",
                self.min_part_size, MAX_PART_SIZE
            )));
        }

        if self.buffer_capacity < self.min_part_size {
            return Err(UploadError::Config(format!(
                "buffer_capacity {} must be at least min_part_size {}",
                self.buffer_capacity, self.min_part_size
            )));
        }

        if self.lock_timeout_ms == 0 {
            return Err(UploadError::Config(
                "lock_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Lock acquisition timeout as a duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Buffered size at which a part is cut.
    ///
    /// With encryption one byte above the part size is buffered, because that
    /// byte is withheld from the part and carried into the next one.
    pub fn flush_point(&self, encryption_active: bool) -> usize {
        if encryption_active {
            self.min_part_size + 1
        } else {
            self.min_part_size
        }
    }

    /// Load a stream configuration from a TOML file
    pub fn from_file(path: &Path) -> UploadResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            UploadError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: StreamConfig = toml::from_str(&contents)
            .map_err(|e| UploadError::Config(format!("Invalid stream config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

/// Builder for [`StreamConfig`]
#[derive(Debug, Clone, Default)]
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    pub fn buffer_capacity(mut self, bytes: usize) -> Self {
        self.config.buffer_capacity = bytes;
        self
    }

    pub fn min_part_size(mut self, bytes: usize) -> Self {
        self.config.min_part_size = bytes;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn empty_final_part(mut self, behavior: EmptyFinalPart) -> Self {
        self.config.empty_final_part = behavior;
        self
    }

    /// Validate and produce the configuration
    pub fn build(self) -> UploadResult<StreamConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write JSON logs to this file instead of stdout
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Force debug level
    #[serde(default)]
    pub verbose: bool,
}

/// Contents of a configuration file: `[stream]`, `[s3]` and `[logging]` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub stream: StreamConfig,

    #[cfg(feature = "s3-native")]
    #[serde(default)]
    pub s3: Option<S3Config>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> UploadResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            UploadError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&contents)
            .map_err(|e| UploadError::Config(format!("Invalid config file: {}", e)))?;
        config.stream.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> UploadResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| UploadError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| {
            UploadError::Config(format!("Failed to write {}: {}", path.display(), e))
        })
    }
}
