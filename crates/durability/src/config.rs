//! Storage configuration
//!
//! Controls where and how the log stores its segments and how aggressively
//! compaction runs. Built in code with `with_*` setters or loaded from a
//! TOML file placed next to the segments.

use crate::format::DESCRIPTOR_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name conventionally placed in the log directory.
pub const CONFIG_FILE_NAME: &str = "replog.toml";

/// Upper bound on `max_entries_per_segment`.
pub const MAX_ENTRIES_PER_SEGMENT_LIMIT: u32 = 1024 * 1024;

/// Where segment bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLevel {
    /// Heap buffers; nothing survives the process
    Memory,
    /// One file per segment in `directory`
    Disk,
}

/// Storage and compaction settings.
///
/// # Example
///
/// ```toml
/// directory = "/var/lib/replog"
/// storage_level = "disk"
/// max_entry_size = 8192
/// max_segment_size = 33554432
/// max_entries_per_segment = 1048576
/// compaction_threads = 4
/// minor_compaction_interval_ms = 60000
/// major_compaction_interval_ms = 600000
/// compaction_threshold = 0.5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for segment files (default: `.`)
    pub directory: PathBuf,
    /// Memory or disk (default: disk)
    pub storage_level: StorageLevel,
    /// Largest encoded entry accepted by `append`, in bytes (default: 8KB)
    pub max_entry_size: u32,
    /// Segment capacity in bytes, header included (default: 32MB)
    pub max_segment_size: u64,
    /// Segment capacity in entries (default: 1Mi)
    pub max_entries_per_segment: u32,
    /// Worker threads for compaction passes (default: half the hardware threads)
    pub compaction_threads: usize,
    /// Minor compaction cadence (default: 1 minute)
    #[serde(rename = "minor_compaction_interval_ms", with = "duration_ms")]
    pub minor_compaction_interval: Duration,
    /// Major compaction cadence (default: 10 minutes)
    #[serde(rename = "major_compaction_interval_ms", with = "duration_ms")]
    pub major_compaction_interval: Duration,
    /// Reclaimable fraction at which a segment becomes a major compaction
    /// candidate (default: 0.5)
    pub compaction_threshold: f64,
}

fn default_compaction_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            directory: PathBuf::from("."),
            storage_level: StorageLevel::Disk,
            max_entry_size: 8 * 1024,                // 8KB
            max_segment_size: 32 * 1024 * 1024,      // 32MB
            max_entries_per_segment: MAX_ENTRIES_PER_SEGMENT_LIMIT,
            compaction_threads: default_compaction_threads(),
            minor_compaction_interval: Duration::from_secs(60),
            major_compaction_interval: Duration::from_secs(10 * 60),
            compaction_threshold: 0.5,
        }
    }
}

impl StorageConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration optimized for testing.
    ///
    /// Small segments so rotation and compaction happen after a handful of
    /// entries; compaction timers are effectively disabled so tests drive
    /// passes explicitly.
    pub fn for_testing(directory: impl Into<PathBuf>) -> Self {
        StorageConfig {
            directory: directory.into(),
            storage_level: StorageLevel::Disk,
            max_entry_size: 1024,
            max_segment_size: 16 * 1024,
            max_entries_per_segment: 64,
            compaction_threads: 1,
            minor_compaction_interval: Duration::from_secs(3600),
            major_compaction_interval: Duration::from_secs(3600),
            compaction_threshold: 0.5,
        }
    }

    /// Set the base directory (builder pattern).
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Set the storage level (builder pattern).
    pub fn with_storage_level(mut self, level: StorageLevel) -> Self {
        self.storage_level = level;
        self
    }

    /// Set the maximum entry size (builder pattern).
    pub fn with_max_entry_size(mut self, size: u32) -> Self {
        self.max_entry_size = size;
        self
    }

    /// Set the maximum segment size (builder pattern).
    pub fn with_max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Set the maximum entries per segment (builder pattern).
    pub fn with_max_entries_per_segment(mut self, count: u32) -> Self {
        self.max_entries_per_segment = count;
        self
    }

    /// Set the compaction thread count (builder pattern).
    pub fn with_compaction_threads(mut self, threads: usize) -> Self {
        self.compaction_threads = threads;
        self
    }

    /// Set the minor compaction interval (builder pattern).
    pub fn with_minor_compaction_interval(mut self, interval: Duration) -> Self {
        self.minor_compaction_interval = interval;
        self
    }

    /// Set the major compaction interval (builder pattern).
    pub fn with_major_compaction_interval(mut self, interval: Duration) -> Self {
        self.major_compaction_interval = interval;
        self
    }

    /// Set the major compaction threshold (builder pattern).
    pub fn with_compaction_threshold(mut self, threshold: f64) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entry_size == 0 {
            return Err(ConfigError::EntrySizeZero);
        }
        if self.max_segment_size <= DESCRIPTOR_SIZE as u64 {
            return Err(ConfigError::SegmentSizeTooSmall {
                size: self.max_segment_size,
                min: DESCRIPTOR_SIZE as u64 + 1,
            });
        }
        if self.max_entry_size as u64 > self.max_segment_size {
            return Err(ConfigError::EntryExceedsSegment {
                entry: self.max_entry_size,
                segment: self.max_segment_size,
            });
        }
        if self.max_entries_per_segment == 0
            || self.max_entries_per_segment > MAX_ENTRIES_PER_SEGMENT_LIMIT
        {
            return Err(ConfigError::EntriesPerSegmentOutOfRange(
                self.max_entries_per_segment,
            ));
        }
        if self.compaction_threads == 0 {
            return Err(ConfigError::NoCompactionThreads);
        }
        if self.minor_compaction_interval.is_zero() || self.major_compaction_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if !(self.compaction_threshold > 0.0 && self.compaction_threshold <= 1.0) {
            return Err(ConfigError::ThresholdOutOfRange(self.compaction_threshold));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# replog storage configuration
#
# Where segments live: "disk" (default) or "memory"
storage_level = "disk"
directory = "."

# Largest encoded entry accepted by append, in bytes (default: 8KB)
max_entry_size = 8192

# Segment capacity; a segment rotates when either limit is reached
max_segment_size = 33554432
max_entries_per_segment = 1048576

# Compaction worker threads (default: half the hardware threads)
# compaction_threads = 4

# Compaction cadences in milliseconds
minor_compaction_interval_ms = 60000
major_compaction_interval_ms = 600000

# Reclaimable fraction at which a segment is merged by major compaction
compaction_threshold = 0.5
"#
    }

    /// Read, parse and validate config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: StorageConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `max_entry_size` is zero
    #[error("Maximum entry size must be positive")]
    EntrySizeZero,

    /// Segment cannot hold its own header plus one byte
    #[error("Segment size {size} is too small (minimum {min})")]
    SegmentSizeTooSmall {
        /// Configured size
        size: u64,
        /// Smallest accepted size
        min: u64,
    },

    /// A single entry would not fit in a segment
    #[error("Maximum entry size {entry} exceeds maximum segment size {segment}")]
    EntryExceedsSegment {
        /// Configured entry size
        entry: u32,
        /// Configured segment size
        segment: u64,
    },

    /// `max_entries_per_segment` outside `1..=1Mi`
    #[error("Maximum entries per segment {0} out of range (1..=1048576)")]
    EntriesPerSegmentOutOfRange(u32),

    /// `compaction_threads` is zero
    #[error("Compaction thread count must be positive")]
    NoCompactionThreads,

    /// A compaction interval is zero
    #[error("Compaction intervals must be positive")]
    ZeroInterval,

    /// Threshold outside `(0, 1]`
    #[error("Compaction threshold {0} out of range (0, 1]")]
    ThresholdOutOfRange(f64),

    /// Config file could not be read or written
    #[error("Config file '{}': {source}", path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Config file could not be parsed
    #[error("Failed to parse config file '{}': {message}", path.display())]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Config could not be serialized
    #[error("Failed to serialize config: {0}")]
    Serialize(String),
}
