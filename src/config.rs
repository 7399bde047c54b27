//! Compile-time planning configuration
//!
//! [`PlanConfig`] carries the three knobs the compile pipeline reads: which
//! device to plan for, how many concurrent executions the caller wants, and
//! the alignment of transient buffer offsets.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ForgeResult, MemForgeError};

/// Environment variable selecting the device ordinal
pub const DEVICE_ID_ENV: &str = "MEMFORGE_DEVICE_ID";

/// Environment variable holding the requested stream count (`AUTO` or an integer)
pub const THROUGHPUT_STREAMS_ENV: &str = "MEMFORGE_THROUGHPUT_STREAMS";

/// Environment variable overriding the transient offset alignment
pub const ALIGNMENT_ENV: &str = "MEMFORGE_ALIGNMENT";

/// Token accepted for [`StreamCount::Auto`]
pub const AUTO_TOKEN: &str = "AUTO";

/// Requested number of concurrent executions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StreamCount {
    /// As many as device memory and device concurrency allow
    #[default]
    Auto,
    /// At most this many
    Fixed(NonZeroUsize),
}

impl StreamCount {
    /// Fixed stream count, rejecting zero
    pub fn fixed(n: usize) -> ForgeResult<Self> {
        NonZeroUsize::new(n).map(StreamCount::Fixed).ok_or_else(|| {
            MemForgeError::InvalidConfiguration("stream count must be positive".to_string())
        })
    }

    /// Requested count, `None` for `Auto`
    pub fn requested(&self) -> Option<usize> {
        match self {
            StreamCount::Auto => None,
            StreamCount::Fixed(n) => Some(n.get()),
        }
    }
}

impl FromStr for StreamCount {
    type Err = MemForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(AUTO_TOKEN) {
            return Ok(StreamCount::Auto);
        }
        match s.parse::<usize>() {
            Ok(n) => StreamCount::fixed(n),
            Err(_) => Err(MemForgeError::InvalidConfiguration(format!(
                "wrong value for property key {}: '{}' (expected {} or a positive integer)",
                THROUGHPUT_STREAMS_ENV, s, AUTO_TOKEN
            ))),
        }
    }
}

impl fmt::Display for StreamCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamCount::Auto => write!(f, "{}", AUTO_TOKEN),
            StreamCount::Fixed(n) => write!(f, "{}", n),
        }
    }
}

impl TryFrom<String> for StreamCount {
    type Error = MemForgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StreamCount> for String {
    fn from(value: StreamCount) -> Self {
        value.to_string()
    }
}

/// Configuration for compiling a graph into a memory plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Device ordinal to plan for
    pub device_id: i32,

    /// Requested number of concurrent executions
    pub throughput_streams: StreamCount,

    /// Alignment of transient offsets and constant offsets in bytes (power of two)
    pub alignment: usize,
}

impl PlanConfig {
    /// Default alignment of offsets inside device regions
    pub const DEFAULT_ALIGNMENT: usize = 256;

    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device ordinal
    pub fn with_device_id(mut self, device_id: i32) -> Self {
        self.device_id = device_id;
        self
    }

    /// Set the requested stream count
    pub fn with_throughput_streams(mut self, streams: StreamCount) -> Self {
        self.throughput_streams = streams;
        self
    }

    /// Set the offset alignment
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Defaults overridden by `MEMFORGE_*` environment variables
    pub fn from_env() -> ForgeResult<Self> {
        let mut config = PlanConfig::default();

        if let Ok(value) = std::env::var(DEVICE_ID_ENV) {
            config.device_id = value.trim().parse().map_err(|_| {
                MemForgeError::InvalidConfiguration(format!(
                    "{} must be an integer, got '{}'",
                    DEVICE_ID_ENV, value
                ))
            })?;
        }
        if let Ok(value) = std::env::var(THROUGHPUT_STREAMS_ENV) {
            config.throughput_streams = value.parse()?;
        }
        if let Ok(value) = std::env::var(ALIGNMENT_ENV) {
            config.alignment = value.trim().parse().map_err(|_| {
                MemForgeError::InvalidConfiguration(format!(
                    "{} must be an integer, got '{}'",
                    ALIGNMENT_ENV, value
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> ForgeResult<()> {
        if self.device_id < 0 {
            return Err(MemForgeError::InvalidConfiguration(format!(
                "device id must be non-negative, got {}",
                self.device_id
            )));
        }
        if !self.alignment.is_power_of_two() {
            return Err(MemForgeError::InvalidConfiguration(format!(
                "alignment must be a power of two, got {}",
                self.alignment
            )));
        }
        Ok(())
    }
}

impl Default for PlanConfig {
    fn default() -> Self {
        PlanConfig {
            device_id: 0,
            throughput_streams: StreamCount::Auto,
            alignment: Self::DEFAULT_ALIGNMENT,
        }
    }
}
